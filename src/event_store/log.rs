//! Append-only JSONL mutation log
//!
//! One record per line. Every append opens the file, writes and fsyncs
//! before the caller touches in-memory state, and replay runs the same
//! records back through the index on startup.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::Event;
use crate::utils::atomic_write_with;

use super::store::StoreResult;

/// A single durable mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogRecord {
    Regular { event: Event },
    Replaceable { event: Event },
    Delete { id: String },
}

pub struct EventLog {
    path: PathBuf,
    /// Records appended since the log was last rewritten
    appended: usize,
    /// Set after a failed append may have left a torn line behind
    needs_newline: bool,
}

impl EventLog {
    /// Open (or create) the log and return every readable record in it.
    ///
    /// Lines that fail to parse are skipped with a warning.
    pub fn open(path: &Path) -> StoreResult<(Self, Vec<LogRecord>)> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut records = Vec::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for (line_num, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogRecord>(&line) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(
                        path = %path.display(),
                        line = line_num + 1,
                        error = %e,
                        "skipping unreadable log record"
                    ),
                }
            }
        }

        OpenOptions::new().create(true).append(true).open(path)?;
        let needs_newline = !ends_with_newline(path)?;

        Ok((
            Self {
                path: path.to_path_buf(),
                appended: 0,
                needs_newline,
            },
            records,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appended(&self) -> usize {
        self.appended
    }

    /// Append one record and sync it to disk
    pub fn append(&mut self, record: &LogRecord) -> StoreResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        if self.needs_newline {
            line.insert(0, '\n');
        }

        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| {
                file.write_all(line.as_bytes())?;
                file.sync_data()
            });
        if let Err(e) = written {
            self.needs_newline = true;
            return Err(e.into());
        }

        self.needs_newline = false;
        self.appended += 1;
        Ok(())
    }

    /// Atomically replace the log with `records`
    pub fn rewrite<I>(&mut self, records: I) -> StoreResult<usize>
    where
        I: IntoIterator<Item = LogRecord>,
    {
        let mut lines = Vec::new();
        for record in records {
            lines.push(serde_json::to_string(&record)?);
        }

        atomic_write_with(&self.path, |file| {
            for line in &lines {
                writeln!(file, "{}", line)?;
            }
            Ok(())
        })?;

        self.appended = 0;
        self.needs_newline = false;
        Ok(lines.len())
    }
}

fn ends_with_newline(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
