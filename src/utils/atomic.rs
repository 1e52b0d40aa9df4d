//! Crash-safe file replacement
//!
//! Content goes to `<name>.tmp`, is fsynced, then renamed over the
//! destination. Readers see either the previous file or the new one.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

pub type AtomicResult<T> = Result<T, AtomicError>;

#[derive(Debug, Error)]
pub enum AtomicError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replace `path` with whatever `write_fn` writes
pub fn atomic_write_with<P, F>(path: P, write_fn: F) -> AtomicResult<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let path = path.as_ref();
    let temp = temp_path(path);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = File::create(&temp)?;
    write_fn(&mut file)?;
    file.sync_all()?;

    fs::rename(&temp, path)?;
    Ok(())
}

/// Replace `path` with the pretty-printed JSON of `value`
pub fn atomic_write_json<P, T>(path: P, value: &T) -> AtomicResult<()>
where
    P: AsRef<Path>,
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec_pretty(value)?;
    atomic_write_with(path, |file| file.write_all(&body))
}

/// Remove `*.tmp` leftovers of interrupted writes; returns how many
pub fn cleanup_temp_files<P: AsRef<Path>>(dir: P) -> AtomicResult<usize> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(0);
    }

    let mut cleaned = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            fs::remove_file(&path)?;
            cleaned += 1;
        }
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_with() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("events.jsonl");

        atomic_write_with(&path, |file| {
            writeln!(file, "line 1")?;
            writeln!(file, "line 2")
        })
        .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "line 1\nline 2\n");
        assert!(!temp_dir.path().join("events.jsonl.tmp").exists());
    }

    #[test]
    fn test_atomic_write_json_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("policies.json");

        atomic_write_json(&path, &vec![1, 2, 3]).unwrap();

        let back: Vec<u32> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[test]
    fn test_failed_write_keeps_previous_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("information.json");
        fs::write(&path, "previous").unwrap();

        let result = atomic_write_with(&path, |file| {
            file.write_all(b"partial")?;
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        });

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "previous");
    }

    #[test]
    fn test_cleanup_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("events.jsonl.tmp"), "torn").unwrap();
        fs::write(temp_dir.path().join("events.jsonl"), "keep").unwrap();

        assert_eq!(cleanup_temp_files(temp_dir.path()).unwrap(), 1);
        assert!(temp_dir.path().join("events.jsonl").exists());
    }
}
