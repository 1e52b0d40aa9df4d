//! Event Store - indexed event storage with replace/delete rules
//!
//! All indexes live behind one lock, so a write is observed by readers
//! either completely or not at all. With a data directory configured,
//! every mutation is logged and synced before the indexes change.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{Event, Filter, KindClass};
use crate::utils::{cleanup_temp_files, AtomicError};

use super::log::{EventLog, LogRecord};
use super::stats::StoreStats;

/// Cap applied when a filter has no `limit`
pub const DEFAULT_QUERY_LIMIT: usize = 200;
/// Ceiling for any filter `limit`
pub const MAX_QUERY_LIMIT: usize = 5000;

/// Configuration for the EventStore
#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    /// Directory holding `events.jsonl`; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    /// Appended records after which the log is compacted (0 disables)
    pub compact_threshold: usize,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            compact_threshold: 1000,
            default_limit: DEFAULT_QUERY_LIMIT,
            max_limit: MAX_QUERY_LIMIT,
        }
    }
}

impl EventStoreConfig {
    /// Durable config rooted at `data_dir`
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: Some(data_dir.as_ref().to_path_buf()),
            ..Default::default()
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Path to events.jsonl
    pub fn events_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join("events.jsonl"))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("kind {kind} is not {expected}")]
    WrongKindClass { kind: u16, expected: &'static str },
}

impl From<AtomicError> for StoreError {
    fn from(e: AtomicError) -> Self {
        match e {
            AtomicError::Io(e) => StoreError::Io(e),
            AtomicError::Json(e) => StoreError::Json(e),
        }
    }
}

/// What a write did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Newly stored and retrievable
    Stored,
    /// Id already stored or deleted; nothing changed
    Duplicate,
    /// A replaceable slot already holds a newer or equal event; nothing changed
    Superseded,
}

impl WriteOutcome {
    pub fn is_stored(self) -> bool {
        self == WriteOutcome::Stored
    }
}

#[derive(Default)]
struct Indexes {
    events: HashMap<String, Event>,
    by_kind: HashMap<u16, HashSet<String>>,
    by_author: HashMap<String, HashSet<String>>,
    /// `(kind, pubkey)` -> id of the retained replaceable event
    replaceable: HashMap<(u16, String), String>,
    deleted: HashSet<String>,
}

impl Indexes {
    fn is_known(&self, id: &str) -> bool {
        self.events.contains_key(id) || self.deleted.contains(id)
    }

    fn plan_regular(&self, event: &Event) -> WriteOutcome {
        if self.is_known(&event.id) {
            WriteOutcome::Duplicate
        } else {
            WriteOutcome::Stored
        }
    }

    fn plan_replaceable(&self, event: &Event) -> WriteOutcome {
        if self.is_known(&event.id) {
            return WriteOutcome::Duplicate;
        }
        let slot = (event.kind, event.pubkey.clone());
        match self
            .replaceable
            .get(&slot)
            .and_then(|id| self.events.get(id))
        {
            Some(current) if current.created_at >= event.created_at => WriteOutcome::Superseded,
            _ => WriteOutcome::Stored,
        }
    }

    fn plan(&self, record: &LogRecord) -> WriteOutcome {
        match record {
            LogRecord::Regular { event } => self.plan_regular(event),
            LogRecord::Replaceable { event } => self.plan_replaceable(event),
            LogRecord::Delete { id } => {
                if self.deleted.contains(id) {
                    WriteOutcome::Duplicate
                } else {
                    WriteOutcome::Stored
                }
            }
        }
    }

    /// Apply a record that `plan` reported as `Stored`
    fn apply(&mut self, record: LogRecord) {
        match record {
            LogRecord::Regular { event } => self.insert(event),
            LogRecord::Replaceable { event } => {
                let slot = (event.kind, event.pubkey.clone());
                if let Some(previous) = self.replaceable.insert(slot, event.id.clone()) {
                    self.remove(&previous);
                }
                self.insert(event);
            }
            LogRecord::Delete { id } => {
                self.remove(&id);
                self.deleted.insert(id);
            }
        }
    }

    /// Replay path: plan and apply, ignoring no-ops
    fn replay(&mut self, record: LogRecord) -> bool {
        if self.plan(&record).is_stored() {
            self.apply(record);
            true
        } else {
            false
        }
    }

    fn insert(&mut self, event: Event) {
        self.by_kind
            .entry(event.kind)
            .or_default()
            .insert(event.id.clone());
        self.by_author
            .entry(event.pubkey.clone())
            .or_default()
            .insert(event.id.clone());
        self.events.insert(event.id.clone(), event);
    }

    fn remove(&mut self, id: &str) -> Option<Event> {
        let event = self.events.remove(id)?;

        if let Some(ids) = self.by_kind.get_mut(&event.kind) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_kind.remove(&event.kind);
            }
        }
        if let Some(ids) = self.by_author.get_mut(&event.pubkey) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_author.remove(&event.pubkey);
            }
        }

        let slot = (event.kind, event.pubkey.clone());
        if self.replaceable.get(&slot).map(String::as_str) == Some(id) {
            self.replaceable.remove(&slot);
        }
        Some(event)
    }

    /// Narrowest index-backed candidate set for a filter
    fn candidates<'a>(&'a self, filter: &'a Filter) -> Vec<&'a Event> {
        fn present<T>(list: &Option<Vec<T>>) -> Option<&[T]> {
            list.as_deref().filter(|items| !items.is_empty())
        }

        let ids: HashSet<&str> = if let Some(ids) = present(&filter.ids) {
            ids.iter().map(String::as_str).collect()
        } else if let Some(authors) = present(&filter.authors) {
            authors
                .iter()
                .filter_map(|author| self.by_author.get(author))
                .flatten()
                .map(String::as_str)
                .collect()
        } else if let Some(kinds) = present(&filter.kinds) {
            kinds
                .iter()
                .filter_map(|kind| self.by_kind.get(kind))
                .flatten()
                .map(String::as_str)
                .collect()
        } else {
            return self.events.values().collect();
        };

        ids.into_iter().filter_map(|id| self.events.get(id)).collect()
    }

    fn live_records(&self) -> Vec<LogRecord> {
        let mut events: Vec<&Event> = self.events.values().collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut deleted: Vec<&String> = self.deleted.iter().collect();
        deleted.sort();

        events
            .into_iter()
            .map(|event| match event.class() {
                KindClass::Replaceable => LogRecord::Replaceable {
                    event: event.clone(),
                },
                _ => LogRecord::Regular {
                    event: event.clone(),
                },
            })
            .chain(deleted.into_iter().map(|id| LogRecord::Delete { id: id.clone() }))
            .collect()
    }
}

struct Inner {
    index: Indexes,
    log: Option<EventLog>,
}

/// Indexed event storage
pub struct EventStore {
    config: EventStoreConfig,
    inner: RwLock<Inner>,
}

impl EventStore {
    /// Store with no durable log
    pub fn in_memory() -> Self {
        Self {
            config: EventStoreConfig::in_memory(),
            inner: RwLock::new(Inner {
                index: Indexes::default(),
                log: None,
            }),
        }
    }

    /// Open a store, replaying its log when a data directory is configured
    pub fn open(config: EventStoreConfig) -> StoreResult<Self> {
        let mut index = Indexes::default();
        let mut log = None;

        if let (Some(dir), Some(path)) = (config.data_dir.as_ref(), config.events_path()) {
            std::fs::create_dir_all(dir)?;
            let cleaned = cleanup_temp_files(dir)?;
            if cleaned > 0 {
                warn!(count = cleaned, "removed leftover temp files");
            }

            let (opened, records) = EventLog::open(&path)?;
            let total = records.len();
            let mut applied = 0;
            for record in records {
                if index.replay(record) {
                    applied += 1;
                }
            }
            info!(
                path = %opened.path().display(),
                records = total,
                applied,
                events = index.events.len(),
                "event log replayed"
            );
            log = Some(opened);
        }

        Ok(Self {
            config,
            inner: RwLock::new(Inner { index, log }),
        })
    }

    pub fn config(&self) -> &EventStoreConfig {
        &self.config
    }

    /// Store a non-replaceable event
    pub fn write_regular(&self, event: Event) -> StoreResult<WriteOutcome> {
        if event.class().is_replaceable() {
            return Err(StoreError::WrongKindClass {
                kind: event.kind,
                expected: "regular",
            });
        }
        self.commit(LogRecord::Regular { event })
    }

    /// Upsert into the `(kind, pubkey)` slot; older or equal events are ignored
    pub fn write_replaceable(&self, event: Event) -> StoreResult<WriteOutcome> {
        if !event.class().is_replaceable() {
            return Err(StoreError::WrongKindClass {
                kind: event.kind,
                expected: "replaceable",
            });
        }
        self.commit(LogRecord::Replaceable { event })
    }

    /// Mark `id` deleted. Returns whether a stored event was removed.
    ///
    /// Unknown ids are still marked so they can never be stored later.
    pub fn delete(&self, id: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write();
        let existed = inner.index.events.contains_key(id);
        let record = LogRecord::Delete { id: id.to_string() };
        if !inner.index.plan(&record).is_stored() {
            return Ok(false);
        }
        self.append_and_apply(&mut inner, record)?;
        Ok(existed)
    }

    /// Delete every stored event by `pubkey`; returns how many
    pub fn delete_events_from_pubkey(&self, pubkey: &str) -> StoreResult<usize> {
        let ids: Vec<String> = {
            let inner = self.inner.read();
            inner
                .index
                .by_author
                .get(pubkey)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default()
        };

        let mut removed = 0;
        for id in ids {
            if self.delete(&id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn commit(&self, record: LogRecord) -> StoreResult<WriteOutcome> {
        let mut inner = self.inner.write();
        let outcome = inner.index.plan(&record);
        if outcome.is_stored() {
            self.append_and_apply(&mut inner, record)?;
        } else {
            debug!(?outcome, "write ignored");
        }
        Ok(outcome)
    }

    fn append_and_apply(&self, inner: &mut Inner, record: LogRecord) -> StoreResult<()> {
        if let Some(log) = inner.log.as_mut() {
            log.append(&record)?;
        }
        inner.index.apply(record);

        let due = self.config.compact_threshold > 0
            && inner
                .log
                .as_ref()
                .is_some_and(|log| log.appended() >= self.config.compact_threshold);
        if due {
            if let Err(e) = Self::compact_inner(inner) {
                warn!(error = %e, "log compaction failed");
            }
        }
        Ok(())
    }

    /// Rewrite the log to live events and deletion markers only
    pub fn compact(&self) -> StoreResult<usize> {
        let mut inner = self.inner.write();
        Self::compact_inner(&mut inner)
    }

    fn compact_inner(inner: &mut Inner) -> StoreResult<usize> {
        let records = inner.index.live_records();
        match inner.log.as_mut() {
            Some(log) => {
                let written = log.rewrite(records)?;
                info!(records = written, "event log compacted");
                Ok(written)
            }
            None => Ok(0),
        }
    }

    /// Stored or deleted; either way a publish of `id` is a repeat
    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().index.is_known(id)
    }

    pub fn get_by_id(&self, id: &str) -> Option<Event> {
        self.inner.read().index.events.get(id).cloned()
    }

    pub fn get_by_ids<I, S>(&self, ids: I) -> Vec<Event>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let inner = self.inner.read();
        let mut seen = HashSet::new();
        ids.into_iter()
            .filter_map(|id| {
                let id = id.as_ref();
                if !seen.insert(id.to_string()) {
                    return None;
                }
                inner.index.events.get(id).cloned()
            })
            .collect()
    }

    /// Matching events, newest first, capped by the filter's limit or the default
    pub fn get_by_filter(&self, filter: &Filter) -> Vec<Event> {
        let limit = filter
            .limit
            .unwrap_or(self.config.default_limit)
            .min(self.config.max_limit);
        if limit == 0 {
            return Vec::new();
        }

        let inner = self.inner.read();
        let mut found: Vec<&Event> = inner
            .index
            .candidates(filter)
            .into_iter()
            .filter(|event| filter.matches(event))
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        found.truncate(limit);
        found.into_iter().cloned().collect()
    }

    pub fn count_by_kind(&self) -> BTreeMap<u16, usize> {
        self.inner
            .read()
            .index
            .by_kind
            .iter()
            .map(|(kind, ids)| (*kind, ids.len()))
            .collect()
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut ids: Vec<String> = inner.index.deleted.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.read().index.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.read();
        StoreStats {
            events: inner.index.events.len(),
            replaceable: inner.index.replaceable.len(),
            deleted: inner.index.deleted.len(),
            log_records_since_compaction: inner.log.as_ref().map_or(0, |log| log.appended()),
            durable: inner.log.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn event(id: &str, pubkey: &str, kind: u16, created_at: u64) -> Event {
        Event {
            id: id.to_string(),
            pubkey: pubkey.to_string(),
            created_at,
            kind,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn test_write_regular_indexes_by_id_kind_author() {
        let store = EventStore::in_memory();
        assert_eq!(
            store.write_regular(event("a", "alice", 1, 10)).unwrap(),
            WriteOutcome::Stored
        );

        assert!(store.get_by_id("a").is_some());
        assert_eq!(store.get_by_filter(&Filter::new().kinds([1])).len(), 1);
        assert_eq!(store.get_by_filter(&Filter::new().authors(["alice"])).len(), 1);
        assert!(store.get_by_filter(&Filter::new().authors(["bob"])).is_empty());
    }

    #[test]
    fn test_duplicate_regular_is_ignored() {
        let store = EventStore::in_memory();
        store.write_regular(event("a", "alice", 1, 10)).unwrap();
        assert_eq!(
            store.write_regular(event("a", "alice", 1, 10)).unwrap(),
            WriteOutcome::Duplicate
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_kind_class_is_enforced() {
        let store = EventStore::in_memory();
        assert!(matches!(
            store.write_regular(event("a", "alice", 0, 10)),
            Err(StoreError::WrongKindClass { kind: 0, .. })
        ));
        assert!(matches!(
            store.write_replaceable(event("b", "alice", 1, 10)),
            Err(StoreError::WrongKindClass { kind: 1, .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_replaceable_upsert_in_either_order() {
        let older = event("older", "alice", 0, 10);
        let newer = event("newer", "alice", 0, 20);

        let store = EventStore::in_memory();
        store.write_replaceable(older.clone()).unwrap();
        store.write_replaceable(newer.clone()).unwrap();
        assert!(store.get_by_id("newer").is_some());
        assert!(store.get_by_id("older").is_none());

        let store = EventStore::in_memory();
        store.write_replaceable(newer).unwrap();
        assert_eq!(
            store.write_replaceable(older).unwrap(),
            WriteOutcome::Superseded
        );
        assert!(store.get_by_id("newer").is_some());
        assert!(store.get_by_id("older").is_none());
        assert_eq!(store.count_by_kind().get(&0), Some(&1));
    }

    #[test]
    fn test_replaceable_equal_timestamp_keeps_existing() {
        let store = EventStore::in_memory();
        store.write_replaceable(event("first", "alice", 10002, 10)).unwrap();
        assert_eq!(
            store.write_replaceable(event("second", "alice", 10002, 10)).unwrap(),
            WriteOutcome::Superseded
        );
        assert!(store.get_by_id("first").is_some());
    }

    #[test]
    fn test_replaceable_slots_are_per_author_and_kind() {
        let store = EventStore::in_memory();
        store.write_replaceable(event("a0", "alice", 0, 10)).unwrap();
        store.write_replaceable(event("a3", "alice", 3, 10)).unwrap();
        store.write_replaceable(event("b0", "bob", 0, 10)).unwrap();
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_delete_is_final_and_idempotent() {
        let store = EventStore::in_memory();
        store.write_regular(event("a", "alice", 1, 10)).unwrap();

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert!(!store.delete("never-seen").unwrap());

        assert!(store.get_by_id("a").is_none());
        assert!(store.get_by_filter(&Filter::new()).is_empty());
        assert!(store.contains("a"));
        assert_eq!(
            store.write_regular(event("a", "alice", 1, 10)).unwrap(),
            WriteOutcome::Duplicate
        );
        assert!(store.get_by_id("a").is_none());
        assert_eq!(store.deleted_ids(), vec!["a".to_string(), "never-seen".to_string()]);
    }

    #[test]
    fn test_filter_results_newest_first_and_capped() {
        let store = EventStore::in_memory();
        for i in 0..5u64 {
            store.write_regular(event(&format!("e{}", i), "alice", 1, 100 + i)).unwrap();
        }

        let all = store.get_by_filter(&Filter::new());
        let times: Vec<u64> = all.iter().map(|e| e.created_at).collect();
        assert_eq!(times, vec![104, 103, 102, 101, 100]);

        let two = store.get_by_filter(&Filter::new().limit(2));
        assert_eq!(two.len(), 2);
        assert_eq!(two[0].id, "e4");

        assert!(store.get_by_filter(&Filter::new().limit(0)).is_empty());
    }

    #[test]
    fn test_default_limit_applies() {
        let store = EventStore::open(EventStoreConfig {
            default_limit: 3,
            ..EventStoreConfig::in_memory()
        })
        .unwrap();
        for i in 0..10u64 {
            store.write_regular(event(&format!("e{}", i), "alice", 1, i)).unwrap();
        }
        assert_eq!(store.get_by_filter(&Filter::new()).len(), 3);
        assert_eq!(store.get_by_filter(&Filter::new().limit(7)).len(), 7);
    }

    #[test]
    fn test_get_by_ids_skips_unknown_and_repeats() {
        let store = EventStore::in_memory();
        store.write_regular(event("a", "alice", 1, 10)).unwrap();
        store.write_regular(event("b", "alice", 1, 11)).unwrap();
        let found = store.get_by_ids(["a", "a", "zzz", "b"]);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_delete_events_from_pubkey() {
        let store = EventStore::in_memory();
        store.write_regular(event("a", "alice", 1, 10)).unwrap();
        store.write_regular(event("b", "alice", 7, 11)).unwrap();
        store.write_regular(event("c", "bob", 1, 12)).unwrap();

        assert_eq!(store.delete_events_from_pubkey("alice").unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.count_by_kind().get(&7), None);
    }

    #[test]
    fn test_log_replay_restores_state() {
        let temp_dir = TempDir::new().unwrap();
        let config = EventStoreConfig::new(temp_dir.path());

        {
            let store = EventStore::open(config.clone()).unwrap();
            store.write_regular(event("a", "alice", 1, 10)).unwrap();
            store.write_regular(event("b", "alice", 1, 11)).unwrap();
            store.write_replaceable(event("m1", "alice", 0, 10)).unwrap();
            store.write_replaceable(event("m2", "alice", 0, 20)).unwrap();
            store.delete("a").unwrap();
        }

        let store = EventStore::open(config).unwrap();
        assert!(store.get_by_id("a").is_none());
        assert!(store.get_by_id("b").is_some());
        assert!(store.get_by_id("m1").is_none());
        assert!(store.get_by_id("m2").is_some());
        assert!(store.contains("a"));
    }

    #[test]
    fn test_compaction_preserves_state() {
        let temp_dir = TempDir::new().unwrap();
        let config = EventStoreConfig {
            compact_threshold: 4,
            ..EventStoreConfig::new(temp_dir.path())
        };

        {
            let store = EventStore::open(config.clone()).unwrap();
            for i in 0..6u64 {
                store.write_replaceable(event(&format!("m{}", i), "alice", 0, i)).unwrap();
            }
            store.delete("gone").unwrap();
            assert!(store.stats().log_records_since_compaction < 4);
        }

        let lines = std::fs::read_to_string(temp_dir.path().join("events.jsonl")).unwrap();
        assert!(lines.lines().count() <= 4);

        let store = EventStore::open(config).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get_by_id("m5").is_some());
        assert!(store.contains("gone"));
    }
}
