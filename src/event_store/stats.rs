//! Event store statistics

use serde::Serialize;

/// Point-in-time counters for the admin surface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Stored, retrievable events
    pub events: usize,
    /// Occupied `(kind, pubkey)` slots
    pub replaceable: usize,
    /// Ids marked deleted
    pub deleted: usize,
    pub log_records_since_compaction: usize,
    pub durable: bool,
}
