//! Event Store Module
//!
//! - `EventStore`: indexed storage of accepted events with the
//!   regular / replaceable / deletion retention rules
//! - `EventLog`: append-only JSONL log that makes the store durable
//! - `StoreStats`: counters for the admin surface
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//! ┌─────────┐    ┌──────────────┐    ┌──────────────┐    ┌─────────────┐
//! │ publish │───►│ plan against │───►│ append+fsync │───►│ apply to    │
//! │         │    │ indexes      │    │ events.jsonl │    │ indexes     │
//! └─────────┘    └──────────────┘    └──────────────┘    └─────────────┘
//!
//! Read Path (Startup):
//! ┌───────────────┐    ┌─────────────────┐
//! │ Open log      │───►│ Replay records  │───► Ready!
//! └───────────────┘    └─────────────────┘
//! ```
//!
//! Every `compact_threshold` appends the log is rewritten atomically to
//! the live events plus deletion markers.

mod log;
mod stats;
mod store;

pub use log::{EventLog, LogRecord};
pub use stats::StoreStats;
pub use store::{
    EventStore, EventStoreConfig, StoreError, StoreResult, WriteOutcome, DEFAULT_QUERY_LIMIT,
    MAX_QUERY_LIMIT,
};
