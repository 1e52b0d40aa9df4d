//! Utility functions

pub mod atomic;
pub mod time;

pub use atomic::{atomic_write_json, atomic_write_with, cleanup_temp_files, AtomicError, AtomicResult};
pub use time::unix_now;
