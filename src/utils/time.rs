//! Clock helpers

/// Current Unix timestamp in seconds; 0 if the clock is before the epoch
pub fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}
