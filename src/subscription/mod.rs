//! Live subscriptions
//!
//! `SubscriptionRegistry` owns every connection's subscription map. It is
//! created per relay and handed to connection handlers; nothing here is
//! process-global.
//!
//! Delivery is a scan over registered subscriptions. Protocol code only
//! depends on the `FanOut` trait, so an indexed matcher can replace the
//! scan without touching it.

mod registry;

pub use registry::{
    ConnectionId, Outbound, SubscriptionError, SubscriptionMatch, SubscriptionRegistry,
    DEFAULT_MAX_SUBSCRIPTIONS,
};

use crate::types::Event;

/// Who may see an event, decided per subscriber's authenticated pubkey
pub type ReadGate<'a> = &'a dyn Fn(Option<&str>) -> bool;

/// Live delivery of newly accepted events
pub trait FanOut: Send + Sync {
    /// Deliver `event` to every matching subscription whose connection
    /// passes `gate`. Returns the number of frames queued.
    fn fan_out(&self, event: &Event, gate: ReadGate<'_>) -> usize;
}
