//! Keys and signatures
//!
//! The relay consumes these as opaque capabilities: `EventVerifier`
//! decides whether an event is authentic, `normalize_pubkey` turns any
//! accepted key encoding into canonical hex. `Keys` signs events for
//! clients and tests.

mod keys;
mod verify;

pub use keys::{encode_npub, normalize_pubkey, EventTemplate, KeyError, Keys};
pub use verify::{compute_event_id, EventVerifier, SchnorrVerifier};
