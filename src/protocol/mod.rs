//! Wire protocol: JSON-array text frames
//!
//! Client → relay: `EVENT`, `REQ`, `CLOSE`.
//! Relay → client: `EVENT`, `OK`, `EOSE`, `NOTICE`.

mod message;

pub use message::{ClientMessage, ProtocolError, RelayMessage};
