//! Relayed: a self-hosted Nostr relay
//!
//! Clients speak the relay protocol over a WebSocket: they publish signed
//! events and subscribe with filters, receiving stored history first and
//! then live events as they are accepted.
//!
//! # Features
//!
//! - **Durable storage**: append-only event log replayed on startup
//! - **Replaceable events**: one event per (author, kind), newest wins
//! - **Deletions**: deletion requests remove targets and tombstone them
//! - **Per-kind policies**: read/write switches with allow and block lists
//! - **Membership**: optional connect-time authentication
//!
//! # Modules
//!
//! - `types`: Events, filters, policies, relay information
//! - `crypto`: Signature verification, key normalization, signing
//! - `event_store`: Indexed event storage with a durable log
//! - `policy`: Policy resolution and persistence
//! - `subscription`: Live subscription registry and fan-out
//! - `protocol`: Client and relay wire messages
//! - `api`: HTTP router and the WebSocket connection handler
//! - `relay`: The running relay handle
//! - `config`: Environment configuration
//!
//! # Example
//!
//! ```no_run
//! use relayed::{Relay, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> relayed::RelayResult<()> {
//!     let relay = Relay::start(RelayConfig::from_env()?).await?;
//!     println!("listening on {}", relay.ws_url());
//!     tokio::signal::ctrl_c().await?;
//!     relay.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod event_store;
pub mod membership;
pub mod policy;
pub mod protocol;
pub mod relay;
pub mod subscription;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use config::{ConfigError, RelayConfig};
pub use crypto::{EventTemplate, EventVerifier, Keys, SchnorrVerifier};
pub use error::{RelayError, RelayResult};
pub use event_store::{EventStore, EventStoreConfig, WriteOutcome};
pub use policy::PolicyEngine;
pub use protocol::{ClientMessage, RelayMessage};
pub use relay::Relay;
pub use subscription::SubscriptionRegistry;
pub use types::{
    DefaultPolicy, Event, Filter, KindClass, Policy, PolicyUpdate, RelayInformation,
    RelayInformationUpdate,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
