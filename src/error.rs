//! Relay-level error taxonomy

use thiserror::Error;

use crate::api::websocket::AuthError;
use crate::config::ConfigError;
use crate::crypto::KeyError;
use crate::event_store::StoreError;
use crate::policy::PolicyError;
use crate::protocol::ProtocolError;
use crate::utils::AtomicError;

pub type RelayResult<T> = Result<T, RelayError>;

/// Every failure the relay can report, grouped by how it is handled.
///
/// On the socket these never escape a connection: protocol errors are
/// dropped, validation, policy and storage errors become `OK(false, ..)`,
/// and authorization errors close the socket.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("validation error: {0}")]
    Validation(#[from] KeyError),
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("authorization error: {0}")]
    Authorization(#[from] AuthError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<AtomicError> for RelayError {
    fn from(e: AtomicError) -> Self {
        RelayError::Storage(e.into())
    }
}
