//! WebSocket endpoint speaking the relay protocol
//!
//! - `handler`: upgrade, connect-time auth, per-connection protocol loop
//! - `auth`: decoding and checking the `auth` query token
//! - `state`: `AppState`, the relay components shared by connections

pub mod auth;
pub mod handler;
pub mod state;

pub use auth::{authenticate, encode_auth_event, AuthError, AUTH_CLOSE_CODE};
pub use handler::ws_handler;
pub use state::AppState;
