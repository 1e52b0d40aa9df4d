//! Connect-time authentication
//!
//! The client passes a base64-encoded signed event as the `auth` query
//! parameter. The signature must verify and the signer must be a member.
//! Any failure closes the socket with code 3000 and the error text as
//! the reason.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use thiserror::Error;

use crate::crypto::EventVerifier;
use crate::membership::MembershipCheck;
use crate::types::Event;

/// Close code sent when authentication fails
pub const AUTH_CLOSE_CODE: u16 = 3000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no auth event found")]
    Missing,
    #[error("invalid auth event format")]
    Format,
    #[error("invalid auth event signature")]
    Signature,
    #[error("pubkey {0} is not allowed")]
    NotMember(String),
}

/// Decode a token in any common base64 alphabet
pub fn decode_auth_event(token: &str) -> Result<Event, AuthError> {
    // An unescaped '+' arrives as a space after query decoding
    let token = token.trim().replace(' ', "+");
    let bytes = [STANDARD, URL_SAFE, STANDARD_NO_PAD, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(&token).ok())
        .ok_or(AuthError::Format)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::Format)
}

/// Query-safe token for a signed event
pub fn encode_auth_event(event: &Event) -> Result<String, serde_json::Error> {
    Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(event)?))
}

/// Validate a connect token; returns the signer's pubkey
pub fn authenticate(
    token: Option<&str>,
    verifier: &dyn EventVerifier,
    members: &dyn MembershipCheck,
) -> Result<String, AuthError> {
    let token = token.filter(|t| !t.is_empty()).ok_or(AuthError::Missing)?;
    let event = decode_auth_event(token)?;
    if !verifier.verify(&event) {
        return Err(AuthError::Signature);
    }
    if !members.is_member(&event.pubkey) {
        return Err(AuthError::NotMember(event.pubkey));
    }
    Ok(event.pubkey)
}
