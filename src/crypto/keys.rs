//! Pubkey encodings and event signing

use bech32::{Bech32, Hrp};
use bitcoin::secp256k1::{Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey};
use thiserror::Error;

use crate::types::Event;
use crate::utils::unix_now;

use super::verify::compute_event_id;

const NPUB_HRP: &str = "npub";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("invalid bech32: {0}")]
    Bech32(String),
    #[error("expected npub, got {0}")]
    WrongPrefix(String),
    #[error("expected 32 bytes, got {0}")]
    InvalidLength(usize),
    #[error("not a valid secp256k1 x-only key")]
    InvalidKey,
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Canonical lowercase hex for a pubkey given as hex or `npub1...`
pub fn normalize_pubkey(input: &str) -> Result<String, KeyError> {
    let input = input.trim();
    let bytes = if input.len() > 5 && input[..5].eq_ignore_ascii_case("npub1") {
        let (hrp, data) =
            bech32::decode(input).map_err(|e| KeyError::Bech32(e.to_string()))?;
        if hrp.to_lowercase() != NPUB_HRP {
            return Err(KeyError::WrongPrefix(hrp.to_string()));
        }
        data
    } else {
        hex::decode(input).map_err(|e| KeyError::InvalidHex(e.to_string()))?
    };

    if bytes.len() != 32 {
        return Err(KeyError::InvalidLength(bytes.len()));
    }
    XOnlyPublicKey::from_slice(&bytes).map_err(|_| KeyError::InvalidKey)?;
    Ok(hex::encode(bytes))
}

/// `npub1...` form of a hex pubkey
pub fn encode_npub(pubkey_hex: &str) -> Result<String, KeyError> {
    let bytes = hex::decode(pubkey_hex).map_err(|e| KeyError::InvalidHex(e.to_string()))?;
    let hrp = Hrp::parse(NPUB_HRP).map_err(|e| KeyError::Bech32(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, &bytes).map_err(|e| KeyError::Bech32(e.to_string()))
}

/// Unsigned event contents
#[derive(Debug, Clone)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl EventTemplate {
    /// Template stamped with the current time
    pub fn new(kind: u16, content: impl Into<String>) -> Self {
        Self {
            created_at: unix_now(),
            kind,
            tags: Vec::new(),
            content: content.into(),
        }
    }

    pub fn created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn tag<I, S>(mut self, tag: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(tag.into_iter().map(Into::into).collect());
        self
    }
}

/// A secret key with its derived x-only pubkey
pub struct Keys {
    secp: Secp256k1<bitcoin::secp256k1::All>,
    keypair: Keypair,
    pubkey: String,
}

impl Keys {
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Result<Self, KeyError> {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(secret).map_err(|e| KeyError::Signing(e.to_string()))?;
        let keypair = Keypair::from_secret_key(&secp, &sk);
        let (xonly, _parity) = keypair.x_only_public_key();
        Ok(Self {
            secp,
            keypair,
            pubkey: hex::encode(xonly.serialize()),
        })
    }

    /// Hex pubkey
    pub fn pubkey(&self) -> &str {
        &self.pubkey
    }

    pub fn npub(&self) -> Result<String, KeyError> {
        encode_npub(&self.pubkey)
    }

    pub fn sign(&self, template: EventTemplate) -> Result<Event, KeyError> {
        let id = compute_event_id(
            &self.pubkey,
            template.created_at,
            template.kind,
            &template.tags,
            &template.content,
        )
        .map_err(|e| KeyError::Signing(e.to_string()))?;

        let digest: [u8; 32] = hex::decode(&id)
            .map_err(|e| KeyError::InvalidHex(e.to_string()))?
            .try_into()
            .map_err(|bytes: Vec<u8>| KeyError::InvalidLength(bytes.len()))?;
        let message = Message::from_digest(digest);
        let sig = self.secp.sign_schnorr_no_aux_rand(&message, &self.keypair);

        Ok(Event {
            id,
            pubkey: self.pubkey.clone(),
            created_at: template.created_at,
            kind: template.kind,
            tags: template.tags,
            content: template.content,
            sig: hex::encode(sig.serialize()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_accepts_hex_and_npub() {
        let keys = Keys::from_secret_bytes(&[3u8; 32]).unwrap();
        let hex = keys.pubkey().to_string();
        let npub = keys.npub().unwrap();
        assert!(npub.starts_with("npub1"));

        assert_eq!(normalize_pubkey(&hex).unwrap(), hex);
        assert_eq!(normalize_pubkey(&hex.to_uppercase()).unwrap(), hex);
        assert_eq!(normalize_pubkey(&npub).unwrap(), hex);
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(matches!(normalize_pubkey("zz"), Err(KeyError::InvalidHex(_))));
        assert_eq!(normalize_pubkey("abcd"), Err(KeyError::InvalidLength(2)));
        assert!(normalize_pubkey("npub1qqqq").is_err());
        assert!(normalize_pubkey(&"ff".repeat(32)).is_err());
    }

    #[test]
    fn test_sign_produces_content_addressed_id() {
        let keys = Keys::from_secret_bytes(&[9u8; 32]).unwrap();
        let event = keys
            .sign(EventTemplate::new(1, "hi").tag(["t", "nostr"]).created_at(42))
            .unwrap();
        let expected = compute_event_id(&event.pubkey, 42, 1, &event.tags, "hi").unwrap();
        assert_eq!(event.id, expected);
        assert_eq!(event.sig.len(), 128);
    }
}
