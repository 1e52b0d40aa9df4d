//! Event id and signature verification

use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{schnorr, Message, Secp256k1, VerifyOnly, XOnlyPublicKey};

use crate::types::Event;

use super::keys::normalize_pubkey;

/// Decides whether an event is authentic
pub trait EventVerifier: Send + Sync {
    fn verify(&self, event: &Event) -> bool;
}

/// Hex sha256 of `[0, pubkey, created_at, kind, tags, content]`
pub fn compute_event_id(
    pubkey: &str,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> Result<String, serde_json::Error> {
    let serialized = serde_json::to_string(&(0, pubkey, created_at, kind, tags, content))?;
    Ok(hex::encode(sha256::Hash::hash(serialized.as_bytes()).to_byte_array()))
}

/// Checks that `id` is the event hash and `sig` a valid BIP-340
/// signature of it by `pubkey`. Both `id` and `pubkey` must be lowercase hex.
pub struct SchnorrVerifier {
    secp: Secp256k1<VerifyOnly>,
}

impl Default for SchnorrVerifier {
    fn default() -> Self {
        Self {
            secp: Secp256k1::verification_only(),
        }
    }
}

impl SchnorrVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self, event: &Event) -> Option<bool> {
        let computed = compute_event_id(
            &event.pubkey,
            event.created_at,
            event.kind,
            &event.tags,
            &event.content,
        )
        .ok()?;
        // Ids and pubkeys are matched as plain strings downstream, so only
        // the canonical lowercase hex form is authentic.
        if computed != event.id || normalize_pubkey(&event.pubkey).ok()? != event.pubkey {
            return Some(false);
        }

        let digest: [u8; 32] = hex::decode(&event.id).ok()?.try_into().ok()?;
        let message = Message::from_digest(digest);
        let sig = schnorr::Signature::from_slice(&hex::decode(&event.sig).ok()?).ok()?;
        let pubkey = XOnlyPublicKey::from_slice(&hex::decode(&event.pubkey).ok()?).ok()?;

        Some(self.secp.verify_schnorr(&sig, &message, &pubkey).is_ok())
    }
}

impl EventVerifier for SchnorrVerifier {
    fn verify(&self, event: &Event) -> bool {
        self.check(event).unwrap_or(false)
    }
}
