//! Connect-time membership gating

use std::collections::BTreeSet;

use parking_lot::RwLock;

use crate::crypto::{normalize_pubkey, KeyError};

/// Whether a pubkey may open an authenticated connection
pub trait MembershipCheck: Send + Sync {
    fn is_member(&self, pubkey: &str) -> bool;
}

/// Operator-maintained member set. The admin is always a member.
pub struct MemberList {
    admin: Option<String>,
    members: RwLock<BTreeSet<String>>,
}

impl MemberList {
    pub fn new(admin: Option<String>) -> Self {
        Self {
            admin,
            members: RwLock::new(BTreeSet::new()),
        }
    }

    /// Seed with already-normalized pubkeys
    pub fn with_members<I: IntoIterator<Item = String>>(admin: Option<String>, members: I) -> Self {
        Self {
            admin,
            members: RwLock::new(members.into_iter().collect()),
        }
    }

    /// Add a member given as hex or npub; returns the canonical hex
    pub fn add(&self, pubkey: &str) -> Result<String, KeyError> {
        let pubkey = normalize_pubkey(pubkey)?;
        self.members.write().insert(pubkey.clone());
        Ok(pubkey)
    }

    pub fn remove(&self, pubkey: &str) -> Result<bool, KeyError> {
        let pubkey = normalize_pubkey(pubkey)?;
        Ok(self.members.write().remove(&pubkey))
    }

    pub fn members(&self) -> Vec<String> {
        self.members.read().iter().cloned().collect()
    }
}

impl MembershipCheck for MemberList {
    fn is_member(&self, pubkey: &str) -> bool {
        self.admin.as_deref() == Some(pubkey) || self.members.read().contains(pubkey)
    }
}
