//! Policy resolution, mutation and persistence

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::crypto::{normalize_pubkey, KeyError};
use crate::types::{DefaultPolicy, Policy, PolicyUpdate};
use crate::utils::{atomic_write_json, AtomicError};

const POLICIES_FILE: &str = "policies.json";

pub type PolicyResult<T> = Result<T, PolicyError>;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid pubkey '{input}': {source}")]
    InvalidPubkey {
        input: String,
        #[source]
        source: KeyError,
    },
    #[error("failed to persist policies: {0}")]
    Persist(#[from] AtomicError),
    #[error("policy file {path} is corrupted: {reason}")]
    Corrupted { path: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolves and mutates per-kind policies
pub struct PolicyEngine {
    default: DefaultPolicy,
    overrides: RwLock<BTreeMap<u16, Policy>>,
    path: Option<PathBuf>,
}

impl PolicyEngine {
    /// Engine with no persistence
    pub fn in_memory(default: DefaultPolicy) -> Self {
        Self {
            default,
            overrides: RwLock::new(BTreeMap::new()),
            path: None,
        }
    }

    /// Load overrides from `<data_dir>/policies.json`.
    ///
    /// A malformed entry that still names its kind is installed as a
    /// closed policy. A file that is not a JSON array is an error.
    pub fn open(default: DefaultPolicy, data_dir: &Path) -> PolicyResult<Self> {
        let path = data_dir.join(POLICIES_FILE);
        let mut overrides = BTreeMap::new();

        if path.exists() {
            let body = std::fs::read_to_string(&path)?;
            let entries: Vec<Value> =
                serde_json::from_str(&body).map_err(|e| PolicyError::Corrupted {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;

            for entry in entries {
                match serde_json::from_value::<Policy>(entry.clone()) {
                    Ok(policy) => {
                        overrides.insert(policy.kind, policy);
                    }
                    Err(e) => match entry
                        .get("kind")
                        .and_then(Value::as_u64)
                        .and_then(|k| u16::try_from(k).ok())
                    {
                        Some(kind) => {
                            error!(kind, error = %e, "malformed policy entry, closing kind");
                            overrides.insert(kind, Policy::uniform(kind, false));
                        }
                        None => warn!(error = %e, "skipping policy entry without a kind"),
                    },
                }
            }
            info!(path = %path.display(), count = overrides.len(), "policies loaded");
        }

        Ok(Self {
            default,
            overrides: RwLock::new(overrides),
            path: Some(path),
        })
    }

    pub fn default_policy(&self) -> &DefaultPolicy {
        &self.default
    }

    /// Stored override, or the policy derived from the default
    pub fn resolve(&self, kind: u16) -> Policy {
        self.overrides
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Policy::uniform(kind, self.default.allows(kind)))
    }

    /// Every stored override, by kind
    pub fn overrides(&self) -> Vec<Policy> {
        self.overrides.read().values().cloned().collect()
    }

    /// Merge `update` onto the resolved policy and store the result.
    ///
    /// Every pubkey is normalized before anything changes; one bad key
    /// fails the whole call.
    pub fn set(&self, kind: u16, update: PolicyUpdate) -> PolicyResult<Policy> {
        let allow = update.allow.as_deref().map(normalize_all).transpose()?;
        let block = update.block.as_deref().map(normalize_all).transpose()?;

        self.mutate(kind, |policy| {
            if let Some(read) = update.read {
                policy.read = read;
            }
            if let Some(write) = update.write {
                policy.write = write;
            }
            if let Some(allow) = allow {
                policy.allow = allow;
            }
            if let Some(block) = block {
                policy.block = block;
            }
        })
    }

    pub fn add_allow(&self, kind: u16, pubkey: &str) -> PolicyResult<Policy> {
        let pubkey = normalize(pubkey)?;
        self.mutate(kind, |policy| {
            policy.allow.insert(pubkey);
        })
    }

    pub fn remove_allow(&self, kind: u16, pubkey: &str) -> PolicyResult<Policy> {
        let pubkey = normalize(pubkey)?;
        self.mutate(kind, |policy| {
            policy.allow.remove(&pubkey);
        })
    }

    pub fn add_block(&self, kind: u16, pubkey: &str) -> PolicyResult<Policy> {
        let pubkey = normalize(pubkey)?;
        self.mutate(kind, |policy| {
            policy.block.insert(pubkey);
        })
    }

    pub fn remove_block(&self, kind: u16, pubkey: &str) -> PolicyResult<Policy> {
        let pubkey = normalize(pubkey)?;
        self.mutate(kind, |policy| {
            policy.block.remove(&pubkey);
        })
    }

    /// Apply `change` to the resolved policy, persist, then publish
    fn mutate<F: FnOnce(&mut Policy)>(&self, kind: u16, change: F) -> PolicyResult<Policy> {
        let mut overrides = self.overrides.write();
        let mut policy = overrides
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Policy::uniform(kind, self.default.allows(kind)));
        change(&mut policy);

        if let Some(path) = &self.path {
            let mut next: Vec<&Policy> = overrides.values().filter(|p| p.kind != kind).collect();
            next.push(&policy);
            next.sort_by_key(|p| p.kind);
            atomic_write_json(path, &next)?;
        }

        overrides.insert(kind, policy.clone());
        info!(kind, read = policy.read, write = policy.write, "policy updated");
        Ok(policy)
    }
}

fn normalize(pubkey: &str) -> PolicyResult<String> {
    normalize_pubkey(pubkey).map_err(|source| PolicyError::InvalidPubkey {
        input: pubkey.to_string(),
        source,
    })
}

fn normalize_all(pubkeys: &[String]) -> PolicyResult<BTreeSet<String>> {
    pubkeys.iter().map(|p| normalize(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keys;
    use tempfile::TempDir;

    fn key(seed: u8) -> Keys {
        Keys::from_secret_bytes(&[seed; 32]).unwrap()
    }

    #[test]
    fn test_resolve_from_default() {
        let all = PolicyEngine::in_memory(DefaultPolicy::All);
        assert!(all.resolve(1).write);

        let none = PolicyEngine::in_memory(DefaultPolicy::None);
        let policy = none.resolve(1);
        assert!(!policy.read && !policy.write);

        let list = PolicyEngine::in_memory("0,1".parse().unwrap());
        assert!(list.resolve(1).read);
        assert!(!list.resolve(3).read);
        assert!(list.resolve(3).allow.is_empty());
    }

    #[test]
    fn test_set_merges_onto_resolved() {
        let engine = PolicyEngine::in_memory(DefaultPolicy::None);
        let policy = engine.set(1, PolicyUpdate::default().write(true)).unwrap();
        assert!(policy.write);
        assert!(!policy.read);

        let policy = engine.set(1, PolicyUpdate::default().read(true)).unwrap();
        assert!(policy.write && policy.read);
        assert_eq!(engine.resolve(1), policy);
    }

    #[test]
    fn test_set_normalizes_npub() {
        let engine = PolicyEngine::in_memory(DefaultPolicy::All);
        let member = key(4);
        let policy = engine
            .set(1, PolicyUpdate::default().allow([member.npub().unwrap()]))
            .unwrap();
        assert!(policy.allow.contains(member.pubkey()));
    }

    #[test]
    fn test_invalid_pubkey_aborts_without_mutation() {
        let engine = PolicyEngine::in_memory(DefaultPolicy::All);
        let good = key(5);
        let result = engine.set(
            1,
            PolicyUpdate::default()
                .write(false)
                .allow([good.pubkey().to_string(), "not-a-key".to_string()]),
        );
        assert!(matches!(result, Err(PolicyError::InvalidPubkey { .. })));
        assert!(engine.resolve(1).write);
        assert!(engine.overrides().is_empty());
    }

    #[test]
    fn test_add_and_remove_block() {
        let engine = PolicyEngine::in_memory(DefaultPolicy::All);
        let bad = key(6);
        engine.add_block(1, bad.pubkey()).unwrap();
        assert!(engine.resolve(1).check_write(bad.pubkey()).is_err());
        engine.remove_block(1, bad.pubkey()).unwrap();
        assert!(engine.resolve(1).check_write(bad.pubkey()).is_ok());
    }

    #[test]
    fn test_policies_persist() {
        let temp_dir = TempDir::new().unwrap();
        let member = key(7);
        {
            let engine = PolicyEngine::open(DefaultPolicy::All, temp_dir.path()).unwrap();
            engine.set(3, PolicyUpdate::default().write(false)).unwrap();
            engine.add_allow(3, member.pubkey()).unwrap();
        }

        let engine = PolicyEngine::open(DefaultPolicy::All, temp_dir.path()).unwrap();
        let policy = engine.resolve(3);
        assert!(!policy.write);
        assert!(policy.allow.contains(member.pubkey()));
    }

    #[test]
    fn test_corrupted_entry_fails_closed() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(POLICIES_FILE),
            r#"[{"kind": 1, "read": "yes"}, {"kind": 7, "read": true, "write": true}]"#,
        )
        .unwrap();

        let engine = PolicyEngine::open(DefaultPolicy::All, temp_dir.path()).unwrap();
        let closed = engine.resolve(1);
        assert!(!closed.read && !closed.write);
        assert!(engine.resolve(7).write);
    }

    #[test]
    fn test_unreadable_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(POLICIES_FILE), "{not json").unwrap();
        assert!(matches!(
            PolicyEngine::open(DefaultPolicy::All, temp_dir.path()),
            Err(PolicyError::Corrupted { .. })
        ));
    }
}
