//! Per-kind access policy types

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Read/write rule for one kind, with allow and block pubkey sets.
///
/// Pubkeys in `allow` and `block` are canonical lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub kind: u16,
    pub read: bool,
    pub write: bool,
    #[serde(default)]
    pub allow: BTreeSet<String>,
    #[serde(default)]
    pub block: BTreeSet<String>,
}

/// Why a write was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteDenied {
    /// `write` is open but the author is blocked
    Blocked,
    /// `write` is closed and the author is not allowed
    KindClosed(u16),
}

impl fmt::Display for WriteDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteDenied::Blocked => write!(f, "this pubkey is blocked"),
            WriteDenied::KindClosed(kind) => write!(f, "kind {} is blocked", kind),
        }
    }
}

impl Policy {
    /// Policy with both directions open or closed and empty sets
    pub fn uniform(kind: u16, open: bool) -> Self {
        Self {
            kind,
            read: open,
            write: open,
            allow: BTreeSet::new(),
            block: BTreeSet::new(),
        }
    }

    /// Write authorization.
    ///
    /// With `write` open only `block` is consulted; with `write` closed
    /// only `allow` is.
    pub fn check_write(&self, author: &str) -> Result<(), WriteDenied> {
        if self.write {
            if self.block.contains(author) {
                return Err(WriteDenied::Blocked);
            }
        } else if !self.allow.contains(author) {
            return Err(WriteDenied::KindClosed(self.kind));
        }
        Ok(())
    }

    /// Whether events by `author` may be served to readers
    pub fn permits_read(&self, author: &str) -> bool {
        self.read || self.allow.contains(author)
    }
}

/// Relay-wide fallback for kinds with no stored override
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DefaultPolicy {
    #[default]
    All,
    None,
    Kinds(BTreeSet<u16>),
}

impl DefaultPolicy {
    pub fn allows(&self, kind: u16) -> bool {
        match self {
            DefaultPolicy::All => true,
            DefaultPolicy::None => false,
            DefaultPolicy::Kinds(kinds) => kinds.contains(&kind),
        }
    }
}

impl FromStr for DefaultPolicy {
    type Err = String;

    /// Parses `all`, `none`, or a comma-separated kind list
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(DefaultPolicy::All),
            "none" => Ok(DefaultPolicy::None),
            list => list
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| {
                    part.parse::<u16>()
                        .map_err(|_| format!("invalid kind '{}' in default policy", part))
                })
                .collect::<Result<BTreeSet<_>, _>>()
                .map(DefaultPolicy::Kinds),
        }
    }
}

/// Partial update merged onto the resolved policy by `PolicyEngine::set`.
///
/// `allow` and `block`, when given, replace the existing sets. Their
/// entries may be hex or `npub` and are normalized before storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<Vec<String>>,
}

impl PolicyUpdate {
    pub fn read(mut self, read: bool) -> Self {
        self.read = Some(read);
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = Some(write);
        self
    }

    pub fn allow<I: IntoIterator<Item = S>, S: Into<String>>(mut self, keys: I) -> Self {
        self.allow = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn block<I: IntoIterator<Item = S>, S: Into<String>>(mut self, keys: I) -> Self {
        self.block = Some(keys.into_iter().map(Into::into).collect());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_open_consults_block_only() {
        let mut policy = Policy::uniform(1, true);
        policy.block.insert("bad".into());
        policy.allow.insert("bad".into());
        assert_eq!(policy.check_write("bad"), Err(WriteDenied::Blocked));
        assert!(policy.check_write("anyone").is_ok());
    }

    #[test]
    fn test_write_closed_consults_allow_only() {
        let mut policy = Policy::uniform(7, false);
        policy.allow.insert("friend".into());
        policy.block.insert("friend".into());
        assert!(policy.check_write("friend").is_ok());
        assert_eq!(policy.check_write("stranger"), Err(WriteDenied::KindClosed(7)));
        assert_eq!(
            WriteDenied::KindClosed(7).to_string(),
            "kind 7 is blocked"
        );
    }

    #[test]
    fn test_read_gating() {
        let mut policy = Policy::uniform(1, true);
        policy.read = false;
        policy.allow.insert("friend".into());
        assert!(policy.permits_read("friend"));
        assert!(!policy.permits_read("stranger"));
    }

    #[test]
    fn test_default_policy_parse() {
        assert_eq!("all".parse::<DefaultPolicy>().unwrap(), DefaultPolicy::All);
        assert_eq!("None".parse::<DefaultPolicy>().unwrap(), DefaultPolicy::None);
        let kinds = "1, 7,30023".parse::<DefaultPolicy>().unwrap();
        assert!(kinds.allows(7));
        assert!(!kinds.allows(3));
        assert!("1,x".parse::<DefaultPolicy>().is_err());
    }
}
