//! Relay configuration from environment variables
//!
//! | variable | default |
//! |---|---|
//! | `RELAY_BIND` | `0.0.0.0:8080` |
//! | `RELAY_DATA_DIR` | `data` (empty keeps everything in memory) |
//! | `RELAY_ADMIN_PUBKEY` | unset |
//! | `RELAY_AUTH_REQUIRED` | `false` |
//! | `RELAY_MEMBERS` | empty, comma-separated |
//! | `RELAY_DEFAULT_POLICY` | `all` (`none` or `1,7,...`) |
//! | `RELAY_MAX_SUBSCRIPTIONS` | `10` |
//! | `RELAY_DEFAULT_LIMIT` | `200` |
//! | `RELAY_MAX_LIMIT` | `5000` |
//! | `RELAY_COMPACT_THRESHOLD` | `1000` |
//! | `RELAY_NAME`, `RELAY_DESCRIPTION`, `RELAY_CONTACT`, `RELAY_ICON` | unset |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::crypto::normalize_pubkey;
use crate::event_store::{DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT};
use crate::subscription::DEFAULT_MAX_SUBSCRIPTIONS;
use crate::types::{DefaultPolicy, RelayInformationUpdate};

#[derive(Debug, Error)]
#[error("{var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind: SocketAddr,
    /// `None` keeps events, policies and relay information in memory
    pub data_dir: Option<PathBuf>,
    /// Canonical hex
    pub admin_pubkey: Option<String>,
    pub auth_required: bool,
    /// Canonical hex
    pub members: Vec<String>,
    pub default_policy: DefaultPolicy,
    pub max_subscriptions: usize,
    pub default_limit: usize,
    pub max_limit: usize,
    pub compact_threshold: usize,
    pub information: RelayInformationUpdate,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            data_dir: Some(PathBuf::from("data")),
            admin_pubkey: None,
            auth_required: false,
            members: Vec::new(),
            default_policy: DefaultPolicy::All,
            max_subscriptions: DEFAULT_MAX_SUBSCRIPTIONS,
            default_limit: DEFAULT_QUERY_LIMIT,
            max_limit: MAX_QUERY_LIMIT,
            compact_threshold: 1000,
            information: RelayInformationUpdate::default(),
        }
    }
}

impl RelayConfig {
    /// In-memory relay on an ephemeral localhost port
    pub fn for_testing() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            data_dir: None,
            ..Default::default()
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string());

        if let Some(bind) = get("RELAY_BIND") {
            config.bind = parse("RELAY_BIND", &bind)?;
        }
        if let Some(dir) = get("RELAY_DATA_DIR") {
            config.data_dir = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }
        if let Some(admin) = get("RELAY_ADMIN_PUBKEY").filter(|v| !v.is_empty()) {
            config.admin_pubkey = Some(normalize_pubkey(&admin).map_err(|e| ConfigError {
                var: "RELAY_ADMIN_PUBKEY",
                reason: e.to_string(),
            })?);
        }
        if let Some(required) = get("RELAY_AUTH_REQUIRED") {
            config.auth_required = parse_bool("RELAY_AUTH_REQUIRED", &required)?;
        }
        if let Some(members) = get("RELAY_MEMBERS") {
            config.members = members
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(|m| {
                    normalize_pubkey(m).map_err(|e| ConfigError {
                        var: "RELAY_MEMBERS",
                        reason: format!("{}: {}", m, e),
                    })
                })
                .collect::<Result<_, _>>()?;
        }
        if let Some(policy) = get("RELAY_DEFAULT_POLICY") {
            config.default_policy = policy.parse().map_err(|reason| ConfigError {
                var: "RELAY_DEFAULT_POLICY",
                reason,
            })?;
        }
        if let Some(v) = get("RELAY_MAX_SUBSCRIPTIONS") {
            config.max_subscriptions = parse("RELAY_MAX_SUBSCRIPTIONS", &v)?;
        }
        if let Some(v) = get("RELAY_DEFAULT_LIMIT") {
            config.default_limit = parse("RELAY_DEFAULT_LIMIT", &v)?;
        }
        if let Some(v) = get("RELAY_MAX_LIMIT") {
            config.max_limit = parse("RELAY_MAX_LIMIT", &v)?;
        }
        if let Some(v) = get("RELAY_COMPACT_THRESHOLD") {
            config.compact_threshold = parse("RELAY_COMPACT_THRESHOLD", &v)?;
        }

        config.information = RelayInformationUpdate {
            name: get("RELAY_NAME"),
            description: get("RELAY_DESCRIPTION"),
            contact: get("RELAY_CONTACT"),
            icon: get("RELAY_ICON"),
        };

        Ok(config)
    }
}

fn parse<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError {
        var,
        reason: format!("'{}': {}", value, e),
    })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError {
            var,
            reason: format!("'{}' is not a boolean", value),
        }),
    }
}
