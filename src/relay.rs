//! A running relay and its operator surface
//!
//! `Relay::start` wires the store, policies, membership and subscription
//! registry into one `AppState`, binds the listener and serves it in a
//! background task. The returned handle is how an embedding program
//! inspects and administers the relay.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api::http::create_router;
use crate::api::websocket::AppState;
use crate::config::RelayConfig;
use crate::crypto::{normalize_pubkey, EventVerifier, SchnorrVerifier};
use crate::error::RelayResult;
use crate::event_store::{EventStore, EventStoreConfig, StoreStats};
use crate::membership::MemberList;
use crate::policy::PolicyEngine;
use crate::subscription::SubscriptionRegistry;
use crate::types::{Event, Policy, PolicyUpdate, RelayInformation, RelayInformationUpdate};
use crate::utils::atomic_write_json;

const INFORMATION_FILE: &str = "information.json";

/// How long `shutdown` waits for open connections to say goodbye
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a relay serving in the background
pub struct Relay {
    state: Arc<AppState>,
    members: Arc<MemberList>,
    information: RwLock<RelayInformation>,
    information_path: Option<PathBuf>,
    local_addr: SocketAddr,
    join: JoinHandle<()>,
}

impl Relay {
    pub async fn start(config: RelayConfig) -> RelayResult<Self> {
        Self::start_with(config, Arc::new(SchnorrVerifier::new())).await
    }

    /// Start with a caller-supplied signature verifier
    pub async fn start_with(
        config: RelayConfig,
        verifier: Arc<dyn EventVerifier>,
    ) -> RelayResult<Self> {
        let store = EventStore::open(EventStoreConfig {
            data_dir: config.data_dir.clone(),
            compact_threshold: config.compact_threshold,
            default_limit: config.default_limit,
            max_limit: config.max_limit,
        })?;

        let policies = match &config.data_dir {
            Some(dir) => PolicyEngine::open(config.default_policy.clone(), dir)?,
            None => PolicyEngine::in_memory(config.default_policy.clone()),
        };

        let members = Arc::new(MemberList::with_members(
            config.admin_pubkey.clone(),
            config.members.iter().cloned(),
        ));

        let information_path = config.data_dir.as_ref().map(|dir| dir.join(INFORMATION_FILE));
        let mut information = information_path
            .as_deref()
            .map(load_information)
            .unwrap_or_default();
        information.merge(config.information.clone());
        information.pubkey = config.admin_pubkey.clone();
        information.version = crate::VERSION.to_string();
        if let Some(path) = &information_path {
            atomic_write_json(path, &information)?;
        }

        let state = Arc::new(
            AppState::new(
                Arc::new(store),
                Arc::new(policies),
                Arc::new(SubscriptionRegistry::new(config.max_subscriptions)),
                verifier,
                members.clone(),
            )
            .with_admin(config.admin_pubkey.clone())
            .require_auth(config.auth_required),
        );

        let listener = TcpListener::bind(config.bind).await?;
        let local_addr = listener.local_addr()?;
        let app = create_router(state.clone());
        let mut shutdown = state.shutdown_signal();

        let join = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.wait_for(|stop| *stop).await;
                })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server error");
            }
        });

        info!(
            addr = %local_addr,
            auth_required = config.auth_required,
            durable = config.data_dir.is_some(),
            "relay listening"
        );

        Ok(Self {
            state,
            members,
            information: RwLock::new(information),
            information_path,
            local_addr,
            join,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    // --- events ---

    pub fn get_event(&self, id: &str) -> Option<Event> {
        self.state.store.get_by_id(id)
    }

    pub fn count_by_kind(&self) -> BTreeMap<u16, usize> {
        self.state.store.count_by_kind()
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.state.store.deleted_ids()
    }

    /// Delete everything authored by `pubkey` (hex or npub)
    pub fn delete_events_from_pubkey(&self, pubkey: &str) -> RelayResult<usize> {
        let pubkey = normalize_pubkey(pubkey)?;
        Ok(self.state.store.delete_events_from_pubkey(&pubkey)?)
    }

    pub fn stats(&self) -> StoreStats {
        self.state.store.stats()
    }

    // --- policies ---

    pub fn resolve_policy(&self, kind: u16) -> Policy {
        self.state.policies.resolve(kind)
    }

    pub fn set_policy(&self, kind: u16, update: PolicyUpdate) -> RelayResult<Policy> {
        Ok(self.state.policies.set(kind, update)?)
    }

    pub fn add_allow(&self, kind: u16, pubkey: &str) -> RelayResult<Policy> {
        Ok(self.state.policies.add_allow(kind, pubkey)?)
    }

    pub fn remove_allow(&self, kind: u16, pubkey: &str) -> RelayResult<Policy> {
        Ok(self.state.policies.remove_allow(kind, pubkey)?)
    }

    pub fn add_block(&self, kind: u16, pubkey: &str) -> RelayResult<Policy> {
        Ok(self.state.policies.add_block(kind, pubkey)?)
    }

    pub fn remove_block(&self, kind: u16, pubkey: &str) -> RelayResult<Policy> {
        Ok(self.state.policies.remove_block(kind, pubkey)?)
    }

    // --- relay information ---

    pub fn relay_information(&self) -> RelayInformation {
        self.information.read().clone()
    }

    /// Merge `update` and persist it before it becomes visible
    pub fn set_relay_information(
        &self,
        update: RelayInformationUpdate,
    ) -> RelayResult<RelayInformation> {
        let mut information = self.information.write();
        let mut next = information.clone();
        next.merge(update);
        if let Some(path) = &self.information_path {
            atomic_write_json(path, &next)?;
        }
        *information = next.clone();
        Ok(next)
    }

    // --- membership ---

    /// Returns the canonical hex of the added member
    pub fn add_member(&self, pubkey: &str) -> RelayResult<String> {
        Ok(self.members.add(pubkey)?)
    }

    pub fn remove_member(&self, pubkey: &str) -> RelayResult<bool> {
        Ok(self.members.remove(pubkey)?)
    }

    pub fn members(&self) -> Vec<String> {
        self.members.members()
    }

    /// Close every connection and stop serving
    pub async fn shutdown(self) {
        info!(addr = %self.local_addr, "relay shutting down");
        self.state.trigger_shutdown();

        if let Err(e) = self.join.await {
            error!(error = %e, "server task failed");
        }

        let registry = &self.state.registry;
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while registry.connection_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(open = registry.connection_count(), "connections still open after shutdown");
        }
        info!("relay stopped");
    }
}

fn load_information(path: &Path) -> RelayInformation {
    if !path.exists() {
        return RelayInformation::default();
    }
    let loaded = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|body| serde_json::from_str(&body).map_err(|e| e.to_string()));
    match loaded {
        Ok(information) => information,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable relay information, using defaults");
            RelayInformation::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keys;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_start_binds_ephemeral_port() {
        let relay = Relay::start(RelayConfig::for_testing()).await.unwrap();
        assert_ne!(relay.local_addr().port(), 0);
        assert!(relay.ws_url().starts_with("ws://127.0.0.1:"));
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_information_persists_across_restarts() {
        let temp_dir = TempDir::new().unwrap();
        let admin = Keys::from_secret_bytes(&[1u8; 32]).unwrap();
        let config = RelayConfig {
            data_dir: Some(temp_dir.path().to_path_buf()),
            admin_pubkey: Some(admin.pubkey().to_string()),
            ..RelayConfig::for_testing()
        };

        let relay = Relay::start(config.clone()).await.unwrap();
        let info = relay
            .set_relay_information(RelayInformationUpdate {
                name: Some("lounge".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(info.pubkey.as_deref(), Some(admin.pubkey()));
        relay.shutdown().await;

        let relay = Relay::start(config).await.unwrap();
        assert_eq!(relay.relay_information().name.as_deref(), Some("lounge"));
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_admin_operations_normalize_pubkeys() {
        let relay = Relay::start(RelayConfig::for_testing()).await.unwrap();
        let member = Keys::from_secret_bytes(&[2u8; 32]).unwrap();

        let hex = relay.add_member(&member.npub().unwrap()).unwrap();
        assert_eq!(hex, member.pubkey());
        assert_eq!(relay.members(), vec![hex.clone()]);
        assert!(relay.remove_member(&hex).unwrap());

        let policy = relay.add_block(1, &member.npub().unwrap()).unwrap();
        assert!(policy.block.contains(member.pubkey()));
        assert!(relay.delete_events_from_pubkey("not-a-key").is_err());
        relay.shutdown().await;
    }
}
