//! Shared relay state handed to every connection

use std::sync::Arc;

use tokio::sync::watch;

use crate::crypto::{EventVerifier, SchnorrVerifier};
use crate::event_store::EventStore;
use crate::membership::{MemberList, MembershipCheck};
use crate::policy::PolicyEngine;
use crate::subscription::SubscriptionRegistry;
use crate::types::{DefaultPolicy, Event, Policy};

/// Everything a connection handler needs, owned by one running relay
pub struct AppState {
    pub store: Arc<EventStore>,
    pub policies: Arc<PolicyEngine>,
    pub registry: Arc<SubscriptionRegistry>,
    pub verifier: Arc<dyn EventVerifier>,
    pub members: Arc<dyn MembershipCheck>,
    /// Always authorized for read and write, regardless of policy
    pub admin: Option<String>,
    pub auth_required: bool,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    pub fn new(
        store: Arc<EventStore>,
        policies: Arc<PolicyEngine>,
        registry: Arc<SubscriptionRegistry>,
        verifier: Arc<dyn EventVerifier>,
        members: Arc<dyn MembershipCheck>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            policies,
            registry,
            verifier,
            members,
            admin: None,
            auth_required: false,
            shutdown,
        }
    }

    /// In-memory state with an open default policy
    pub fn for_testing() -> Self {
        Self::new(
            Arc::new(EventStore::in_memory()),
            Arc::new(PolicyEngine::in_memory(DefaultPolicy::All)),
            Arc::new(SubscriptionRegistry::default()),
            Arc::new(SchnorrVerifier::new()),
            Arc::new(MemberList::new(None)),
        )
    }

    pub fn with_admin(mut self, admin: Option<String>) -> Self {
        self.admin = admin;
        self
    }

    pub fn require_auth(mut self, required: bool) -> Self {
        self.auth_required = required;
        self
    }

    pub fn is_admin(&self, pubkey: &str) -> bool {
        self.admin.as_deref() == Some(pubkey)
    }

    /// Read gating for one event under its resolved policy
    pub fn is_readable(&self, policy: &Policy, event: &Event, reader: Option<&str>) -> bool {
        policy.permits_read(&event.pubkey)
            || self.is_admin(&event.pubkey)
            || reader.is_some_and(|pk| self.is_admin(pk))
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Ask every connection to close and the server to stop accepting
    pub fn trigger_shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}
