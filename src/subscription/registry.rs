//! Connection and subscription bookkeeping

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::event_store::EventStore;
use crate::protocol::RelayMessage;
use crate::types::{Event, Filter};

use super::{FanOut, ReadGate};

pub const DEFAULT_MAX_SUBSCRIPTIONS: usize = 10;

/// Frames queued for one connection's socket writer
pub type Outbound = mpsc::UnboundedSender<RelayMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("{sub_id}: only accept at most {max} subscriptions")]
    TooManySubscriptions { sub_id: String, max: usize },
    #[error("{0} is not registered")]
    UnknownConnection(ConnectionId),
}

/// One `(connection, sub_id, filter)` hit from `matches`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionMatch {
    pub connection: ConnectionId,
    pub sub_id: String,
    pub filter_index: usize,
}

struct FilterSlot {
    filter: Filter,
    sent: usize,
}

impl FilterSlot {
    fn has_capacity(&self) -> bool {
        self.filter.limit.map_or(true, |limit| self.sent < limit)
    }
}

enum Phase {
    /// Stored events not yet flushed; live hits wait here
    Backfilling { pending: Vec<(usize, Event)> },
    Live,
}

struct Subscription {
    filters: Vec<FilterSlot>,
    phase: Phase,
}

impl Subscription {
    fn new(filters: Vec<Filter>) -> Self {
        Self {
            filters: filters
                .into_iter()
                .map(|filter| FilterSlot { filter, sent: 0 })
                .collect(),
            phase: Phase::Backfilling {
                pending: Vec::new(),
            },
        }
    }

    /// Index of the first filter that matches
    fn first_match(&self, event: &Event) -> Option<usize> {
        self.filters.iter().position(|slot| slot.filter.matches(event))
    }

    /// Send through a filter slot if it has capacity left
    fn deliver(&mut self, index: usize, sub_id: &str, event: Event, outbound: &Outbound) -> bool {
        let Some(slot) = self.filters.get_mut(index) else {
            return false;
        };
        if !slot.has_capacity() {
            return false;
        }
        let frame = RelayMessage::Event {
            sub_id: sub_id.to_string(),
            event,
        };
        // A closed receiver means the socket is gone; nothing to do.
        if outbound.send(frame).is_err() {
            return false;
        }
        slot.sent += 1;
        true
    }
}

struct Connection {
    pubkey: Option<String>,
    outbound: Outbound,
    subscriptions: HashMap<String, Subscription>,
}

/// Per-relay registry of connections and their subscriptions
pub struct SubscriptionRegistry {
    connections: Mutex<HashMap<ConnectionId, Connection>>,
    max_subscriptions: usize,
    next_id: AtomicU64,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SUBSCRIPTIONS)
    }
}

impl SubscriptionRegistry {
    pub fn new(max_subscriptions: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            max_subscriptions,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn max_subscriptions(&self) -> usize {
        self.max_subscriptions
    }

    /// Register a connection with its authenticated pubkey, if any
    pub fn connect(&self, pubkey: Option<String>, outbound: Outbound) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.connections.lock().insert(
            id,
            Connection {
                pubkey,
                outbound,
                subscriptions: HashMap::new(),
            },
        );
        id
    }

    /// Drop a connection and all its subscriptions; returns how many
    pub fn disconnect(&self, connection: ConnectionId) -> usize {
        self.connections
            .lock()
            .remove(&connection)
            .map_or(0, |conn| conn.subscriptions.len())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn subscription_count(&self, connection: ConnectionId) -> usize {
        self.connections
            .lock()
            .get(&connection)
            .map_or(0, |conn| conn.subscriptions.len())
    }

    pub fn subscription_ids(&self, connection: ConnectionId) -> Vec<String> {
        let mut ids: Vec<String> = self
            .connections
            .lock()
            .get(&connection)
            .map(|conn| conn.subscriptions.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Register or fully replace a subscription.
    ///
    /// The subscription starts out backfilling: live hits are held until
    /// `backfill` flushes the stored snapshot.
    pub fn open(
        &self,
        connection: ConnectionId,
        sub_id: &str,
        filters: Vec<Filter>,
    ) -> Result<(), SubscriptionError> {
        let mut connections = self.connections.lock();
        let conn = connections
            .get_mut(&connection)
            .ok_or(SubscriptionError::UnknownConnection(connection))?;

        if !conn.subscriptions.contains_key(sub_id)
            && conn.subscriptions.len() >= self.max_subscriptions
        {
            return Err(SubscriptionError::TooManySubscriptions {
                sub_id: sub_id.to_string(),
                max: self.max_subscriptions,
            });
        }

        conn.subscriptions
            .insert(sub_id.to_string(), Subscription::new(filters));
        Ok(())
    }

    /// Remove a subscription; no-op if absent
    pub fn close(&self, connection: ConnectionId, sub_id: &str) -> bool {
        self.connections
            .lock()
            .get_mut(&connection)
            .is_some_and(|conn| conn.subscriptions.remove(sub_id).is_some())
    }

    /// First matching filter of every subscription, ignoring caps and gating
    pub fn matches(&self, event: &Event) -> Vec<SubscriptionMatch> {
        let connections = self.connections.lock();
        let mut found = Vec::new();
        for (id, conn) in connections.iter() {
            for (sub_id, sub) in &conn.subscriptions {
                if let Some(filter_index) = sub.first_match(event) {
                    found.push(SubscriptionMatch {
                        connection: *id,
                        sub_id: sub_id.clone(),
                        filter_index,
                    });
                }
            }
        }
        found
    }

    /// Stream stored events for a freshly opened subscription, then EOSE,
    /// then any live events that arrived meanwhile.
    ///
    /// Stored events are deduplicated by id across filters and dropped
    /// when `readable` rejects them. Live events already sent from the
    /// snapshot are not repeated. Returns the number of stored events sent.
    pub fn backfill(
        &self,
        connection: ConnectionId,
        sub_id: &str,
        store: &EventStore,
        readable: &mut dyn FnMut(&Event) -> bool,
    ) -> usize {
        let filters: Vec<Filter> = {
            let connections = self.connections.lock();
            match connections
                .get(&connection)
                .and_then(|conn| conn.subscriptions.get(sub_id))
            {
                Some(sub) => sub.filters.iter().map(|slot| slot.filter.clone()).collect(),
                None => return 0,
            }
        };

        let mut seen = HashSet::new();
        let mut snapshot = Vec::new();
        for filter in &filters {
            for event in store.get_by_filter(filter) {
                if seen.contains(&event.id) || !readable(&event) {
                    continue;
                }
                seen.insert(event.id.clone());
                snapshot.push(event);
            }
        }

        let mut connections = self.connections.lock();
        let Some(conn) = connections.get_mut(&connection) else {
            return 0;
        };
        let Connection {
            outbound,
            subscriptions,
            ..
        } = conn;
        let Some(sub) = subscriptions.get_mut(sub_id) else {
            return 0;
        };

        let sent = snapshot.len();
        for event in snapshot {
            let _ = outbound.send(RelayMessage::Event {
                sub_id: sub_id.to_string(),
                event,
            });
        }
        let _ = outbound.send(RelayMessage::Eose {
            sub_id: sub_id.to_string(),
        });

        let pending = match std::mem::replace(&mut sub.phase, Phase::Live) {
            Phase::Backfilling { pending } => pending,
            Phase::Live => Vec::new(),
        };
        for (index, event) in pending {
            if !seen.contains(&event.id) {
                sub.deliver(index, sub_id, event, outbound);
            }
        }

        debug!(%connection, sub_id, sent, "backfill flushed");
        sent
    }
}

impl FanOut for SubscriptionRegistry {
    fn fan_out(&self, event: &Event, gate: ReadGate<'_>) -> usize {
        let mut connections = self.connections.lock();
        let mut delivered = 0;

        for conn in connections.values_mut() {
            let Connection {
                pubkey,
                outbound,
                subscriptions,
            } = conn;
            let mut allowed = None;

            for (sub_id, sub) in subscriptions.iter_mut() {
                let Some(index) = sub.first_match(event) else {
                    continue;
                };
                if !*allowed.get_or_insert_with(|| gate(pubkey.as_deref())) {
                    continue;
                }
                match &mut sub.phase {
                    Phase::Backfilling { pending } => pending.push((index, event.clone())),
                    Phase::Live => {
                        if sub.deliver(index, sub_id, event.clone(), outbound) {
                            delivered += 1;
                        }
                    }
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KIND_METADATA;

    fn event(id: &str, kind: u16, created_at: u64) -> Event {
        Event {
            id: id.to_string(),
            pubkey: "alice".to_string(),
            created_at,
            kind,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        }
    }

    fn open_gate(_: Option<&str>) -> bool {
        true
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RelayMessage>) -> Vec<RelayMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn live(registry: &SubscriptionRegistry, conn: ConnectionId, sub_id: &str, filters: Vec<Filter>) {
        registry.open(conn, sub_id, filters).unwrap();
        registry.backfill(conn, sub_id, &EventStore::in_memory(), &mut |_| true);
    }

    #[test]
    fn test_subscription_cap() {
        let registry = SubscriptionRegistry::new(10);
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = registry.connect(None, tx);

        for i in 0..10 {
            registry.open(conn, &format!("s{}", i), vec![]).unwrap();
        }
        assert_eq!(
            registry.open(conn, "s10", vec![]),
            Err(SubscriptionError::TooManySubscriptions {
                sub_id: "s10".into(),
                max: 10
            })
        );
        // Replacing an existing id is still allowed at the cap
        registry.open(conn, "s3", vec![Filter::new()]).unwrap();
        assert_eq!(registry.subscription_count(conn), 10);
    }

    #[test]
    fn test_first_matching_filter_wins() {
        let registry = SubscriptionRegistry::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = registry.connect(None, tx);
        live(
            &registry,
            conn,
            "s1",
            vec![Filter::new().kinds([1]), Filter::new()],
        );
        drain(&mut rx);

        let hits = registry.matches(&event("a", 1, 1));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filter_index, 0);

        assert_eq!(registry.fan_out(&event("a", 1, 1), &open_gate), 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_limit_caps_live_delivery() {
        let registry = SubscriptionRegistry::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = registry.connect(None, tx);
        live(&registry, conn, "s1", vec![Filter::new().kinds([1]).limit(1)]);
        drain(&mut rx);

        assert_eq!(registry.fan_out(&event("a", 1, 1), &open_gate), 1);
        assert_eq!(registry.fan_out(&event("b", 1, 2), &open_gate), 0);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_reopen_replaces_filters_and_counts() {
        let registry = SubscriptionRegistry::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = registry.connect(None, tx);
        live(&registry, conn, "s1", vec![Filter::new().kinds([1])]);
        live(&registry, conn, "s1", vec![Filter::new().kinds([7])]);
        drain(&mut rx);

        assert_eq!(registry.fan_out(&event("a", 1, 1), &open_gate), 0);
        assert_eq!(registry.fan_out(&event("b", 7, 1), &open_gate), 1);
    }

    #[test]
    fn test_gate_filters_by_subscriber() {
        let registry = SubscriptionRegistry::default();
        let (admin_tx, mut admin_rx) = mpsc::unbounded_channel();
        let (anon_tx, mut anon_rx) = mpsc::unbounded_channel();
        let admin = registry.connect(Some("admin".into()), admin_tx);
        let anon = registry.connect(None, anon_tx);
        live(&registry, admin, "s", vec![Filter::new()]);
        live(&registry, anon, "s", vec![Filter::new()]);
        drain(&mut admin_rx);
        drain(&mut anon_rx);

        let delivered = registry.fan_out(&event("a", 1, 1), &|pk| pk == Some("admin"));
        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut admin_rx).len(), 1);
        assert!(drain(&mut anon_rx).is_empty());
    }

    #[test]
    fn test_backfill_orders_snapshot_before_live() {
        let store = EventStore::in_memory();
        store.write_regular(event("old", 1, 1)).unwrap();
        store.write_replaceable(event("meta", KIND_METADATA, 1)).unwrap();

        let registry = SubscriptionRegistry::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = registry.connect(None, tx);
        registry
            .open(conn, "s1", vec![Filter::new().kinds([1]), Filter::new()])
            .unwrap();

        // Arrives between open and backfill: held, then sent after EOSE
        let racing = event("racing", 1, 2);
        store.write_regular(racing.clone()).unwrap();
        assert_eq!(registry.fan_out(&racing, &open_gate), 0);
        let later = event("later", 1, 3);
        assert_eq!(registry.fan_out(&later, &open_gate), 0);

        let sent = registry.backfill(conn, "s1", &store, &mut |_| true);
        assert_eq!(sent, 3);

        let frames = drain(&mut rx);
        let ids: Vec<String> = frames
            .iter()
            .map(|frame| match frame {
                RelayMessage::Event { event, .. } => event.id.clone(),
                RelayMessage::Eose { .. } => "EOSE".to_string(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(ids, vec!["racing", "old", "meta", "EOSE", "later"]);
    }

    #[test]
    fn test_backfill_applies_read_gate() {
        let store = EventStore::in_memory();
        store.write_regular(event("visible", 1, 1)).unwrap();
        store.write_regular(event("hidden", 7, 1)).unwrap();

        let registry = SubscriptionRegistry::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = registry.connect(None, tx);
        registry.open(conn, "s1", vec![Filter::new()]).unwrap();
        let sent = registry.backfill(conn, "s1", &store, &mut |e| e.kind != 7);
        assert_eq!(sent, 1);
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn test_disconnect_and_closed_socket() {
        let registry = SubscriptionRegistry::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = registry.connect(None, tx);
        live(&registry, conn, "s1", vec![Filter::new()]);

        drop(rx);
        assert_eq!(registry.fan_out(&event("a", 1, 1), &open_gate), 0);

        assert!(registry.close(conn, "s1"));
        assert!(!registry.close(conn, "s1"));
        assert_eq!(registry.disconnect(conn), 0);
        assert_eq!(registry.connection_count(), 0);
        assert!(registry.open(conn, "s2", vec![]).is_err());
    }
}
