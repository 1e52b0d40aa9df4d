//! WebSocket connection handler
//!
//! Each socket runs one loop: queued outbound frames, inbound frames and
//! the shutdown signal are multiplexed with `tokio::select!`. Inbound
//! frames are handled to completion one at a time on the blocking pool,
//! and every reply goes through the connection's outbound queue, so
//! replies keep their order and a send to a dead socket is a no-op.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::event_store::WriteOutcome;
use crate::protocol::{ClientMessage, ProtocolError, RelayMessage};
use crate::subscription::{ConnectionId, FanOut, Outbound, SubscriptionError};
use crate::types::{Event, Filter, KindClass, Policy};

use super::auth::{authenticate, AuthError, AUTH_CLOSE_CODE};
use super::state::AppState;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Base64-encoded signed event
    pub auth: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: Option<WebSocketUpgrade>,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(ws) = ws else {
        return (StatusCode::NOT_IMPLEMENTED, "websocket upgrade required").into_response();
    };
    if state.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "relay shutting down").into_response();
    }

    let identity = if state.auth_required {
        authenticate(params.auth.as_deref(), &*state.verifier, &*state.members).map(Some)
    } else {
        // Optional token: identifies the reader, never blocks the connection
        Ok(params.auth.as_deref().and_then(|token| {
            authenticate(Some(token), &*state.verifier, &*state.members)
                .map_err(|e| debug!(error = %e, "ignoring optional auth token"))
                .ok()
        }))
    };

    ws.on_upgrade(move |socket| async move {
        match identity {
            Ok(pubkey) => handle_socket(socket, state, pubkey).await,
            Err(e) => reject(socket, e).await,
        }
    })
}

/// Close before the connection is ever opened
async fn reject(mut socket: WebSocket, reason: AuthError) {
    warn!(reason = %reason, "connection rejected");
    let frame = CloseFrame {
        code: AUTH_CLOSE_CODE,
        reason: reason.to_string().into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

/// One open connection
#[derive(Clone)]
struct Session {
    id: ConnectionId,
    pubkey: Option<String>,
    outbound: Outbound,
}

impl Session {
    fn send(&self, message: RelayMessage) {
        // Receiver gone means the socket closed; drop silently.
        let _ = self.outbound.send(message);
    }
}

/// Handle an individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, pubkey: Option<String>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut shutdown = state.shutdown_signal();

    let session = Session {
        id: state.registry.connect(pubkey.clone(), tx.clone()),
        pubkey,
        outbound: tx,
    };
    info!(conn = %session.id, pubkey = ?session.pubkey, "connection opened");

    loop {
        tokio::select! {
            biased;

            Some(frame) = rx.recv() => {
                match frame.to_json() {
                    Ok(json) => {
                        if sink.send(Message::Text(json)).await.is_err() {
                            break; // Client disconnected
                        }
                    }
                    Err(e) => error!(conn = %session.id, error = %e, "failed to encode frame"),
                }
            }

            // The borrow guard from `wait_for` must not outlive the branch future
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                let frame = CloseFrame {
                    code: close_code::AWAY,
                    reason: "relay shutting down".into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            }

            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        // Store writes fsync under a lock; keep them off the async workers
                        let (state, session) = (state.clone(), session.clone());
                        let handled =
                            tokio::task::spawn_blocking(move || handle_text(&state, &session, &text))
                                .await;
                        if let Err(e) = handled {
                            error!(error = %e, "frame handler failed");
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(conn = %session.id, "ignoring binary frame");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Ping/pong are answered by the transport
                    Some(Err(e)) => {
                        debug!(conn = %session.id, error = %e, "socket error");
                        break;
                    }
                }
            }
        }
    }

    let removed = state.registry.disconnect(session.id);
    info!(conn = %session.id, subscriptions = removed, "connection closed");
}

/// Dispatch one text frame
fn handle_text(state: &AppState, session: &Session, text: &str) {
    match ClientMessage::parse(text) {
        Ok(ClientMessage::Event(event)) => publish(state, session, event, state.registry.as_ref()),
        Ok(ClientMessage::Req { sub_id, filters }) => subscribe(state, session, &sub_id, filters),
        Ok(ClientMessage::Close { sub_id }) => {
            let closed = state.registry.close(session.id, &sub_id);
            debug!(conn = %session.id, sub_id = %sub_id, closed, "subscription closed");
        }
        Err(ProtocolError::UnknownCommand(command)) => {
            info!(conn = %session.id, command = %command, "ignoring unsupported command");
        }
        Err(e @ ProtocolError::Malformed { .. }) => {
            warn!(conn = %session.id, error = %e, "rejecting malformed command");
            session.send(RelayMessage::notice(e.to_string()));
        }
        Err(e) => warn!(conn = %session.id, error = %e, "dropping malformed frame"),
    }
}

/// `EVENT`: verify, authorize, store, acknowledge, fan out
fn publish(state: &AppState, session: &Session, event: Event, fanout: &dyn FanOut) {
    if state.store.contains(&event.id) {
        debug!(conn = %session.id, id = %event.id, "event already accepted");
        return;
    }

    if !state.verifier.verify(&event) {
        session.send(RelayMessage::ok(&event.id, false, "invalid event"));
        return;
    }

    let policy = state.policies.resolve(event.kind);
    let author_is_admin = state.is_admin(&event.pubkey);
    if !author_is_admin {
        if let Err(denied) = policy.check_write(&event.pubkey) {
            info!(
                conn = %session.id,
                id = %event.id,
                kind = event.kind,
                reason = %denied,
                "publish rejected"
            );
            session.send(RelayMessage::ok(&event.id, false, denied.to_string()));
            return;
        }
    }

    let class = event.class();
    if class == KindClass::Deletion {
        delete_targets(state, &event);
    }

    let written = match class {
        KindClass::Replaceable => state.store.write_replaceable(event.clone()),
        KindClass::Regular | KindClass::Deletion => state.store.write_regular(event.clone()),
    };

    match written {
        Ok(WriteOutcome::Duplicate) => {
            debug!(conn = %session.id, id = %event.id, "event accepted concurrently");
        }
        Ok(outcome) => {
            session.send(RelayMessage::ok(&event.id, true, ""));
            if outcome.is_stored() {
                let readable = policy.permits_read(&event.pubkey) || author_is_admin;
                let delivered = fanout.fan_out(&event, &|reader| {
                    readable || reader.is_some_and(|pk| state.is_admin(pk))
                });
                debug!(id = %event.id, delivered, "event fanned out");
            }
        }
        Err(e) => {
            error!(conn = %session.id, id = %event.id, error = %e, "failed to store event");
            session.send(RelayMessage::ok(&event.id, false, e.to_string()));
        }
    }
}

/// Remove every id referenced by a deletion request.
///
/// Ownership of the target is not checked; a mismatch is only logged.
fn delete_targets(state: &AppState, request: &Event) {
    for target in request.referenced_ids() {
        if let Some(existing) = state.store.get_by_id(&target) {
            if existing.pubkey != request.pubkey {
                warn!(
                    target = %target,
                    owner = %existing.pubkey,
                    requester = %request.pubkey,
                    "deleting an event owned by another pubkey"
                );
            }
        }
        match state.store.delete(&target) {
            Ok(removed) => debug!(target = %target, removed, "deletion processed"),
            Err(e) => error!(target = %target, error = %e, "failed to delete event"),
        }
    }
}

/// `REQ`: register, backfill, EOSE
fn subscribe(state: &AppState, session: &Session, sub_id: &str, filters: Vec<Filter>) {
    match state.registry.open(session.id, sub_id, filters) {
        Ok(()) => {}
        Err(e @ SubscriptionError::TooManySubscriptions { .. }) => {
            info!(conn = %session.id, sub_id, "subscription limit reached");
            session.send(RelayMessage::notice(e.to_string()));
            return;
        }
        Err(e) => {
            warn!(conn = %session.id, sub_id, error = %e, "cannot open subscription");
            return;
        }
    }

    let reader = session.pubkey.as_deref();
    let mut policies: HashMap<u16, Policy> = HashMap::new();
    let mut readable = |event: &Event| {
        let policy = policies
            .entry(event.kind)
            .or_insert_with(|| state.policies.resolve(event.kind));
        state.is_readable(policy, event, reader)
    };

    let sent = state
        .registry
        .backfill(session.id, sub_id, &state.store, &mut readable);
    debug!(conn = %session.id, sub_id, sent, "subscription opened");
}
