//! Realtime push bus. §4.E.
//!
//! A process-local registry mapping `userId -> connection`, built on
//! `DashMap` the way the reference ingestion server layers its `dedup` /
//! `clusters` / `known_keys` registries over one logical stream, plus a
//! secondary `user_id -> connection ids` index for fan-out.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use serde_json::{json, Value as Frame};
use tokio::sync::mpsc;
use tracing::warn;

use crate::clock::SharedClock;
use crate::models::{QueueId, UserId, VenueId};
use crate::resilience::OfflineBuffer;

pub type ConnectionId = u64;

struct Connection {
    sender: mpsc::UnboundedSender<Message>,
    authenticated_user_id: std::sync::Mutex<Option<UserId>>,
}

pub struct RealtimeBus {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    by_user: DashMap<UserId, HashSet<ConnectionId>>,
    next_id: AtomicU64,
    clock: SharedClock,
    offline_buffer: std::sync::Mutex<Option<Arc<OfflineBuffer>>>,
}

impl RealtimeBus {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            connections: DashMap::new(),
            by_user: DashMap::new(),
            next_id: AtomicU64::new(1),
            clock,
            offline_buffer: std::sync::Mutex::new(None),
        }
    }

    /// Wires the offline buffer in after both are constructed (§4.F): once
    /// set, every `authenticate` drains and replays that user's buffered
    /// frames. Optional so bus-only tests don't need a buffer.
    pub fn set_offline_buffer(&self, buffer: Arc<OfflineBuffer>) {
        *self.offline_buffer.lock().unwrap() = Some(buffer);
    }

    fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Registers a new, as-yet-unauthenticated connection and returns its id
    /// plus the channel the websocket task should forward to the socket.
    pub fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(
            id,
            Arc::new(Connection {
                sender: tx,
                authenticated_user_id: std::sync::Mutex::new(None),
            }),
        );
        (id, rx)
    }

    pub fn detach(&self, conn_id: ConnectionId) {
        if let Some((_, conn)) = self.connections.remove(&conn_id) {
            if let Some(user_id) = conn.authenticated_user_id.lock().unwrap().clone() {
                if let Some(mut set) = self.by_user.get_mut(&user_id) {
                    set.remove(&conn_id);
                }
            }
        }
    }

    /// Binds a connection to a userId after it sends an `authenticate`
    /// frame. Prior to this call the connection may only receive `connected`
    /// and `pong` frames.
    pub fn authenticate(&self, conn_id: ConnectionId, user_id: UserId) -> bool {
        let Some(conn) = self.connections.get(&conn_id) else {
            return false;
        };
        *conn.authenticated_user_id.lock().unwrap() = Some(user_id.clone());
        drop(conn);
        self.by_user.entry(user_id.clone()).or_default().insert(conn_id);
        self.flush_offline_buffer(&user_id);
        true
    }

    /// Replays every frame buffered for `user_id` while they were offline,
    /// dropping each on successful delivery; a frame that still can't be
    /// delivered (connection torn down mid-flush) goes back on the buffer
    /// rather than being lost.
    fn flush_offline_buffer(&self, user_id: &str) {
        let buffer = self.offline_buffer.lock().unwrap().clone();
        let Some(buffer) = buffer else { return };
        for buffered in buffer.drain_for_user(user_id) {
            if !self.send(user_id, buffered.frame.clone()) {
                buffer.enqueue(user_id.to_string(), buffered.frame);
            }
        }
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.by_user
            .get(user_id)
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }

    /// Sends a frame to every connection authenticated as `user_id`. Returns
    /// true if delivered to at least one connection.
    pub fn send(&self, user_id: &str, frame: Frame) -> bool {
        let Some(conn_ids) = self.by_user.get(user_id) else {
            return false;
        };
        let mut delivered = false;
        for conn_id in conn_ids.iter() {
            if let Some(conn) = self.connections.get(conn_id) {
                if conn.sender.send(Message::Text(frame.to_string())).is_ok() {
                    delivered = true;
                }
            }
        }
        delivered
    }

    pub fn broadcast(&self, frame: Frame) {
        for entry in self.connections.iter() {
            let _ = entry.value().sender.send(Message::Text(frame.to_string()));
        }
    }

    pub fn broadcast_to_venue_owner(&self, owner_user_id: &str, frame: Frame) -> bool {
        self.send(owner_user_id, frame)
    }

    /// Called by the websocket task on each inbound client frame.
    pub fn handle_client_frame(&self, conn_id: ConnectionId, raw: &str) {
        let Ok(value) = serde_json::from_str::<Frame>(raw) else {
            self.reply(conn_id, error_frame(self.now(), "invalid frame"));
            return;
        };
        match value.get("type").and_then(|t| t.as_str()) {
            Some("authenticate") => {
                let Some(user_id) = value.get("userId").and_then(|u| u.as_str()) else {
                    self.reply(conn_id, auth_error_frame(self.now(), "missing userId"));
                    return;
                };
                self.authenticate(conn_id, user_id.to_string());
                self.reply(conn_id, authenticated_frame(self.now()));
            }
            Some("ping") => self.reply(conn_id, pong_frame(self.now())),
            _ => self.reply(conn_id, error_frame(self.now(), "unknown frame type")),
        }
    }

    fn reply(&self, conn_id: ConnectionId, frame: Frame) {
        if let Some(conn) = self.connections.get(&conn_id) {
            let _ = conn.sender.send(Message::Text(frame.to_string()));
        }
    }

    pub fn hello(&self, conn_id: ConnectionId) {
        self.reply(conn_id, connected_frame(self.now()));
    }
}

pub type SharedRealtimeBus = Arc<RealtimeBus>;

// ---------------------------------------------------------------------
// Frame constructors (§6 realtime frames)
// ---------------------------------------------------------------------

pub fn connected_frame(now_ms: i64) -> Frame {
    json!({ "type": "connected", "timestamp": now_ms })
}

pub fn authenticated_frame(now_ms: i64) -> Frame {
    json!({ "type": "authenticated", "timestamp": now_ms })
}

pub fn auth_error_frame(now_ms: i64, reason: &str) -> Frame {
    json!({ "type": "auth_error", "timestamp": now_ms, "reason": reason })
}

pub fn pong_frame(now_ms: i64) -> Frame {
    json!({ "type": "pong", "timestamp": now_ms })
}

pub fn error_frame(now_ms: i64, message: &str) -> Frame {
    json!({ "type": "error", "timestamp": now_ms, "message": message })
}

pub fn queue_update_frame(now_ms: i64, venue_id: &VenueId, data: serde_json::Value) -> Frame {
    json!({ "type": "queue_update", "timestamp": now_ms, "venueId": venue_id, "data": data })
}

pub fn queue_position_update_frame(now_ms: i64, venue_id: &VenueId, queues: serde_json::Value) -> Frame {
    json!({ "type": "queue_position_update", "timestamp": now_ms, "venueId": venue_id, "queues": queues })
}

/// Operator-facing frame dispatched on every check-in attempt (§4.K): both
/// the auto-approved and requires-review paths notify the venue owner, with
/// `verified`/`distance`/`requiresConfirmation` distinguishing the two.
#[allow(clippy::too_many_arguments)]
pub fn customer_arrived_frame(
    now_ms: i64,
    venue_id: &VenueId,
    queue_id: &QueueId,
    user_id: &UserId,
    user_name: &str,
    user_phone: Option<&str>,
    verified: bool,
    distance_meters: Option<u32>,
    requires_confirmation: bool,
) -> Frame {
    json!({
        "type": "customer_arrived",
        "timestamp": now_ms,
        "venueId": venue_id,
        "queueId": queue_id,
        "userId": user_id,
        "userName": user_name,
        "userPhone": user_phone,
        "verified": verified,
        "distance": distance_meters,
        "requiresConfirmation": requires_confirmation,
    })
}

/// Drives the per-connection websocket loop: forwards outbound frames queued
/// by the bus to the socket, and routes inbound client frames back into the
/// bus. Used by the `/ws` handler in `boundary::handlers`.
pub async fn run_connection(bus: SharedRealtimeBus, socket: WebSocket) {
    let (conn_id, mut outbound_rx) = bus.register();
    bus.hello(conn_id);

    let (mut sink, mut stream) = futures::StreamExt::split(socket);
    use futures::SinkExt;

    let forward = async {
        while let Some(msg) = outbound_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    };

    let receive = async {
        while let Some(Ok(msg)) = futures::StreamExt::next(&mut stream).await {
            if let Message::Text(text) = msg {
                bus.handle_client_frame(conn_id, &text);
            }
        }
    };

    tokio::select! {
        _ = forward => {}
        _ = receive => {}
    }

    bus.detach(conn_id);
    warn!(conn_id, "realtime_connection_closed");
}
