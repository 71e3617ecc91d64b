//! Live connection tracking: per-user caps, per-room fan-out, rate limiting.

use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

use axum::extract::ws::Message;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    config::{MAX_CONNECTIONS_PER_USER, RATE_LIMIT_MAX, RATE_LIMIT_WINDOW},
    dto::ws::ServerMessage,
};

pub type ConnectionId = Uuid;

/// Raised when a user already holds the maximum number of live sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("connection limit reached")]
pub struct ConnectionLimitExceeded;

struct RegisteredConnection {
    user_id: i64,
    tx: mpsc::UnboundedSender<Message>,
    room_id: Option<String>,
}

/// What a detached connection was holding, so the caller can unwind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detached {
    pub user_id: i64,
    pub room_id: Option<String>,
}

/// Registry of live client sockets and the per-room fan-out sets.
///
/// Socket lifetime is owned here; room membership (the durable kind) is
/// owned by the membership store and only mirrored as a fan-out set.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, RegisteredConnection>,
    per_user: DashMap<i64, usize>,
    fanout: RwLock<HashMap<String, HashSet<ConnectionId>>>,
    limiter: RateLimiter,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            per_user: DashMap::new(),
            fanout: RwLock::new(HashMap::new()),
            limiter: RateLimiter::new(RATE_LIMIT_MAX, RATE_LIMIT_WINDOW),
        }
    }

    /// Register a freshly authenticated socket.
    ///
    /// Fails when the user already holds `MAX_CONNECTIONS_PER_USER` sockets.
    pub fn attach(
        &self,
        conn_id: ConnectionId,
        user_id: i64,
        tx: mpsc::UnboundedSender<Message>,
    ) -> Result<(), ConnectionLimitExceeded> {
        {
            let mut count = self.per_user.entry(user_id).or_insert(0);
            if *count >= MAX_CONNECTIONS_PER_USER {
                return Err(ConnectionLimitExceeded);
            }
            *count += 1;
        }

        self.connections.insert(
            conn_id,
            RegisteredConnection {
                user_id,
                tx,
                room_id: None,
            },
        );
        Ok(())
    }

    /// Remove a socket. Idempotent; reports what the socket was holding.
    pub async fn detach(&self, conn_id: ConnectionId) -> Option<Detached> {
        let (_, conn) = self.connections.remove(&conn_id)?;

        if let Some(mut count) = self.per_user.get_mut(&conn.user_id) {
            *count = count.saturating_sub(1);
        }
        self.per_user.remove_if(&conn.user_id, |_, count| *count == 0);
        self.limiter.forget(conn_id);

        if let Some(room_id) = &conn.room_id {
            let mut fanout = self.fanout.write().await;
            if let Some(set) = fanout.get_mut(room_id) {
                set.remove(&conn_id);
                if set.is_empty() {
                    fanout.remove(room_id);
                }
            }
        }

        Some(Detached {
            user_id: conn.user_id,
            room_id: conn.room_id,
        })
    }

    /// Attach a connection to a room's fan-out set, replacing any previous seat.
    pub async fn seat(&self, conn_id: ConnectionId, room_id: &str) {
        let previous = {
            let Some(mut conn) = self.connections.get_mut(&conn_id) else {
                return;
            };
            conn.room_id.replace(room_id.to_string())
        };

        let mut fanout = self.fanout.write().await;
        if let Some(previous) = previous {
            if let Some(set) = fanout.get_mut(&previous) {
                set.remove(&conn_id);
                if set.is_empty() {
                    fanout.remove(&previous);
                }
            }
        }
        fanout.entry(room_id.to_string()).or_default().insert(conn_id);
    }

    /// Remove a connection from `room_id`'s fan-out set.
    ///
    /// No-op when the connection is seated elsewhere (or nowhere).
    pub async fn unseat(&self, conn_id: ConnectionId, room_id: &str) {
        let cleared = {
            let Some(mut conn) = self.connections.get_mut(&conn_id) else {
                return;
            };
            if conn.room_id.as_deref() == Some(room_id) {
                conn.room_id = None;
                true
            } else {
                false
            }
        };

        if cleared {
            let mut fanout = self.fanout.write().await;
            if let Some(set) = fanout.get_mut(room_id) {
                set.remove(&conn_id);
                if set.is_empty() {
                    fanout.remove(room_id);
                }
            }
        }
    }

    /// Send a frame to a single connection.
    pub fn send(&self, conn_id: ConnectionId, message: &ServerMessage) -> bool {
        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to serialize outbound frame");
                return false;
            }
        };

        match self.connections.get(&conn_id) {
            Some(conn) => conn.tx.send(Message::Text(payload.into())).is_ok(),
            None => false,
        }
    }

    /// Serialize once and push to every connection seated in `room_id`.
    ///
    /// Connections whose writer has gone away are pruned from the registry;
    /// their durable membership is unwound by the socket task when it exits.
    pub async fn broadcast(&self, room_id: &str, message: &ServerMessage) {
        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to serialize broadcast frame");
                return;
            }
        };

        let targets: Vec<ConnectionId> = {
            let fanout = self.fanout.read().await;
            match fanout.get(room_id) {
                Some(set) => set.iter().copied().collect(),
                None => return,
            }
        };

        let mut broken = Vec::new();
        for conn_id in targets {
            let delivered = match self.connections.get(&conn_id) {
                Some(conn) => conn.tx.send(Message::Text(payload.clone().into())).is_ok(),
                None => false,
            };
            if !delivered {
                broken.push(conn_id);
            }
        }

        for conn_id in broken {
            debug!(%conn_id, room_id, "pruning broken connection during broadcast");
            self.detach(conn_id).await;
        }
    }

    /// Whether the given frame is within the connection's rate budget.
    ///
    /// An overage drops the frame and reports it; the connection stays open.
    pub fn allow_frame(&self, conn_id: ConnectionId) -> bool {
        self.limiter.allow(conn_id, Instant::now())
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of live connections held by one user.
    pub fn connections_for_user(&self, user_id: i64) -> usize {
        self.per_user.get(&user_id).map(|count| *count).unwrap_or(0)
    }

    /// Push a close frame to every live connection (graceful shutdown).
    pub fn close_all(&self, close: Message) {
        for conn in self.connections.iter() {
            let _ = conn.tx.send(close.clone());
        }
    }

    /// Drop rate-limit windows that have been idle past their horizon.
    pub fn sweep_rate_windows(&self) {
        self.limiter.sweep(Instant::now());
    }
}

/// Sliding-window frame counter, one window per connection.
struct RateLimiter {
    windows: DashMap<ConnectionId, Vec<Instant>>,
    max_frames: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_frames: usize, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_frames,
            window,
        }
    }

    fn allow(&self, conn_id: ConnectionId, now: Instant) -> bool {
        let mut times = self.windows.entry(conn_id).or_default();
        times.retain(|&at| now.duration_since(at) < self.window);
        if times.len() >= self.max_frames {
            return false;
        }
        times.push(now);
        true
    }

    fn forget(&self, conn_id: ConnectionId) {
        self.windows.remove(&conn_id);
    }

    /// Remove windows whose newest entry is older than window + 60 s.
    fn sweep(&self, now: Instant) {
        let horizon = self.window + Duration::from_secs(60);
        self.windows.retain(|_, times| {
            times
                .last()
                .is_some_and(|&last| now.duration_since(last) < horizon)
        });
    }
}
