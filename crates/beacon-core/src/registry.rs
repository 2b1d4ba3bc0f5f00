//! Connection registry for Beacon.
//!
//! Maps a user identity to its single live connection. The registry is
//! last-connect-wins: registering a user who already has an entry replaces
//! it without closing the superseded transport, and cleanup for the old
//! transport is rejected by connection id when it finally closes.

use beacon_protocol::{ServerEvent, UserId};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::debug;

/// Atomic counter backing connection id assignment.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for one transport session.
///
/// Distinguishes a superseded connection from its replacement for the same
/// user, which is what keeps reconnect cleanup races harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Assign the next connection id.
    #[must_use]
    pub fn next() -> Self {
        Self(CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Outbound handle of a live connection.
///
/// Sends are non-blocking; the WebSocket writer on the other side drains
/// the queue, so a slow peer never stalls a broadcast loop.
pub type EventSender = mpsc::UnboundedSender<Arc<ServerEvent>>;

/// A registered live connection.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Transport session id.
    pub id: ConnectionId,
    /// Owning user identity.
    pub user_id: UserId,
    /// Outbound event queue for this transport.
    pub sender: EventSender,
    /// Unix-ms timestamp of registration.
    pub connected_at: u64,
}

impl Connection {
    /// Create a connection record with a fresh id.
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, sender: EventSender) -> Self {
        let connected_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;

        Self {
            id: ConnectionId::next(),
            user_id: user_id.into(),
            sender,
            connected_at,
        }
    }
}

/// Registry of live connections, keyed by user identity.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<UserId, Connection>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of online users.
    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Check whether a user has a live connection.
    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.connections.contains_key(user_id)
    }

    /// Register a connection, replacing any prior entry for the user.
    ///
    /// Returns the replaced connection, if any. The replaced transport is
    /// not closed here; its own close path is rejected by `unregister`.
    pub fn register(&self, connection: Connection) -> Option<Connection> {
        let replaced = self
            .connections
            .insert(connection.user_id.clone(), connection);
        if let Some(old) = &replaced {
            debug!(user = %old.user_id, connection = %old.id, "Connection superseded");
        }
        replaced
    }

    /// Remove a user's entry if it still belongs to the given connection.
    ///
    /// Returns `true` if an entry was removed. A mismatched connection id
    /// means the user reconnected; the stale cleanup is a no-op.
    pub fn unregister(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        let removed = self
            .connections
            .remove_if(user_id, |_, conn| conn.id == connection_id)
            .is_some();
        if removed {
            debug!(user = %user_id, connection = %connection_id, "Connection unregistered");
        }
        removed
    }

    /// Outbound sender for a user, if online.
    #[must_use]
    pub fn sender(&self, user_id: &str) -> Option<EventSender> {
        self.connections.get(user_id).map(|c| c.sender.clone())
    }

    /// Snapshot of currently-online user ids.
    #[must_use]
    pub fn online_user_ids(&self) -> Vec<UserId> {
        self.connections.iter().map(|c| c.key().clone()).collect()
    }

    /// Snapshot of every outbound sender, for broadcast-to-all.
    #[must_use]
    pub fn senders(&self) -> Vec<EventSender> {
        self.connections.iter().map(|c| c.sender.clone()).collect()
    }
}
