//! The presence hub for Beacon.
//!
//! `PresenceHub` is the connection-lifecycle state machine: it owns the
//! connection registry, the room map, and the typing tracker, mutates them
//! in response to client events, and pushes the resulting notifications to
//! the affected connections. It is an explicitly constructed instance with
//! no global state, so tests build as many independent hubs as they need.

use crate::registry::{Connection, ConnectionId, ConnectionRegistry, EventSender};
use crate::room::{validate_room_id, Room, RoomEvent};
use crate::typing::TypingTracker;
use beacon_protocol::{RoomId, ServerEvent, UserId, UserSnapshot};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Hub errors.
///
/// The session loop treats all of these as warn-and-drop: live events are
/// fire-and-forget, so a rejected event never terminates a connection.
#[derive(Debug, Error)]
pub enum HubError {
    /// Connect handshake carried no user identity.
    #[error("Missing user identity")]
    MissingIdentity,

    /// Invalid room id.
    #[error("Invalid room id: {0}")]
    InvalidRoom(&'static str),

    /// Event from a user with no registered connection.
    #[error("User not connected: {0}")]
    NotConnected(String),

    /// Already subscribed to the room.
    #[error("Already joined room: {0}")]
    AlreadyJoined(String),

    /// Maximum room count reached.
    #[error("Maximum rooms reached")]
    MaxRoomsReached,

    /// Maximum rooms per connection reached.
    #[error("Maximum rooms per connection reached")]
    MaxRoomsPerConnection,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of live rooms.
    pub max_rooms: usize,
    /// Maximum rooms a single connection may subscribe to.
    pub max_rooms_per_connection: usize,
    /// Per-room broadcast group capacity.
    pub room_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_rooms: 10_000,
            max_rooms_per_connection: 100,
            room_capacity: 1024,
        }
    }
}

/// The central presence hub.
pub struct PresenceHub {
    /// Live connections keyed by user.
    registry: ConnectionRegistry,
    /// Rooms indexed by id.
    rooms: DashMap<RoomId, Room>,
    /// Reverse index: user to the rooms they are subscribed to.
    memberships: DashMap<UserId, DashSet<RoomId>>,
    /// Typing state, keyed by room.
    typing: TypingTracker,
    /// Configuration.
    config: HubConfig,
}

impl PresenceHub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating presence hub with config: {:?}", config);
        Self {
            registry: ConnectionRegistry::new(),
            rooms: DashMap::new(),
            memberships: DashMap::new(),
            typing: TypingTracker::new(),
            config,
        }
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            online_users: self.registry.count(),
            rooms: self.rooms.len(),
            live_memberships: self.memberships.iter().map(|m| m.len()).sum(),
            typing_rooms: self.typing.room_count(),
        }
    }

    // --- connection lifecycle ---

    /// Register a new live connection for a user.
    ///
    /// Last-connect-wins: an existing entry for the same identity is
    /// replaced without closing the old transport. Broadcasts the updated
    /// online-user snapshot to every connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the user identity is empty; callers drop the
    /// connection silently in that case, matching the handshake contract.
    pub fn connect(&self, user_id: &str, sender: EventSender) -> Result<ConnectionId, HubError> {
        if user_id.is_empty() {
            return Err(HubError::MissingIdentity);
        }

        let connection = Connection::new(user_id, sender);
        let connection_id = connection.id;
        self.registry.register(connection);

        info!(user = %user_id, connection = %connection_id, "User connected");
        self.broadcast_online_users();

        Ok(connection_id)
    }

    /// Tear down a connection and broadcast the resulting state changes.
    ///
    /// Cleanup runs only if `connection_id` is still the registered
    /// connection for the user: a stale close (the user already
    /// reconnected, or logout already cleaned up) is a complete no-op.
    pub fn disconnect(&self, user_id: &str, connection_id: ConnectionId) {
        if !self.registry.unregister(user_id, connection_id) {
            debug!(user = %user_id, connection = %connection_id, "Stale disconnect, cleanup skipped");
            return;
        }

        self.broadcast_online_users();

        for (room_id, remaining) in self.drain_memberships(user_id) {
            if !remaining.is_empty() {
                self.send_to_room(&room_id, ServerEvent::room_members(room_id.as_str(), remaining));
            }
        }

        for room_id in self.typing.clear_user_everywhere(user_id) {
            let typing = self.typing.typing_users(&room_id);
            self.send_to_room(&room_id, ServerEvent::user_typing(room_id.as_str(), typing));
        }

        info!(user = %user_id, connection = %connection_id, "User disconnected");
    }

    /// Client-initiated logout.
    ///
    /// Identical cleanup to [`disconnect`](Self::disconnect), run before the
    /// caller closes the transport; the transport-close path then finds
    /// nothing left to clean up.
    pub fn logout(&self, user_id: &str, connection_id: ConnectionId) {
        debug!(user = %user_id, connection = %connection_id, "Logout requested");
        self.disconnect(user_id, connection_id);
    }

    // --- room membership ---

    /// Subscribe a user to a room's live events.
    ///
    /// Creates the room on first join, broadcasts the updated membership to
    /// the room, clears any leftover typing entry for the joiner, and
    /// broadcasts the resulting typing list. Returns the receiver for the
    /// room's broadcast group; it observes every broadcast triggered by
    /// this join.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid room ids, unregistered users, double
    /// joins, or exceeded limits.
    pub fn join_room(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> Result<broadcast::Receiver<RoomEvent>, HubError> {
        validate_room_id(room_id).map_err(HubError::InvalidRoom)?;

        if !self.registry.is_online(user_id) {
            return Err(HubError::NotConnected(user_id.to_string()));
        }

        if let Some(user_rooms) = self.memberships.get(user_id) {
            if user_rooms.contains(room_id) {
                return Err(HubError::AlreadyJoined(room_id.to_string()));
            }
            if user_rooms.len() >= self.config.max_rooms_per_connection {
                return Err(HubError::MaxRoomsPerConnection);
            }
        }
        if !self.rooms.contains_key(room_id) && self.rooms.len() >= self.config.max_rooms {
            return Err(HubError::MaxRoomsReached);
        }

        let (receiver, members) = {
            let mut room = self.rooms.entry(room_id.to_string()).or_insert_with(|| {
                debug!(room = %room_id, "Creating room");
                Room::with_capacity(room_id, self.config.room_capacity)
            });
            let receiver = room.subscribe(user_id);
            (receiver, room.members())
        };
        self.memberships
            .entry(user_id.to_string())
            .or_default()
            .insert(room_id.to_string());

        debug!(room = %room_id, user = %user_id, members = members.len(), "Joined room");

        self.send_to_room(room_id, ServerEvent::room_members(room_id, members));

        // Defensive reset: a joining user cannot already be typing here
        self.typing.clear_typing(room_id, user_id);
        let typing = self.typing.typing_users(room_id);
        self.send_to_room(room_id, ServerEvent::user_typing(room_id, typing));

        Ok(receiver)
    }

    /// Unsubscribe a user from a room.
    ///
    /// Broadcasts the updated membership when members remain (an emptied
    /// room is deleted instead), and the updated typing list when the
    /// user's entry was actually cleared. Leaving a room never joined is a
    /// no-op; returns whether the user was a member.
    pub fn leave_room(&self, user_id: &str, room_id: &str) -> bool {
        let was_member = self
            .memberships
            .get(user_id)
            .map(|rooms| rooms.remove(room_id).is_some())
            .unwrap_or(false);
        if !was_member {
            trace!(room = %room_id, user = %user_id, "Leave for a room not joined");
            return false;
        }
        self.memberships.remove_if(user_id, |_, rooms| rooms.is_empty());

        if let Some(remaining) = self.remove_from_room(user_id, room_id) {
            if !remaining.is_empty() {
                self.send_to_room(room_id, ServerEvent::room_members(room_id, remaining));
            }
        }

        if self.typing.clear_typing(room_id, user_id) {
            let typing = self.typing.typing_users(room_id);
            self.send_to_room(room_id, ServerEvent::user_typing(room_id, typing));
        }

        debug!(room = %room_id, user = %user_id, "Left room");
        true
    }

    /// Live membership snapshot for a room (empty if absent).
    #[must_use]
    pub fn members(&self, room_id: &str) -> Vec<UserId> {
        self.rooms
            .get(room_id)
            .map(|room| room.members())
            .unwrap_or_default()
    }

    /// Check if a room currently exists.
    #[must_use]
    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Snapshot of currently-online user ids.
    #[must_use]
    pub fn online_user_ids(&self) -> Vec<UserId> {
        self.registry.online_user_ids()
    }

    // --- typing state ---

    /// Apply a typing start/stop and broadcast the room's full typing list.
    pub fn typing_update(&self, room_id: &str, user: UserSnapshot, is_typing: bool) {
        if is_typing {
            self.typing.set_typing(room_id, user);
        } else {
            self.typing.clear_typing(room_id, &user.id);
        }

        let typing = self.typing.typing_users(room_id);
        self.send_to_room(room_id, ServerEvent::user_typing(room_id, typing));
    }

    /// Relay a typing delta to the room, excluding the sender.
    ///
    /// The delta channel never touches the typing tracker; the two typing
    /// event channels stay independent.
    pub fn room_typing_delta(&self, room_id: &str, user_id: &str, is_typing: bool) -> usize {
        self.publish_room(
            room_id,
            Arc::new(ServerEvent::room_user_typing(room_id, user_id, is_typing)),
            Some(user_id.to_string()),
        )
    }

    /// Users currently typing in a room.
    #[must_use]
    pub fn typing_users(&self, room_id: &str) -> Vec<UserSnapshot> {
        self.typing.typing_users(room_id)
    }

    /// Expire typing entries with no refresh inside `timeout`, broadcasting
    /// updated lists to the affected rooms. Returns the number of rooms
    /// updated.
    pub fn prune_stale_typing(&self, timeout: Duration) -> usize {
        let affected = self.typing.prune_stale(timeout);
        for room_id in &affected {
            let typing = self.typing.typing_users(room_id);
            self.send_to_room(room_id, ServerEvent::user_typing(room_id.as_str(), typing));
        }
        affected.len()
    }

    // --- delivery interface ---

    /// Deliver an event to a single user. Best-effort: returns `false`
    /// without error when the user is offline.
    pub fn send_to_user(&self, user_id: &str, event: ServerEvent) -> bool {
        let Some(sender) = self.registry.sender(user_id) else {
            trace!(user = %user_id, event = event.kind(), "Recipient offline, dropping event");
            return false;
        };
        sender.send(Arc::new(event)).is_ok()
    }

    /// Deliver an event to every connection subscribed to a room.
    ///
    /// Returns the number of subscribed receivers. Delivery goes through
    /// the room's broadcast group, not the membership mirror.
    pub fn send_to_room(&self, room_id: &str, event: ServerEvent) -> usize {
        self.publish_room(room_id, Arc::new(event), None)
    }

    /// Deliver an event to a room, excluding one user's connection.
    pub fn send_to_room_except(&self, room_id: &str, except_user: &str, event: ServerEvent) -> usize {
        self.publish_room(room_id, Arc::new(event), Some(except_user.to_string()))
    }

    /// Deliver an event to every live connection.
    pub fn broadcast_all(&self, event: ServerEvent) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        for sender in self.registry.senders() {
            if sender.send(Arc::clone(&event)).is_ok() {
                delivered += 1;
            }
        }
        trace!(event = event.kind(), recipients = delivered, "Broadcast to all");
        delivered
    }

    // --- internals ---

    fn broadcast_online_users(&self) {
        self.broadcast_all(ServerEvent::online_users(self.registry.online_user_ids()));
    }

    fn publish_room(
        &self,
        room_id: &str,
        event: Arc<ServerEvent>,
        exclude: Option<UserId>,
    ) -> usize {
        if let Some(room) = self.rooms.get(room_id) {
            room.publish(event, exclude)
        } else {
            trace!(room = %room_id, "Publish to unknown room");
            0
        }
    }

    /// Remove a user from a room, deleting the room when it drains.
    ///
    /// Returns the remaining membership, or `None` if the user was not
    /// subscribed.
    fn remove_from_room(&self, user_id: &str, room_id: &str) -> Option<Vec<UserId>> {
        let mut room = self.rooms.get_mut(room_id)?;
        if !room.unsubscribe(user_id) {
            return None;
        }
        let remaining = room.members();
        let emptied = room.is_empty();
        drop(room);

        if emptied {
            self.rooms.remove_if(room_id, |_, room| room.is_empty());
            debug!(room = %room_id, "Deleted empty room");
        }
        Some(remaining)
    }

    /// Remove a user from every room they are subscribed to.
    ///
    /// Returns one `(room, remaining members)` pair per affected room so
    /// the caller broadcasts exactly once per room.
    fn drain_memberships(&self, user_id: &str) -> Vec<(RoomId, Vec<UserId>)> {
        let Some((_, rooms)) = self.memberships.remove(user_id) else {
            return Vec::new();
        };

        let mut affected = Vec::new();
        for room_id in rooms {
            if let Some(remaining) = self.remove_from_room(user_id, &room_id) {
                affected.push((room_id, remaining));
            }
        }
        affected
    }
}

impl Default for PresenceHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Hub statistics.
#[derive(Debug, Clone)]
pub struct HubStats {
    /// Users with a live connection.
    pub online_users: usize,
    /// Rooms with at least one live member.
    pub rooms: usize,
    /// Total live room subscriptions.
    pub live_memberships: usize,
    /// Rooms with at least one typing user.
    pub typing_rooms: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    type EventReceiver = mpsc::UnboundedReceiver<Arc<ServerEvent>>;

    fn connect(hub: &PresenceHub, user: &str) -> (ConnectionId, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = hub.connect(user, tx).unwrap();
        (id, rx)
    }

    fn drain(rx: &mut EventReceiver) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((*event).clone());
        }
        events
    }

    fn drain_room(rx: &mut broadcast::Receiver<RoomEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(room_event) = rx.try_recv() {
            events.push((*room_event.event).clone());
        }
        events
    }

    fn sorted(mut ids: Vec<UserId>) -> Vec<UserId> {
        ids.sort();
        ids
    }

    fn snapshot(id: &str) -> UserSnapshot {
        UserSnapshot::new(id, format!("User {id}"))
    }

    #[test]
    fn test_connect_rejects_empty_identity() {
        let hub = PresenceHub::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(hub.connect("", tx), Err(HubError::MissingIdentity)));
        assert!(hub.online_user_ids().is_empty());
    }

    #[test]
    fn test_connect_broadcasts_online_users() {
        let hub = PresenceHub::new();

        let (_a_id, mut a_rx) = connect(&hub, "alice");
        let events = drain(&mut a_rx);
        assert_eq!(
            events,
            vec![ServerEvent::online_users(vec!["alice".into()])]
        );

        let (_b_id, mut b_rx) = connect(&hub, "bob");
        // Both connections get the refreshed snapshot
        for rx in [&mut a_rx, &mut b_rx] {
            let events = drain(rx);
            assert_eq!(events.len(), 1);
            match &events[0] {
                ServerEvent::OnlineUsers { users } => {
                    assert_eq!(sorted(users.clone()), vec!["alice", "bob"]);
                }
                other => panic!("Expected OnlineUsers, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_reconnect_last_connect_wins() {
        let hub = PresenceHub::new();

        let (first_id, _first_rx) = connect(&hub, "alice");
        let (second_id, mut second_rx) = connect(&hub, "alice");

        assert_eq!(hub.online_user_ids(), vec!["alice".to_string()]);
        drain(&mut second_rx);

        // The superseded transport's close is a complete no-op
        hub.disconnect("alice", first_id);
        assert_eq!(hub.online_user_ids(), vec!["alice".to_string()]);
        assert!(drain(&mut second_rx).is_empty());

        hub.disconnect("alice", second_id);
        assert!(hub.online_user_ids().is_empty());
    }

    #[test]
    fn test_join_requires_connection() {
        let hub = PresenceHub::new();
        assert!(matches!(
            hub.join_room("ghost", "room-1"),
            Err(HubError::NotConnected(_))
        ));
    }

    #[test]
    fn test_join_validates_room_id() {
        let hub = PresenceHub::new();
        let (_id, _rx) = connect(&hub, "alice");

        assert!(matches!(
            hub.join_room("alice", ""),
            Err(HubError::InvalidRoom(_))
        ));
        assert!(matches!(
            hub.join_room("alice", "$reserved"),
            Err(HubError::InvalidRoom(_))
        ));
    }

    #[test]
    fn test_double_join_rejected_without_state_change() {
        let hub = PresenceHub::new();
        let (_id, _rx) = connect(&hub, "alice");

        let _room_rx = hub.join_room("alice", "room-1").unwrap();
        assert!(matches!(
            hub.join_room("alice", "room-1"),
            Err(HubError::AlreadyJoined(_))
        ));
        assert_eq!(hub.members("room-1"), vec!["alice".to_string()]);
        assert_eq!(hub.stats().live_memberships, 1);
    }

    #[test]
    fn test_max_rooms_per_connection() {
        let hub = PresenceHub::with_config(HubConfig {
            max_rooms_per_connection: 2,
            ..HubConfig::default()
        });
        let (_id, _rx) = connect(&hub, "alice");

        let _r1 = hub.join_room("alice", "room-1").unwrap();
        let _r2 = hub.join_room("alice", "room-2").unwrap();
        assert!(matches!(
            hub.join_room("alice", "room-3"),
            Err(HubError::MaxRoomsPerConnection)
        ));
    }

    #[test]
    fn test_membership_tracks_net_joins_and_leaves() {
        let hub = PresenceHub::new();
        let (_a, _a_rx) = connect(&hub, "alice");
        let (_b, _b_rx) = connect(&hub, "bob");

        let _a_room = hub.join_room("alice", "room-1").unwrap();
        let _b_room = hub.join_room("bob", "room-1").unwrap();
        assert_eq!(sorted(hub.members("room-1")), vec!["alice", "bob"]);

        assert!(hub.leave_room("alice", "room-1"));
        assert_eq!(hub.members("room-1"), vec!["bob".to_string()]);

        // Leaving a room never joined is a no-op, not an error
        assert!(!hub.leave_room("alice", "room-1"));
        assert!(!hub.leave_room("alice", "room-9"));

        // Draining the room removes the entry entirely
        assert!(hub.leave_room("bob", "room-1"));
        assert!(!hub.room_exists("room-1"));
        assert!(hub.members("room-1").is_empty());
    }

    #[test]
    fn test_join_broadcasts_membership_and_typing_reset() {
        let hub = PresenceHub::new();
        let (_a, _a_rx) = connect(&hub, "alice");

        let mut a_room = hub.join_room("alice", "room-1").unwrap();
        let events = drain_room(&mut a_room);
        assert_eq!(
            events,
            vec![
                ServerEvent::room_members("room-1", vec!["alice".into()]),
                ServerEvent::user_typing("room-1", vec![]),
            ]
        );
    }

    #[test]
    fn test_typing_full_list_channel() {
        let hub = PresenceHub::new();
        let (_a, _a_rx) = connect(&hub, "alice");
        let (_b, _b_rx) = connect(&hub, "bob");

        let mut a_room = hub.join_room("alice", "room-1").unwrap();
        let _b_room = hub.join_room("bob", "room-1").unwrap();
        drain_room(&mut a_room);

        hub.typing_update("room-1", snapshot("bob"), true);
        let events = drain_room(&mut a_room);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ServerEvent::UserTyping { room_id, users } => {
                assert_eq!(room_id, "room-1");
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].id, "bob");
            }
            other => panic!("Expected UserTyping, got {:?}", other),
        }

        // Stop typing empties the list for the whole room
        hub.typing_update("room-1", snapshot("bob"), false);
        let events = drain_room(&mut a_room);
        assert_eq!(
            events,
            vec![ServerEvent::user_typing("room-1", vec![])]
        );
        assert!(hub.typing_users("room-1").is_empty());
    }

    #[test]
    fn test_room_typing_delta_excludes_sender() {
        let hub = PresenceHub::new();
        let (_a, _a_rx) = connect(&hub, "alice");
        let (_b, _b_rx) = connect(&hub, "bob");

        let mut a_room = hub.join_room("alice", "room-1").unwrap();
        let mut b_room = hub.join_room("bob", "room-1").unwrap();
        drain_room(&mut a_room);
        drain_room(&mut b_room);

        hub.room_typing_delta("room-1", "alice", true);

        // The envelope marks the sender; the sender's forwarder drops it
        let seen = a_room.try_recv().unwrap();
        assert_eq!(seen.exclude.as_deref(), Some("alice"));
        assert_eq!(
            *seen.event,
            ServerEvent::room_user_typing("room-1", "alice", true)
        );
        let seen = b_room.try_recv().unwrap();
        assert_eq!(seen.exclude.as_deref(), Some("alice"));

        // The delta channel never mutates the typing tracker
        assert!(hub.typing_users("room-1").is_empty());
    }

    #[test]
    fn test_leave_clears_typing_and_broadcasts_once() {
        let hub = PresenceHub::new();
        let (_a, _a_rx) = connect(&hub, "alice");
        let (_b, _b_rx) = connect(&hub, "bob");

        let _a_room = hub.join_room("alice", "room-1").unwrap();
        let mut b_room = hub.join_room("bob", "room-1").unwrap();
        drain_room(&mut b_room);

        hub.typing_update("room-1", snapshot("alice"), true);
        drain_room(&mut b_room);

        assert!(hub.leave_room("alice", "room-1"));
        let events = drain_room(&mut b_room);
        assert_eq!(
            events,
            vec![
                ServerEvent::room_members("room-1", vec!["bob".into()]),
                ServerEvent::user_typing("room-1", vec![]),
            ]
        );
    }

    #[test]
    fn test_disconnect_cleans_every_room_once() {
        let hub = PresenceHub::new();
        let (_a, _a_rx) = connect(&hub, "alice");
        let (_b, _b_rx) = connect(&hub, "bob");
        let (c_id, _c_rx) = connect(&hub, "carol");

        let mut a_room = hub.join_room("alice", "room-1").unwrap();
        let mut b_room = hub.join_room("bob", "room-2").unwrap();
        let _c1 = hub.join_room("carol", "room-1").unwrap();
        let _c2 = hub.join_room("carol", "room-2").unwrap();
        let mut a3_room = hub.join_room("alice", "room-3").unwrap();
        drain_room(&mut a_room);
        drain_room(&mut b_room);
        drain_room(&mut a3_room);

        hub.typing_update("room-1", snapshot("carol"), true);
        drain_room(&mut a_room);

        hub.disconnect("carol", c_id);

        assert_eq!(hub.members("room-1"), vec!["alice".to_string()]);
        assert_eq!(hub.members("room-2"), vec!["bob".to_string()]);
        assert!(hub.typing_users("room-1").is_empty());
        assert!(!hub.online_user_ids().contains(&"carol".to_string()));

        // room-1 saw exactly one membership update and one typing update
        let events = drain_room(&mut a_room);
        let membership_updates = events
            .iter()
            .filter(|e| matches!(e, ServerEvent::RoomMembers { .. }))
            .count();
        let typing_updates = events
            .iter()
            .filter(|e| matches!(e, ServerEvent::UserTyping { .. }))
            .count();
        assert_eq!(membership_updates, 1);
        assert_eq!(typing_updates, 1);

        // room-2 saw exactly one membership update and no typing update
        let events = drain_room(&mut b_room);
        assert_eq!(
            events,
            vec![ServerEvent::room_members("room-2", vec!["bob".into()])]
        );

        // Rooms carol never joined hear nothing
        assert!(drain_room(&mut a3_room).is_empty());
    }

    #[test]
    fn test_logout_then_transport_close_is_noop() {
        let hub = PresenceHub::new();
        let (a_id, _a_rx) = connect(&hub, "alice");
        let (_b, mut b_rx) = connect(&hub, "bob");

        let _a_room = hub.join_room("alice", "room-1").unwrap();
        drain(&mut b_rx);

        hub.logout("alice", a_id);
        let after_logout = drain(&mut b_rx);
        assert_eq!(
            after_logout,
            vec![ServerEvent::online_users(vec!["bob".into()])]
        );

        // The transport-close path repeats cleanup; nothing may fire twice
        hub.disconnect("alice", a_id);
        assert!(drain(&mut b_rx).is_empty());
        assert!(!hub.room_exists("room-1"));
    }

    #[test]
    fn test_send_to_user_offline_is_noop() {
        let hub = PresenceHub::new();
        assert!(!hub.send_to_user("ghost", ServerEvent::online_users(vec![])));

        let (_a, mut a_rx) = connect(&hub, "alice");
        drain(&mut a_rx);
        assert!(hub.send_to_user(
            "alice",
            ServerEvent::NewMessage {
                message: serde_json::json!({"text": "hi"}),
            }
        ));
        assert_eq!(drain(&mut a_rx).len(), 1);
    }

    #[test]
    fn test_send_to_unknown_room_delivers_nothing() {
        let hub = PresenceHub::new();
        assert_eq!(
            hub.send_to_room("nowhere", ServerEvent::room_members("nowhere", vec![])),
            0
        );
    }

    #[test]
    fn test_scripted_presence_scenario() {
        let hub = PresenceHub::new();

        // A connects
        let (a_id, mut a_rx) = connect(&hub, "A");
        assert_eq!(
            drain(&mut a_rx),
            vec![ServerEvent::online_users(vec!["A".into()])]
        );

        // B connects
        let (_b_id, mut b_rx) = connect(&hub, "B");
        assert_eq!(sorted(hub.online_user_ids()), vec!["A", "B"]);
        drain(&mut a_rx);
        drain(&mut b_rx);

        // A joins R1
        let mut a_room = hub.join_room("A", "R1").unwrap();
        assert_eq!(hub.members("R1"), vec!["A".to_string()]);
        let events = drain_room(&mut a_room);
        assert_eq!(
            events[0],
            ServerEvent::room_members("R1", vec!["A".into()])
        );

        // B joins R1
        let mut b_room = hub.join_room("B", "R1").unwrap();
        assert_eq!(sorted(hub.members("R1")), vec!["A", "B"]);
        drain_room(&mut a_room);
        drain_room(&mut b_room);

        // A starts typing
        hub.typing_update("R1", snapshot("A"), true);
        let typing = hub.typing_users("R1");
        assert_eq!(typing.len(), 1);
        assert_eq!(typing[0].id, "A");

        // A stops typing
        hub.typing_update("R1", snapshot("A"), false);
        assert!(hub.typing_users("R1").is_empty());
        drain_room(&mut b_room);

        // A disconnects
        hub.disconnect("A", a_id);
        assert_eq!(hub.online_user_ids(), vec!["B".to_string()]);
        assert_eq!(hub.members("R1"), vec!["B".to_string()]);

        let events = drain_room(&mut b_room);
        assert_eq!(
            events,
            vec![ServerEvent::room_members("R1", vec!["B".into()])]
        );
        assert_eq!(
            drain(&mut b_rx),
            vec![ServerEvent::online_users(vec!["B".into()])]
        );
    }

    #[test]
    fn test_prune_stale_typing_broadcasts_affected_rooms() {
        let hub = PresenceHub::new();
        let (_a, _a_rx) = connect(&hub, "alice");
        let (_b, _b_rx) = connect(&hub, "bob");

        let mut a_room = hub.join_room("alice", "room-1").unwrap();
        hub.typing_update("room-1", snapshot("alice"), true);
        drain_room(&mut a_room);

        // Entries refreshed within the window survive a sweep
        assert_eq!(hub.prune_stale_typing(Duration::from_secs(60)), 0);
        assert!(drain_room(&mut a_room).is_empty());
        assert_eq!(hub.typing_users("room-1").len(), 1);
    }

    #[test]
    fn test_stats() {
        let hub = PresenceHub::new();
        let (_a, _a_rx) = connect(&hub, "alice");
        let (_b, _b_rx) = connect(&hub, "bob");

        let _r1 = hub.join_room("alice", "room-1").unwrap();
        let _r2 = hub.join_room("alice", "room-2").unwrap();
        let _r3 = hub.join_room("bob", "room-1").unwrap();
        hub.typing_update("room-1", snapshot("bob"), true);

        let stats = hub.stats();
        assert_eq!(stats.online_users, 2);
        assert_eq!(stats.rooms, 2);
        assert_eq!(stats.live_memberships, 3);
        assert_eq!(stats.typing_rooms, 1);
    }
}
