//! Room abstraction for Beacon.
//!
//! A room couples the transport-level broadcast group (the actual delivery
//! mechanism) with the live-membership mirror used to answer "who is
//! subscribed right now". Live membership is distinct from durable room
//! membership kept in storage: a stored member with no subscribed
//! connection does not appear here.

use beacon_protocol::{RoomId, ServerEvent, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Maximum room id length.
pub const MAX_ROOM_ID_LENGTH: usize = 256;

/// Default broadcast group capacity.
const DEFAULT_ROOM_CAPACITY: usize = 1024;

/// Validate a room id.
///
/// # Errors
///
/// Returns an error message if the room id is invalid.
pub fn validate_room_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("Room id cannot be empty");
    }
    if id.len() > MAX_ROOM_ID_LENGTH {
        return Err("Room id too long");
    }
    if id.starts_with('$') {
        return Err("Room ids starting with '$' are reserved");
    }
    // Check for valid ASCII printable characters
    if !id.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Room id contains invalid characters");
    }
    Ok(())
}

/// A room-scoped outbound event.
///
/// `exclude` implements sender-exclusive delivery: the subscriber whose
/// user id matches drops the event instead of forwarding it.
#[derive(Debug, Clone)]
pub struct RoomEvent {
    /// The event to deliver.
    pub event: Arc<ServerEvent>,
    /// User whose connection must not receive this event.
    pub exclude: Option<UserId>,
}

/// A room's broadcast group plus its live-membership mirror.
#[derive(Debug)]
pub struct Room {
    /// Room id.
    id: RoomId,
    /// Broadcast sender for this room.
    sender: broadcast::Sender<RoomEvent>,
    /// Users currently subscribed to the room.
    members: HashSet<UserId>,
}

impl Room {
    /// Create a new room.
    #[must_use]
    pub fn new(id: impl Into<RoomId>) -> Self {
        Self::with_capacity(id, DEFAULT_ROOM_CAPACITY)
    }

    /// Create a new room with a specific broadcast capacity.
    #[must_use]
    pub fn with_capacity(id: impl Into<RoomId>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            id: id.into(),
            sender,
            members: HashSet::new(),
        }
    }

    /// Get the room id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of live members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a user is a live member.
    #[must_use]
    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.contains(user_id)
    }

    /// Subscribe a user to this room.
    ///
    /// Returns a receiver for the room's broadcast group. The receiver is
    /// created before any subsequent publish, so the joiner observes every
    /// broadcast triggered by its own join.
    pub fn subscribe(&mut self, user_id: impl Into<UserId>) -> broadcast::Receiver<RoomEvent> {
        let user = user_id.into();
        self.members.insert(user.clone());
        debug!(room = %self.id, user = %user, "User subscribed");
        self.sender.subscribe()
    }

    /// Unsubscribe a user from this room.
    ///
    /// Returns `true` if the user was a member.
    pub fn unsubscribe(&mut self, user_id: &str) -> bool {
        let removed = self.members.remove(user_id);
        if removed {
            debug!(room = %self.id, user = %user_id, "User unsubscribed");
        }
        removed
    }

    /// Publish an event to this room's broadcast group.
    ///
    /// Returns the number of receivers that got the event.
    pub fn publish(&self, event: Arc<ServerEvent>, exclude: Option<UserId>) -> usize {
        trace!(room = %self.id, event = event.kind(), "Publishing room event");
        self.sender
            .send(RoomEvent { event, exclude })
            .unwrap_or_default()
    }

    /// Snapshot of the live membership.
    #[must_use]
    pub fn members(&self) -> Vec<UserId> {
        self.members.iter().cloned().collect()
    }

    /// Check if the room has no live members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
