//! Typing-state tracking for Beacon.
//!
//! Tracks which users are typing in which rooms, keyed by room. Presence in
//! the map means typing; absence means not typing. Entries are removed by
//! explicit stop events, by leaving the room, by disconnect, or (when the
//! server enables it) by a staleness sweep.

use beacon_protocol::{RoomId, UserId, UserSnapshot};
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Typing state for a single user in one room.
#[derive(Debug, Clone)]
pub struct TypingEntry {
    /// Display data broadcast with the typing list.
    pub user: UserSnapshot,
    /// When the user started typing.
    pub started_at: u64,
    /// Last typing-start refresh.
    pub last_seen: u64,
}

impl TypingEntry {
    /// Create a new entry.
    #[must_use]
    pub fn new(user: UserSnapshot) -> Self {
        let now = now_ms();
        Self {
            user,
            started_at: now,
            last_seen: now,
        }
    }

    /// Overwrite the snapshot and refresh the last-seen timestamp.
    pub fn refresh(&mut self, user: UserSnapshot) {
        self.user = user;
        self.last_seen = now_ms();
    }

    /// Check if this entry is stale (no refresh within the given duration).
    #[must_use]
    pub fn is_stale(&self, timeout: Duration) -> bool {
        let timeout_ms = timeout.as_millis() as u64;
        now_ms().saturating_sub(self.last_seen) > timeout_ms
    }
}

/// Per-room typing state across all rooms.
///
/// A room's inner map is removed as soon as it drains to empty, mirroring
/// the no-dangling-empty-entries rule for room membership.
#[derive(Debug, Default)]
pub struct TypingTracker {
    rooms: DashMap<RoomId, HashMap<UserId, TypingEntry>>,
}

impl TypingTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a user as typing in a room, refreshing any existing entry.
    pub fn set_typing(&self, room_id: &str, user: UserSnapshot) {
        let mut room = self.rooms.entry(room_id.to_string()).or_default();
        match room.get_mut(&user.id) {
            Some(entry) => entry.refresh(user),
            None => {
                debug!(room = %room_id, user = %user.id, "Typing started");
                room.insert(user.id.clone(), TypingEntry::new(user));
            }
        }
    }

    /// Clear a user's typing entry in a room.
    ///
    /// Returns `true` if an entry was removed; clearing an absent entry is
    /// a no-op.
    pub fn clear_typing(&self, room_id: &str, user_id: &str) -> bool {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        let removed = room.remove(user_id).is_some();
        let emptied = room.is_empty();
        drop(room);

        if removed {
            debug!(room = %room_id, user = %user_id, "Typing stopped");
        }
        if emptied {
            self.rooms.remove_if(room_id, |_, users| users.is_empty());
        }
        removed
    }

    /// Remove a user's typing entry from every room.
    ///
    /// Returns the rooms that actually changed, so callers broadcast
    /// updated lists only where needed.
    pub fn clear_user_everywhere(&self, user_id: &str) -> Vec<RoomId> {
        let mut affected = Vec::new();
        for mut room in self.rooms.iter_mut() {
            if room.remove(user_id).is_some() {
                affected.push(room.key().clone());
            }
        }
        self.rooms.retain(|_, users| !users.is_empty());

        if !affected.is_empty() {
            debug!(user = %user_id, rooms = affected.len(), "Typing cleared everywhere");
        }
        affected
    }

    /// Snapshot of the users typing in a room.
    #[must_use]
    pub fn typing_users(&self, room_id: &str) -> Vec<UserSnapshot> {
        self.rooms
            .get(room_id)
            .map(|room| room.values().map(|e| e.user.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of users typing in a room.
    #[must_use]
    pub fn typing_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|room| room.len()).unwrap_or(0)
    }

    /// Number of rooms with at least one typing user.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Remove entries with no refresh within the given duration.
    ///
    /// Returns the rooms that changed. Used by the opt-in server-side
    /// expiry sweep covering clients that crash mid-typing.
    pub fn prune_stale(&self, timeout: Duration) -> Vec<RoomId> {
        let mut affected = Vec::new();
        for mut room in self.rooms.iter_mut() {
            let before = room.len();
            room.retain(|_, entry| !entry.is_stale(timeout));
            if room.len() != before {
                affected.push(room.key().clone());
            }
        }
        self.rooms.retain(|_, users| !users.is_empty());

        for room_id in &affected {
            debug!(room = %room_id, "Pruned stale typing entries");
        }
        affected
    }
}
