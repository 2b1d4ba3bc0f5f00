//! Event types for the Beacon protocol.
//!
//! Events are the fundamental unit of communication. Inbound (client to
//! server) and outbound (server to client) events are separate enums, each
//! serialized as a map with a `type` tag so the wire format matches the
//! event names the chat frontend already speaks.

use serde::{Deserialize, Serialize};

/// A user identity, opaque to the live layer.
pub type UserId = String;

/// A room identifier.
pub type RoomId = String;

/// Minimal display data for a user, carried in typing broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    /// User identity.
    pub id: UserId,
    /// Name shown next to the typing indicator.
    pub display_name: String,
    /// Avatar image URL, if the user has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl UserSnapshot {
    /// Create a snapshot without an avatar.
    #[must_use]
    pub fn new(id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_url: None,
        }
    }

    /// Attach an avatar URL.
    #[must_use]
    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }
}

/// An event sent by a client over its live connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Subscribe to a room's live events.
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        /// Target room.
        room_id: RoomId,
    },

    /// Unsubscribe from a room's live events.
    #[serde(rename_all = "camelCase")]
    LeaveRoom {
        /// Target room.
        room_id: RoomId,
    },

    /// Start or stop typing in a room (full-list channel).
    #[serde(rename_all = "camelCase")]
    Typing {
        /// Room the user is typing in.
        room_id: RoomId,
        /// Display data to show next to the indicator.
        user: UserSnapshot,
        /// `true` on start, `false` on explicit stop.
        is_typing: bool,
    },

    /// Start or stop typing in a room (delta channel).
    #[serde(rename_all = "camelCase")]
    RoomTyping {
        /// Room the user is typing in.
        room_id: RoomId,
        /// `true` on start, `false` on explicit stop.
        is_typing: bool,
    },

    /// Client-initiated logout; the server cleans up and closes the socket.
    Logout,
}

impl ClientEvent {
    /// Wire tag for this event, used in logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom { .. } => "joinRoom",
            ClientEvent::LeaveRoom { .. } => "leaveRoom",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::RoomTyping { .. } => "roomTyping",
            ClientEvent::Logout => "logout",
        }
    }

    /// Create a `joinRoom` event.
    #[must_use]
    pub fn join_room(room_id: impl Into<RoomId>) -> Self {
        ClientEvent::JoinRoom {
            room_id: room_id.into(),
        }
    }

    /// Create a `leaveRoom` event.
    #[must_use]
    pub fn leave_room(room_id: impl Into<RoomId>) -> Self {
        ClientEvent::LeaveRoom {
            room_id: room_id.into(),
        }
    }

    /// Create a `typing` event.
    #[must_use]
    pub fn typing(room_id: impl Into<RoomId>, user: UserSnapshot, is_typing: bool) -> Self {
        ClientEvent::Typing {
            room_id: room_id.into(),
            user,
            is_typing,
        }
    }

    /// Create a `roomTyping` event.
    #[must_use]
    pub fn room_typing(room_id: impl Into<RoomId>, is_typing: bool) -> Self {
        ClientEvent::RoomTyping {
            room_id: room_id.into(),
            is_typing,
        }
    }
}

/// An event pushed by the server to one or more clients.
///
/// Room-scoped events carry their room id explicitly: every event for a
/// connection shares a single pipe, so the client routes by payload rather
/// than by subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Snapshot of all currently-online user ids, sent to every connection.
    #[serde(rename = "getOnlineUsers")]
    OnlineUsers {
        /// Identities with a live connection.
        users: Vec<UserId>,
    },

    /// Snapshot of a room's live membership, sent to the room.
    #[serde(rename_all = "camelCase")]
    RoomMembers {
        /// Room the snapshot describes.
        room_id: RoomId,
        /// Users currently subscribed to the room.
        members: Vec<UserId>,
    },

    /// Full list of users typing in a room, sent to the room.
    #[serde(rename_all = "camelCase")]
    UserTyping {
        /// Room the list describes.
        room_id: RoomId,
        /// Everyone currently typing there.
        users: Vec<UserSnapshot>,
    },

    /// Single typing-state change, sent to the room minus the sender.
    #[serde(rename_all = "camelCase")]
    RoomUserTyping {
        /// Room the change happened in.
        room_id: RoomId,
        /// User whose state changed.
        user_id: UserId,
        /// New state.
        is_typing: bool,
    },

    /// A direct message was persisted; relayed to the recipient.
    #[serde(rename_all = "camelCase")]
    NewMessage {
        /// The stored message record, opaque to the live layer.
        message: serde_json::Value,
    },

    /// A room message was persisted; relayed to the room.
    #[serde(rename_all = "camelCase")]
    NewRoomMessage {
        /// Room the message belongs to.
        room_id: RoomId,
        /// The stored message record, opaque to the live layer.
        message: serde_json::Value,
    },

    /// A user became a durable member of a room.
    #[serde(rename_all = "camelCase")]
    UserJoinedRoom {
        /// Room that gained a member.
        room_id: RoomId,
        /// Who joined.
        user: UserSnapshot,
    },

    /// A user gave up durable membership of a room.
    #[serde(rename_all = "camelCase")]
    UserLeftRoom {
        /// Room that lost a member.
        room_id: RoomId,
        /// Who left.
        user: UserSnapshot,
    },

    /// A room was deleted from storage; sent to each member individually.
    #[serde(rename_all = "camelCase")]
    RoomDeleted {
        /// The deleted room.
        room_id: RoomId,
    },
}

impl ServerEvent {
    /// Wire tag for this event, used in logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::OnlineUsers { .. } => "getOnlineUsers",
            ServerEvent::RoomMembers { .. } => "roomMembers",
            ServerEvent::UserTyping { .. } => "userTyping",
            ServerEvent::RoomUserTyping { .. } => "roomUserTyping",
            ServerEvent::NewMessage { .. } => "newMessage",
            ServerEvent::NewRoomMessage { .. } => "newRoomMessage",
            ServerEvent::UserJoinedRoom { .. } => "userJoinedRoom",
            ServerEvent::UserLeftRoom { .. } => "userLeftRoom",
            ServerEvent::RoomDeleted { .. } => "roomDeleted",
        }
    }

    /// Create a `getOnlineUsers` snapshot event.
    #[must_use]
    pub fn online_users(users: Vec<UserId>) -> Self {
        ServerEvent::OnlineUsers { users }
    }

    /// Create a `roomMembers` snapshot event.
    #[must_use]
    pub fn room_members(room_id: impl Into<RoomId>, members: Vec<UserId>) -> Self {
        ServerEvent::RoomMembers {
            room_id: room_id.into(),
            members,
        }
    }

    /// Create a `userTyping` list event.
    #[must_use]
    pub fn user_typing(room_id: impl Into<RoomId>, users: Vec<UserSnapshot>) -> Self {
        ServerEvent::UserTyping {
            room_id: room_id.into(),
            users,
        }
    }

    /// Create a `roomUserTyping` delta event.
    #[must_use]
    pub fn room_user_typing(
        room_id: impl Into<RoomId>,
        user_id: impl Into<UserId>,
        is_typing: bool,
    ) -> Self {
        ServerEvent::RoomUserTyping {
            room_id: room_id.into(),
            user_id: user_id.into(),
            is_typing,
        }
    }
}
