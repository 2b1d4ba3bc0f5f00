//! # beacon-protocol
//!
//! Wire protocol definitions for the Beacon live-presence layer.
//!
//! This crate defines the events exchanged between chat clients and the
//! Beacon server, plus the framed binary codec that carries them.
//!
//! ## Event Channels
//!
//! - `joinRoom` / `leaveRoom` - live room subscription
//! - `typing` / `userTyping` - full typing-list channel
//! - `roomTyping` / `roomUserTyping` - per-user typing-delta channel
//! - `getOnlineUsers` / `roomMembers` - presence and membership snapshots
//! - `newMessage`, `newRoomMessage`, `userJoinedRoom`, `userLeftRoom`,
//!   `roomDeleted` - domain events relayed after durable persistence
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, ClientEvent};
//!
//! let event = ClientEvent::join_room("room-42");
//!
//! // Encode and decode
//! let encoded = codec::encode(&event).unwrap();
//! let decoded: ClientEvent = codec::decode(&encoded).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, encode, ProtocolError};
pub use events::{ClientEvent, RoomId, ServerEvent, UserId, UserSnapshot};
