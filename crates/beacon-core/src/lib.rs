//! # beacon-core
//!
//! Registries, presence hub, and delivery interface for the Beacon
//! live-presence layer.
//!
//! This crate provides the in-memory heart of the system:
//!
//! - **ConnectionRegistry** - one live connection per user identity
//! - **Room** - broadcast group plus live-membership mirror
//! - **TypingTracker** - who is typing where
//! - **PresenceHub** - the connection-lifecycle dispatcher tying them together
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │  Connection │────▶│ PresenceHub  │────▶│    Room     │
//! └─────────────┘     └──────────────┘     └─────────────┘
//!                        │          │
//!                        ▼          ▼
//!              ┌──────────────┐  ┌───────────────┐
//!              │TypingTracker │  │ ConnRegistry  │
//!              └──────────────┘  └───────────────┘
//! ```
//!
//! Everything here is live state: the hub is rebuilt empty on process
//! restart, and durable chat data (users, rooms, message history) lives
//! with external collaborators that push committed domain events through
//! the hub's delivery interface.

pub mod hub;
pub mod registry;
pub mod room;
pub mod typing;

pub use hub::{HubConfig, HubError, HubStats, PresenceHub};
pub use registry::{Connection, ConnectionId, ConnectionRegistry, EventSender};
pub use room::{Room, RoomEvent};
pub use typing::{TypingEntry, TypingTracker};
