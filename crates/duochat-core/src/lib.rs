//! Duochat synchronization core.
//!
//! Two-party chat over a shared realtime key/value store. The UI is a thin
//! layer over this crate: it derives conversation ids, appends messages,
//! tracks presence, keeps unread counters and seen flags consistent, and
//! enforces blocking. There is no server of our own. Every client talks to
//! the same [`Store`] and the core keeps the shared state coherent under
//! arbitrary interleavings of both participants.
//!
//! # Architecture
//!
//! Every component is generic over a [`Store`] and an [`Environment`], both
//! injected. Nothing is global.
//!
//! # Components
//!
//! - [`derive_id`]: canonical id for an unordered pair of users
//! - [`PresenceTracker`]: online state, reconciled with disconnects
//! - [`MessageLog`]: ordered, append-only messages, gated by blocks
//! - [`UnseenStateReconciler`]: unread counters and seen flags
//! - [`BlockRegistry`]: directed block edges
//! - [`RosterMaterializer`]: each user's conversation list
//! - [`UserDirectory`], [`Moderation`], [`LegacyRoomMigration`]
//! - [`ChatClient`]: facade for one signed-in viewer
//!
//! # Store implementations
//!
//! - [`MemoryStore`]: in-process reference store for tests and tools
//! - [`ChaoticStore`]: fault-injecting wrapper for chaos tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod blocks;
pub mod client;
pub mod config;
pub mod directory;
pub mod env;
pub mod error;
pub mod identity;
pub mod message_log;
pub mod migration;
pub mod moderation;
pub mod path;
pub mod presence;
pub mod records;
pub mod retry;
pub mod roster;
pub mod store;
pub mod unseen;

pub use blocks::{BlockRegistry, BlockStatus, BlockWatch};
pub use client::ChatClient;
pub use config::{ChatConfig, RetryPolicy};
pub use directory::UserDirectory;
pub use env::{Environment, SystemEnv};
pub use error::ChatError;
pub use identity::{ConversationId, IdentityProvider, StaticIdentity, UserId, derive_id};
pub use message_log::MessageLog;
pub use migration::{LegacyRoomMigration, MigrationReport};
pub use moderation::Moderation;
pub use path::{PathSegment, StorePath};
pub use presence::PresenceTracker;
pub use records::{Message, PresenceRecord, PresenceStatus, RosterRecord, UserProfile};
pub use roster::{RosterEntry, RosterMaterializer, RosterWatch};
pub use store::{ChaoticStore, MemoryStore, Store, StoreError, Watch};
pub use unseen::{Delivery, UnreadState, UnseenStateReconciler};
