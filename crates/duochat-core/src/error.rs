//! Error types for the chat synchronization core.
//!
//! Two layers: [`StoreError`](crate::store::StoreError) for the backing store
//! contract and [`ChatError`] for everything the core surfaces to callers.
//! Store failures are folded into `ChatError` at the component boundary.

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by chat operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// A block edge exists between the participants, in either direction.
    ///
    /// User-visible. Not retryable until the block is removed.
    #[error("messaging between {sender} and {recipient} is blocked")]
    Blocked {
        /// User who attempted the send
        sender: String,
        /// Intended recipient
        recipient: String,
    },

    /// Message text is empty after trimming whitespace.
    #[error("message is empty")]
    EmptyMessage,

    /// No signed-in viewer could be resolved.
    ///
    /// Fatal to the operation. The UI should ask the user to sign in again.
    #[error("no signed-in identity")]
    IdentityMissing,

    /// An identifier failed validation (empty, reserved characters, self-chat).
    #[error("invalid identity {value:?}: {reason}")]
    InvalidIdentity {
        /// The offending identifier
        value: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// The user is not one of the two participants of the conversation.
    #[error("{user} is not a participant of conversation {conversation}")]
    NotParticipant {
        /// User that was checked
        user: String,
        /// Conversation key
        conversation: String,
    },

    /// Only messages authored by the partner can be reported.
    #[error("message {message_id} cannot be reported by its own author")]
    NotReportable {
        /// Key of the message
        message_id: String,
    },

    /// Legacy import refused: the canonical room already has messages that
    /// were not imported.
    #[error("conversation {conversation} already has messages, legacy import refused")]
    MigrationConflict {
        /// Conversation key
        conversation: String,
    },

    /// A store value did not have the expected shape.
    #[error("malformed record at {path}: {reason}")]
    Decode {
        /// Store path of the record
        path: String,
        /// Decoder message
        reason: String,
    },

    /// A path segment was rejected by the path builder.
    #[error("invalid store path: {0}")]
    InvalidPath(String),

    /// Transient backend failure. Retry or resubscribe.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl ChatError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Only backend outages are transient. Validation and authorization
    /// failures repeat deterministically.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Short message suitable for showing to the end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Blocked { .. } => "You can't message this user.",
            Self::EmptyMessage => "Type a message first.",
            Self::IdentityMissing => "Please sign in again.",
            Self::StoreUnavailable(_) => "Reconnecting...",
            Self::InvalidIdentity { .. }
            | Self::NotParticipant { .. }
            | Self::NotReportable { .. }
            | Self::MigrationConflict { .. }
            | Self::Decode { .. }
            | Self::InvalidPath(_) => "Something went wrong.",
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            StoreError::Disconnected => Self::StoreUnavailable("connection closed".to_string()),
            StoreError::InvalidPath(msg) => Self::InvalidPath(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_outages_are_transient() {
        assert!(ChatError::StoreUnavailable("timeout".to_string()).is_transient());

        assert!(!ChatError::EmptyMessage.is_transient());
        assert!(!ChatError::IdentityMissing.is_transient());
        assert!(
            !ChatError::Blocked { sender: "a".to_string(), recipient: "b".to_string() }
                .is_transient()
        );
        assert!(
            !ChatError::Decode { path: "users/a".to_string(), reason: "x".to_string() }
                .is_transient()
        );
        assert!(!ChatError::MigrationConflict { conversation: "alice_bob".to_string() }.is_transient());
    }

    #[test]
    fn store_errors_map_onto_chat_errors() {
        let err: ChatError = StoreError::Unavailable("down".to_string()).into();
        assert_eq!(err, ChatError::StoreUnavailable("down".to_string()));

        let err: ChatError = StoreError::Disconnected.into();
        assert!(err.is_transient());

        let err: ChatError = StoreError::InvalidPath("a//b".to_string()).into();
        assert!(matches!(err, ChatError::InvalidPath(_)));
    }

    #[test]
    fn missing_identity_asks_for_sign_in() {
        assert_eq!(ChatError::IdentityMissing.user_message(), "Please sign in again.");
    }
}
