//! Operations for model-based testing.
//!
//! Operations are generated by proptest (through `arbitrary`) and applied to
//! both the model and the real clients. User indices wrap modulo the world
//! size, so every generated operation names a valid user.

use arbitrary::Arbitrary;

/// User index (0-indexed, taken modulo the number of users).
pub type UserIdx = u8;

/// Operations a signed-in user (or the network) can perform.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// `from` sends `text` to `to`.
    Send {
        /// Sender.
        from: UserIdx,
        /// Recipient.
        to: UserIdx,
        /// Message body.
        text: SmallText,
    },

    /// `viewer` opens the conversation with `partner`.
    Open {
        /// User opening the conversation.
        viewer: UserIdx,
        /// Other participant.
        partner: UserIdx,
    },

    /// User starts a session and goes online.
    GoOnline {
        /// User.
        user: UserIdx,
    },

    /// User signs off gracefully.
    GoOffline {
        /// User.
        user: UserIdx,
    },

    /// User's connection drops without a goodbye, then reconnects.
    ///
    /// Disconnect hooks registered on the old connection fire. The user
    /// stays offline until the next `GoOnline`.
    Disconnect {
        /// User.
        user: UserIdx,
    },

    /// `blocker` blocks `blocked`.
    Block {
        /// User placing the block.
        blocker: UserIdx,
        /// User being blocked.
        blocked: UserIdx,
    },

    /// `blocker` lifts their block on `blocked`.
    Unblock {
        /// User lifting the block.
        blocker: UserIdx,
        /// Previously blocked user.
        blocked: UserIdx,
    },

    /// Advance the shared clock.
    AdvanceTime {
        /// Milliseconds to advance.
        millis: u16,
    },
}

/// Compact message body.
///
/// The size class picks between an empty body, whitespace only, a short
/// padded text and one long enough to be cut in previews.
#[derive(Debug, Clone, Arbitrary)]
pub struct SmallText {
    /// Content seed.
    pub seed: u8,
    /// Shape hint (0-3 maps to empty/blank/short/long).
    pub size_class: u8,
}

impl SmallText {
    /// Characters in a long body.
    pub const LONG_LEN: usize = 80;

    /// Expand to the text handed to `send`.
    pub fn to_text(&self) -> String {
        match self.size_class % 4 {
            0 => String::new(),
            1 => " \t ".to_string(),
            2 => format!("  msg {}  ", self.seed),
            _ => (0..Self::LONG_LEN)
                .map(|i| char::from(b'a' + self.seed.wrapping_add(i as u8) % 26))
                .collect(),
        }
    }
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation succeeded.
    Ok,

    /// Operation failed with an expected error.
    Error(OperationError),
}

impl OperationResult {
    /// Check if the operation succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Check if the operation failed.
    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }
}

/// Expected, user-visible failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// A block edge exists between the two users.
    Blocked,

    /// Body is blank after trimming.
    EmptyMessage,

    /// Both sides of the operation are the same user.
    SelfConversation,
}
