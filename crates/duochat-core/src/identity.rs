//! Participant identities and canonical conversation ids.
//!
//! A conversation between two users has exactly one id, no matter which of
//! them derives it. The id is the lexicographically smaller uid, the reserved
//! [`JOIN_BOUNDARY`], then the larger uid. Because a [`UserId`] can never
//! contain the boundary, the mapping from unordered pairs to ids is injective.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{error::ChatError, path::RESERVED_CHARS};

/// Character joining the two participant ids of a [`ConversationId`].
pub const JOIN_BOUNDARY: char = '~';

/// Longest accepted uid, in bytes.
pub const MAX_USER_ID_LEN: usize = 128;

/// Opaque stable user identifier issued by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Validate and wrap a uid.
    pub fn new(raw: impl Into<String>) -> Result<Self, ChatError> {
        let raw = raw.into();
        let reason = if raw.is_empty() {
            Some("empty identifier")
        } else if raw.len() > MAX_USER_ID_LEN {
            Some("identifier too long")
        } else if raw.contains(JOIN_BOUNDARY) {
            Some("contains the conversation join boundary")
        } else if raw.chars().any(|c| RESERVED_CHARS.contains(&c)) {
            Some("contains a reserved path character")
        } else if raw.chars().any(char::is_control) {
            Some("contains a control character")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ChatError::InvalidIdentity { value: raw, reason }),
            None => Ok(Self(raw)),
        }
    }

    /// The uid as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = ChatError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<UserId> for String {
    fn from(user: UserId) -> Self {
        user.0
    }
}

/// Canonical identifier of the conversation between two users.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConversationId {
    low: UserId,
    high: UserId,
    key: String,
}

impl ConversationId {
    /// Both participants, lexicographically ordered.
    pub fn participants(&self) -> (&UserId, &UserId) {
        (&self.low, &self.high)
    }

    /// Check if `user` is one of the two participants.
    pub fn includes(&self, user: &UserId) -> bool {
        &self.low == user || &self.high == user
    }

    /// The other participant.
    pub fn partner_of(&self, user: &UserId) -> Result<&UserId, ChatError> {
        if &self.low == user {
            Ok(&self.high)
        } else if &self.high == user {
            Ok(&self.low)
        } else {
            Err(ChatError::NotParticipant {
                user: user.to_string(),
                conversation: self.key.clone(),
            })
        }
    }

    /// Rendered key used as the store segment.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Derive the conversation id for two users.
///
/// Commutative and deterministic. Fails for a conversation with oneself.
pub fn derive_id(a: &UserId, b: &UserId) -> Result<ConversationId, ChatError> {
    if a == b {
        return Err(ChatError::InvalidIdentity {
            value: a.to_string(),
            reason: "a conversation needs two distinct participants",
        });
    }

    let (low, high) = if a < b { (a, b) } else { (b, a) };
    let key = format!("{}{JOIN_BOUNDARY}{}", low.as_str(), high.as_str());

    debug_assert_eq!(key.matches(JOIN_BOUNDARY).count(), 1);

    Ok(ConversationId { low: low.clone(), high: high.clone(), key })
}

/// Source of the signed-in viewer's identity.
///
/// Implemented by the authentication collaborator. `None` means nobody is
/// signed in.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Currently signed-in user.
    fn current_user(&self) -> Option<UserId>;
}

/// Identity provider pinned to one user, or to nobody.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<UserId>);

impl StaticIdentity {
    /// Provider that always reports `user`.
    pub fn signed_in(user: UserId) -> Self {
        Self(Some(user))
    }

    /// Provider that never reports a user.
    pub fn signed_out() -> Self {
        Self(None)
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<UserId> {
        self.0.clone()
    }
}
