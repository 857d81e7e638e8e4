//! Typed store paths.
//!
//! Every store location is built from validated [`PathSegment`]s, never from
//! string concatenation. A segment can't contain the path separator or any
//! other character the store reserves, so two different segment lists always
//! render to two different paths.

use std::fmt;

use crate::{
    identity::{ConversationId, UserId},
    store::StoreError,
};

/// Separator between rendered path segments.
pub const SEPARATOR: char = '/';

/// Characters the store refuses inside a single key.
pub const RESERVED_CHARS: [char; 6] = ['/', '.', '#', '$', '[', ']'];

/// Longest accepted segment, in bytes.
pub const MAX_SEGMENT_LEN: usize = 768;

/// One validated component of a [`StorePath`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathSegment(String);

impl PathSegment {
    /// Validate and wrap a segment.
    pub fn new(raw: impl Into<String>) -> Result<Self, StoreError> {
        let raw = raw.into();
        if let Some(reason) = segment_violation(&raw) {
            return Err(StoreError::InvalidPath(format!("{raw:?}: {reason}")));
        }
        Ok(Self(raw))
    }

    /// Segment known to be valid at compile time (layout literals).
    pub(crate) fn fixed(raw: &'static str) -> Self {
        debug_assert!(segment_violation(raw).is_none(), "invalid fixed segment {raw:?}");
        Self(raw.to_string())
    }

    /// Segment as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&UserId> for PathSegment {
    fn from(user: &UserId) -> Self {
        // UserId validation is a superset of segment validation.
        Self(user.as_str().to_string())
    }
}

impl From<&ConversationId> for PathSegment {
    fn from(conversation: &ConversationId) -> Self {
        Self(conversation.key().to_string())
    }
}

/// Reason a raw segment is rejected, if any.
pub(crate) fn segment_violation(raw: &str) -> Option<&'static str> {
    if raw.is_empty() {
        return Some("empty segment");
    }
    if raw.len() > MAX_SEGMENT_LEN {
        return Some("segment too long");
    }
    if raw.chars().any(|c| RESERVED_CHARS.contains(&c)) {
        return Some("contains a reserved character");
    }
    if raw.chars().any(char::is_control) {
        return Some("contains a control character");
    }
    None
}

/// Location of a node in the store tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorePath {
    segments: Vec<PathSegment>,
}

impl StorePath {
    /// The tree root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a rendered path such as `"users/alice"`.
    ///
    /// Leading and trailing separators are ignored. Empty interior segments
    /// (`"a//b"`) are rejected.
    pub fn parse(rendered: &str) -> Result<Self, StoreError> {
        let trimmed = rendered.trim_matches(SEPARATOR);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let segments =
            trimmed.split(SEPARATOR).map(PathSegment::new).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    /// Child path, validating the new segment.
    pub fn child(&self, raw: impl Into<String>) -> Result<Self, StoreError> {
        Ok(self.join(PathSegment::new(raw)?))
    }

    /// Child path from an already validated segment.
    #[must_use]
    pub fn join(&self, segment: impl Into<PathSegment>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Path segments from the root down.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Final segment. `None` for the root.
    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// Parent path. `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, init) = self.segments.split_last()?;
        Some(Self { segments: init.to_vec() })
    }

    /// Check if `self` is `other` or one of its ancestors.
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// Check if the two paths lie on one root-to-leaf line.
    ///
    /// A write at one of them changes the value observed at the other.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }

    /// Check if this is the tree root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            f.write_str(segment.as_str())?;
        }
        Ok(())
    }
}

/// Store layout for every record the core reads or writes.
pub mod layout {
    use super::{PathSegment, StorePath};
    use crate::{
        identity::{ConversationId, UserId},
        store::StoreError,
    };

    /// All user profiles.
    pub fn users() -> StorePath {
        StorePath::root().join(PathSegment::fixed("users"))
    }

    /// One user profile.
    pub fn user(user: &UserId) -> StorePath {
        users().join(user)
    }

    /// One user's presence record.
    pub fn presence(user: &UserId) -> StorePath {
        StorePath::root().join(PathSegment::fixed("presence")).join(user)
    }

    /// Ordered message log of a conversation.
    pub fn messages(conversation: &ConversationId) -> StorePath {
        StorePath::root()
            .join(PathSegment::fixed("rooms"))
            .join(conversation)
            .join(PathSegment::fixed("messages"))
    }

    /// A single message.
    pub fn message(conversation: &ConversationId, key: &PathSegment) -> StorePath {
        messages(conversation).join(key.clone())
    }

    /// A single message's `seen` flag.
    pub fn message_seen(conversation: &ConversationId, key: &PathSegment) -> StorePath {
        message(conversation, key).join(PathSegment::fixed("seen"))
    }

    /// All roster records of a viewer.
    pub fn roster(viewer: &UserId) -> StorePath {
        StorePath::root().join(PathSegment::fixed("roster")).join(viewer)
    }

    /// The viewer's roster record for one partner.
    pub fn roster_entry(viewer: &UserId, partner: &UserId) -> StorePath {
        roster(viewer).join(partner)
    }

    /// Unread counter inside the roster record.
    pub fn unread_counter(viewer: &UserId, partner: &UserId) -> StorePath {
        roster_entry(viewer, partner).join(PathSegment::fixed("unreadCount"))
    }

    /// Directed block edge.
    pub fn block_edge(blocker: &UserId, blocked: &UserId) -> StorePath {
        StorePath::root().join(PathSegment::fixed("blocks")).join(blocker).join(blocked)
    }

    /// Moderation reports.
    pub fn reports() -> StorePath {
        StorePath::root().join(PathSegment::fixed("reports"))
    }

    /// Marker recording that a legacy room pair was imported.
    pub fn migration_marker(conversation: &ConversationId) -> StorePath {
        StorePath::root().join(PathSegment::fixed("migrations")).join(conversation)
    }

    /// Legacy per-direction room (`owner` concatenated with `partner`).
    ///
    /// Concatenation may exceed the segment length limit, hence fallible.
    pub fn legacy_room(owner: &UserId, partner: &UserId) -> Result<StorePath, StoreError> {
        StorePath::root()
            .join(PathSegment::fixed("chatsRooms"))
            .child(format!("{}{}", owner.as_str(), partner.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        let path = StorePath::parse("/users/alice/").expect("parse failed");
        assert_eq!(path.segments().len(), 2);
        assert_eq!(path.to_string(), "users/alice");
        assert_eq!(StorePath::root().to_string(), "/");
    }

    #[test]
    fn reserved_characters_are_rejected() {
        for bad in ["a/b", "a.b", "a#b", "a$b", "a[b", "a]b", "", "a\nb"] {
            assert!(PathSegment::new(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(StorePath::parse("a//b").is_err());
    }

    #[test]
    fn prefix_and_overlap() {
        let parent = StorePath::parse("roster/alice").expect("parse failed");
        let child = StorePath::parse("roster/alice/bob/unreadCount").expect("parse failed");
        let sibling = StorePath::parse("roster/bob").expect("parse failed");

        assert!(parent.is_prefix_of(&child));
        assert!(!child.is_prefix_of(&parent));
        assert!(parent.overlaps(&child));
        assert!(child.overlaps(&parent));
        assert!(!parent.overlaps(&sibling));
        assert!(StorePath::root().overlaps(&sibling));
    }

    #[test]
    fn parent_walks_up() {
        let path = StorePath::parse("a/b/c").expect("parse failed");
        let parent = path.parent().expect("has parent");
        assert_eq!(parent.to_string(), "a/b");
        assert_eq!(path.last().map(PathSegment::as_str), Some("c"));
        assert!(StorePath::root().parent().is_none());
    }

    #[test]
    fn layout_paths() {
        let alice = UserId::new("alice").expect("valid");
        let bob = UserId::new("bob").expect("valid");

        assert_eq!(layout::unread_counter(&alice, &bob).to_string(), "roster/alice/bob/unreadCount");
        assert_eq!(layout::block_edge(&bob, &alice).to_string(), "blocks/bob/alice");
        assert_eq!(
            layout::legacy_room(&alice, &bob).expect("valid").to_string(),
            "chatsRooms/alicebob"
        );
    }
}
