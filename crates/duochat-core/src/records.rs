//! Store records and the decoding boundary.
//!
//! Everything read from the store passes through [`decode`] (or one of the
//! typed decoders built on it) before the rest of the core sees it. A value
//! with the wrong shape becomes [`ChatError::Decode`] instead of a silently
//! defaulted field. Field names are camelCase on the wire.

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    error::ChatError,
    identity::{ConversationId, UserId},
    path::{PathSegment, StorePath},
};

const MINUTE_MS: u64 = 60_000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

/// Decode a present value.
pub fn decode<T: DeserializeOwned>(path: &StorePath, value: Value) -> Result<T, ChatError> {
    serde_json::from_value(value)
        .map_err(|err| ChatError::Decode { path: path.to_string(), reason: err.to_string() })
}

/// Decode a value that may be absent.
pub fn decode_optional<T: DeserializeOwned>(
    path: &StorePath,
    value: Option<Value>,
) -> Result<Option<T>, ChatError> {
    value.map(|value| decode(path, value)).transpose()
}

/// Encode a record for writing.
pub fn encode<T: Serialize>(path: &StorePath, record: &T) -> Result<Value, ChatError> {
    serde_json::to_value(record).map_err(|err| ChatError::Decode {
        path: path.to_string(),
        reason: format!("encode: {err}"),
    })
}

/// Public profile of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Stable identifier
    pub uid: UserId,
    /// Display name
    pub name: String,
    /// Reference to an uploaded avatar, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl UserProfile {
    /// Profile without an avatar.
    pub fn new(uid: UserId, name: impl Into<String>) -> Self {
        Self { uid, name: name.into(), avatar: None }
    }

    /// Single-character avatar fallback for users without an upload.
    pub fn initial(&self) -> char {
        self.name.chars().next().map_or('U', |c| c.to_uppercase().next().unwrap_or(c))
    }
}

/// Online state of one user.
///
/// An active user has no last-seen time. An inactive user carries the time of
/// its transition to inactive, or nothing if it was never seen at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PresenceWire", into = "PresenceWire")]
pub struct PresenceRecord {
    is_active: bool,
    last_seen_at: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresenceWire {
    is_active: bool,
    #[serde(default)]
    last_seen_at: Option<u64>,
}

impl TryFrom<PresenceWire> for PresenceRecord {
    type Error = &'static str;

    fn try_from(wire: PresenceWire) -> Result<Self, Self::Error> {
        match (wire.is_active, wire.last_seen_at) {
            (true, Some(_)) => Err("active presence must not carry lastSeenAt"),
            (false, None) => Err("inactive presence must carry lastSeenAt"),
            (is_active, last_seen_at) => Ok(Self { is_active, last_seen_at }),
        }
    }
}

impl From<PresenceRecord> for PresenceWire {
    fn from(record: PresenceRecord) -> Self {
        Self { is_active: record.is_active, last_seen_at: record.last_seen_at }
    }
}

impl PresenceRecord {
    /// Online now.
    pub fn active() -> Self {
        Self { is_active: true, last_seen_at: None }
    }

    /// Went offline at `at` (Unix millis).
    pub fn inactive(at: u64) -> Self {
        Self { is_active: false, last_seen_at: Some(at) }
    }

    /// No record stored for the user.
    pub fn never_seen() -> Self {
        Self { is_active: false, last_seen_at: None }
    }

    /// Check if the user is online.
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Time of the last transition to inactive.
    pub fn last_seen_at(&self) -> Option<u64> {
        self.last_seen_at
    }

    /// Human-readable status relative to `now_ms`.
    pub fn status(&self, now_ms: u64) -> PresenceStatus {
        if self.is_active {
            return PresenceStatus::Online;
        }
        let Some(seen) = self.last_seen_at else {
            return PresenceStatus::Offline;
        };

        let elapsed = now_ms.saturating_sub(seen);
        if elapsed < MINUTE_MS {
            PresenceStatus::JustNow
        } else if elapsed < HOUR_MS {
            PresenceStatus::MinutesAgo(elapsed / MINUTE_MS)
        } else if elapsed < DAY_MS {
            PresenceStatus::HoursAgo(elapsed / HOUR_MS)
        } else {
            PresenceStatus::DaysAgo(elapsed / DAY_MS)
        }
    }
}

/// Display label for a [`PresenceRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    /// Currently active
    Online,
    /// Left less than a minute ago
    JustNow,
    /// Left this many whole minutes ago
    MinutesAgo(u64),
    /// Left this many whole hours ago
    HoursAgo(u64),
    /// Left this many whole days ago
    DaysAgo(u64),
    /// Never seen
    Offline,
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn ago(f: &mut fmt::Formatter<'_>, n: u64, unit: &str) -> fmt::Result {
            let plural = if n == 1 { "" } else { "s" };
            write!(f, "{n} {unit}{plural} ago")
        }

        match self {
            Self::Online => f.write_str("Online"),
            Self::JustNow => f.write_str("Just now"),
            Self::MinutesAgo(n) => ago(f, *n, "minute"),
            Self::HoursAgo(n) => ago(f, *n, "hour"),
            Self::DaysAgo(n) => ago(f, *n, "day"),
            Self::Offline => f.write_str("Offline"),
        }
    }
}

/// Stored body of a message. The key lives in the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Author
    pub sender_id: UserId,
    /// Message text
    pub text: String,
    /// Sender's clock at send time (Unix millis). Display only.
    pub sent_at: u64,
    /// Delivered to the recipient's active device
    #[serde(default)]
    pub seen: bool,
    /// Key in the legacy mirrored rooms, for imported messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_key: Option<String>,
}

/// A message together with its ordered key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Store-assigned ordered key
    pub id: PathSegment,
    /// Author
    pub sender_id: UserId,
    /// Message text
    pub text: String,
    /// Sender's clock at send time (Unix millis)
    pub sent_at: u64,
    /// Delivered to the recipient's active device
    pub seen: bool,
}

impl Message {
    /// Combine a key with its stored body.
    pub fn from_record(id: PathSegment, record: MessageRecord) -> Self {
        Self {
            id,
            sender_id: record.sender_id,
            text: record.text,
            sent_at: record.sent_at,
            seen: record.seen,
        }
    }
}

/// Decode a whole message log, ordered by key.
pub fn decode_messages(path: &StorePath, value: Option<Value>) -> Result<Vec<Message>, ChatError> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let Value::Object(children) = value else {
        return Err(ChatError::Decode {
            path: path.to_string(),
            reason: "message log is not an object".to_string(),
        });
    };

    let mut messages = children
        .into_iter()
        .map(|(key, body)| {
            let id = PathSegment::new(key)?;
            let record = decode(&path.join(id.clone()), body)?;
            Ok(Message::from_record(id, record))
        })
        .collect::<Result<Vec<_>, ChatError>>()?;
    messages.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(messages)
}

/// Denormalized per-(viewer, partner) conversation summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterRecord {
    /// Key of the newest message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<String>,
    /// Truncated text of the newest message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_preview: Option<String>,
    /// Sender's clock for the newest message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<u64>,
    /// Messages the viewer has not opened yet
    #[serde(default)]
    pub unread_count: u64,
}

/// Decode every roster record of one viewer, keyed by partner.
pub fn decode_roster(
    path: &StorePath,
    value: Option<Value>,
) -> Result<Vec<(UserId, RosterRecord)>, ChatError> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let Value::Object(children) = value else {
        return Err(ChatError::Decode {
            path: path.to_string(),
            reason: "roster is not an object".to_string(),
        });
    };

    children
        .into_iter()
        .map(|(partner, body)| {
            let partner = UserId::new(partner)?;
            let record = decode(&path.join(&partner), body)?;
            Ok((partner, record))
        })
        .collect()
}

/// Decode a presence record. Absence means the user was never seen.
pub fn decode_presence(path: &StorePath, value: Option<Value>) -> Result<PresenceRecord, ChatError> {
    Ok(decode_optional(path, value)?.unwrap_or_else(PresenceRecord::never_seen))
}

/// Moderation report for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    /// Conversation key
    pub conversation_id: String,
    /// Who filed the report
    pub reporter_id: UserId,
    /// Author of the reported message
    pub sender_id: UserId,
    /// Key of the reported message
    pub message_id: String,
    /// Reported text
    pub text: String,
    /// When the message was sent
    pub sent_at: u64,
    /// When the report was filed
    pub reported_at: u64,
}

impl ReportRecord {
    /// Report `message` in `conversation` on behalf of `reporter`.
    pub fn new(
        conversation: &ConversationId,
        reporter: &UserId,
        message: &Message,
        reported_at: u64,
    ) -> Self {
        Self {
            conversation_id: conversation.key().to_string(),
            reporter_id: reporter.clone(),
            sender_id: message.sender_id.clone(),
            message_id: message.id.as_str().to_string(),
            text: message.text.clone(),
            sent_at: message.sent_at,
            reported_at,
        }
    }
}

/// First `max_chars` characters of `text`, with an ellipsis if cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() { format!("{head}…") } else { head }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn path(raw: &str) -> StorePath {
        StorePath::parse(raw).expect("valid path")
    }

    #[test]
    fn presence_invariant_is_enforced_on_decode() {
        let p = path("presence/alice");

        assert_eq!(
            decode_presence(&p, Some(json!({ "isActive": true }))).expect("decode"),
            PresenceRecord::active()
        );
        assert_eq!(
            decode_presence(&p, Some(json!({ "isActive": false, "lastSeenAt": 7 })))
                .expect("decode"),
            PresenceRecord::inactive(7)
        );
        assert!(matches!(
            decode_presence(&p, Some(json!({ "isActive": true, "lastSeenAt": 7 }))),
            Err(ChatError::Decode { .. })
        ));
        assert!(matches!(
            decode_presence(&p, Some(json!({ "isActive": false }))),
            Err(ChatError::Decode { .. })
        ));
        assert_eq!(decode_presence(&p, None).expect("decode"), PresenceRecord::never_seen());
    }

    #[test]
    fn active_presence_encodes_without_last_seen() {
        let value = encode(&path("presence/alice"), &PresenceRecord::active()).expect("encode");
        assert_eq!(value, json!({ "isActive": true, "lastSeenAt": null }));
    }

    #[test]
    fn status_labels() {
        let now = 10 * DAY_MS;

        assert_eq!(PresenceRecord::active().status(now).to_string(), "Online");
        assert_eq!(PresenceRecord::never_seen().status(now).to_string(), "Offline");
        assert_eq!(PresenceRecord::inactive(now - 5_000).status(now).to_string(), "Just now");
        assert_eq!(
            PresenceRecord::inactive(now - MINUTE_MS).status(now).to_string(),
            "1 minute ago"
        );
        assert_eq!(
            PresenceRecord::inactive(now - 3 * HOUR_MS).status(now).to_string(),
            "3 hours ago"
        );
        assert_eq!(
            PresenceRecord::inactive(now - 2 * DAY_MS - 1).status(now).to_string(),
            "2 days ago"
        );
        // Clock skew never yields a negative age.
        assert_eq!(PresenceRecord::inactive(now + 1).status(now), PresenceStatus::JustNow);
    }

    #[test]
    fn message_log_decodes_in_key_order() {
        let value = json!({
            "00000000000000000001": { "senderId": "bob", "text": "second", "sentAt": 1 },
            "00000000000000000000": { "senderId": "alice", "text": "first", "sentAt": 9, "seen": true },
        });

        let messages = decode_messages(&path("rooms/alice~bob/messages"), Some(value))
            .expect("decode");

        let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["first", "second"]);
        assert!(messages[0].seen);
        assert!(!messages[1].seen);
    }

    #[test]
    fn malformed_message_is_a_decode_error() {
        let value = json!({ "00000000000000000000": { "senderId": "alice", "text": 5 } });
        let err = decode_messages(&path("rooms/a~b/messages"), Some(value)).expect_err("must fail");
        assert!(matches!(err, ChatError::Decode { .. }));
    }

    #[test]
    fn negative_unread_count_is_rejected() {
        let value = json!({ "bob": { "unreadCount": -1 } });
        assert!(decode_roster(&path("roster/alice"), Some(value)).is_err());
    }

    #[test]
    fn preview_truncates_on_char_boundaries() {
        assert_eq!(preview("hi", 5), "hi");
        assert_eq!(preview("hello", 5), "hello");
        assert_eq!(preview("hello world", 5), "hello…");
        assert_eq!(preview("héllo wörld", 7), "héllo w…");
    }

    #[test]
    fn profile_initial_falls_back() {
        let uid = UserId::new("alice").expect("valid");
        assert_eq!(UserProfile::new(uid.clone(), "alice").initial(), 'A');
        assert_eq!(UserProfile::new(uid, "").initial(), 'U');
    }
}
