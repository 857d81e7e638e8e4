//! Observable state snapshots for invariant checking.
//!
//! A snapshot is parsed from a [`MemoryStore`](duochat_core::MemoryStore)
//! dump so every check sees one consistent view of the shared tree. Parsing
//! is lenient: records that do not have the expected shape are collected in
//! `malformed` instead of failing the capture.

use std::collections::{BTreeMap, BTreeSet};

use duochat_core::store::parse_key;
use serde::Serialize;
use serde_json::Value;

/// Snapshot of the whole shared store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemSnapshot {
    /// Presence per user id.
    pub presence: BTreeMap<String, PresenceSnapshot>,
    /// Messages per conversation key, then per message key.
    pub conversations: BTreeMap<String, BTreeMap<String, MessageSnapshot>>,
    /// Roster entries per viewer, then per partner.
    pub roster: BTreeMap<String, BTreeMap<String, RosterSnapshot>>,
    /// Block edges as `(blocker, blocked)`.
    pub blocks: BTreeSet<(String, String)>,
    /// Messages as seen by the previous snapshot, keyed by
    /// [`history_key`].
    pub history: BTreeMap<String, MessageSnapshot>,
    /// Paths whose records could not be parsed, with the reason.
    pub malformed: Vec<(String, String)>,
}

/// Presence record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceSnapshot {
    /// `isActive`.
    pub is_active: bool,
    /// `lastSeenAt`, `None` when null or absent.
    pub last_seen_at: Option<u64>,
}

/// Message record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSnapshot {
    /// Author.
    pub sender_id: String,
    /// Stored text.
    pub text: String,
    /// Sender's clock.
    pub sent_at: u64,
    /// Seen flag.
    pub seen: bool,
}

/// Roster record. The counter is signed so a negative value is observable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterSnapshot {
    /// Newest message key, if any message was recorded.
    pub last_message_id: Option<String>,
    /// Unread counter.
    pub unread_count: i64,
}

impl SystemSnapshot {
    /// Empty store.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a full store dump.
    pub fn from_dump(root: &Value) -> Self {
        let mut snapshot = Self::default();

        for (uid, body) in children(root, "presence") {
            match parse_presence(body) {
                Some(presence) => {
                    snapshot.presence.insert(uid.clone(), presence);
                },
                None => snapshot.flag(format!("/presence/{uid}"), "bad presence shape"),
            }
        }

        for (conversation, room) in children(root, "rooms") {
            let mut messages = BTreeMap::new();
            for (key, body) in children(room, "messages") {
                let path = format!("/rooms/{conversation}/messages/{key}");
                if parse_key(key).is_none() {
                    snapshot.flag(path, "key is not a 20-digit sequence number");
                    continue;
                }
                match parse_message(body) {
                    Some(message) => {
                        messages.insert(key.clone(), message);
                    },
                    None => snapshot.flag(path, "bad message shape"),
                }
            }
            snapshot.conversations.insert(conversation.clone(), messages);
        }

        for (viewer, partners) in children(root, "roster") {
            let mut entries = BTreeMap::new();
            for (partner, body) in partners.as_object().into_iter().flatten() {
                match parse_roster(body) {
                    Some(entry) => {
                        entries.insert(partner.clone(), entry);
                    },
                    None => snapshot.flag(format!("/roster/{viewer}/{partner}"), "bad roster shape"),
                }
            }
            snapshot.roster.insert(viewer.clone(), entries);
        }

        for (blocker, edges) in children(root, "blocks") {
            for (blocked, flag) in edges.as_object().into_iter().flatten() {
                if flag.as_bool() == Some(true) {
                    snapshot.blocks.insert((blocker.clone(), blocked.clone()));
                } else {
                    snapshot.flag(format!("/blocks/{blocker}/{blocked}"), "edge is not `true`");
                }
            }
        }

        snapshot
    }

    /// Carry the messages of `previous` forward so history checks can
    /// compare the two observations.
    pub fn record_history(&mut self, previous: &Self) {
        for (conversation, messages) in &previous.conversations {
            for (key, message) in messages {
                self.history.insert(history_key(conversation, key), message.clone());
            }
        }
    }

    /// Look up a message.
    pub fn message(&self, conversation: &str, key: &str) -> Option<&MessageSnapshot> {
        self.conversations.get(conversation)?.get(key)
    }

    /// Total messages across every conversation.
    pub fn message_count(&self) -> usize {
        self.conversations.values().map(BTreeMap::len).sum()
    }

    /// Pretty JSON for failure reports.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|err| format!("<unserializable: {err}>"))
    }

    fn flag(&mut self, path: String, reason: &str) {
        self.malformed.push((path, reason.to_string()));
    }
}

/// Key of a message in [`SystemSnapshot::history`].
pub fn history_key(conversation: &str, key: &str) -> String {
    format!("{conversation}/{key}")
}

fn children<'a>(node: &'a Value, name: &str) -> impl Iterator<Item = (&'a String, &'a Value)> {
    node.get(name).and_then(Value::as_object).into_iter().flatten()
}

fn parse_presence(body: &Value) -> Option<PresenceSnapshot> {
    let is_active = body.get("isActive")?.as_bool()?;
    let last_seen_at = match body.get("lastSeenAt") {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.as_u64()?),
    };
    Some(PresenceSnapshot { is_active, last_seen_at })
}

fn parse_message(body: &Value) -> Option<MessageSnapshot> {
    Some(MessageSnapshot {
        sender_id: body.get("senderId")?.as_str()?.to_string(),
        text: body.get("text")?.as_str()?.to_string(),
        sent_at: body.get("sentAt")?.as_u64()?,
        seen: body.get("seen").map_or(Some(false), Value::as_bool)?,
    })
}

fn parse_roster(body: &Value) -> Option<RosterSnapshot> {
    let last_message_id = match body.get("lastMessageId") {
        None => None,
        Some(value) => Some(value.as_str()?.to_string()),
    };
    let unread_count = match body.get("unreadCount") {
        None => 0,
        Some(value) => value.as_i64()?,
    };
    Some(RosterSnapshot { last_message_id, unread_count })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn empty_snapshot() {
        let snapshot = SystemSnapshot::from_dump(&json!({}));
        assert_eq!(snapshot.message_count(), 0);
        assert!(snapshot.malformed.is_empty());
    }

    #[test]
    fn parses_every_section() {
        let dump = json!({
            "presence": {
                "alice": { "isActive": true, "lastSeenAt": null },
                "bob": { "isActive": false, "lastSeenAt": 7 },
            },
            "rooms": { "alice~bob": { "messages": {
                "00000000000000000000": { "senderId": "alice", "text": "hi", "sentAt": 5 },
            }}},
            "roster": { "bob": { "alice": { "lastMessageId": "00000000000000000000", "unreadCount": 1 } } },
            "blocks": { "bob": { "alice": true } },
        });

        let snapshot = SystemSnapshot::from_dump(&dump);

        assert!(snapshot.malformed.is_empty(), "{:?}", snapshot.malformed);
        assert!(snapshot.presence["alice"].is_active);
        assert_eq!(snapshot.presence["bob"].last_seen_at, Some(7));
        assert_eq!(snapshot.message("alice~bob", "00000000000000000000").map(|m| m.seen), Some(false));
        assert_eq!(snapshot.roster["bob"]["alice"].unread_count, 1);
        assert!(snapshot.blocks.contains(&("bob".to_string(), "alice".to_string())));
    }

    #[test]
    fn bad_records_are_flagged_not_dropped_silently() {
        let dump = json!({
            "rooms": { "a~b": { "messages": {
                "-legacy": { "senderId": "a", "text": "x", "sentAt": 1 },
                "00000000000000000001": { "text": "no sender" },
            }}},
        });

        let snapshot = SystemSnapshot::from_dump(&dump);

        assert_eq!(snapshot.malformed.len(), 2);
        assert_eq!(snapshot.message_count(), 0);
    }

    #[test]
    fn history_carries_previous_messages() {
        let first = SystemSnapshot::from_dump(&json!({
            "rooms": { "a~b": { "messages": {
                "00000000000000000000": { "senderId": "a", "text": "x", "sentAt": 1, "seen": true },
            }}},
        }));
        let mut second = SystemSnapshot::empty();
        second.record_history(&first);

        assert_eq!(second.history.len(), 1);
        assert!(second.to_json().contains("\"history\""));
    }
}
