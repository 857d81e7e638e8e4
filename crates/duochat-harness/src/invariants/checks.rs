//! Standard invariant checks.
//!
//! Each check reads one [`SystemSnapshot`] and states a property of the
//! shared tree that must hold after any interleaving of client operations.

use super::{Invariant, InvariantResult, SystemSnapshot, Violation, snapshot::history_key};

/// Every record in the store parses.
pub struct WellFormedRecords;

impl Invariant for WellFormedRecords {
    fn name(&self) -> &'static str {
        "well_formed_records"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        match state.malformed.first() {
            Some((path, reason)) => Err(Violation {
                invariant: self.name(),
                message: format!("{path}: {reason} ({} malformed in total)", state.malformed.len()),
            }),
            None => Ok(()),
        }
    }
}

/// An active user has no `lastSeenAt`; an inactive one has one.
pub struct PresenceConsistency;

impl Invariant for PresenceConsistency {
    fn name(&self) -> &'static str {
        "presence_consistency"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (uid, presence) in &state.presence {
            if presence.is_active == presence.last_seen_at.is_some() {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "user {uid}: isActive={} with lastSeenAt={:?}",
                        presence.is_active, presence.last_seen_at
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Unread counters never drop below zero.
pub struct UnreadNonNegative;

impl Invariant for UnreadNonNegative {
    fn name(&self) -> &'static str {
        "unread_non_negative"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (viewer, entries) in &state.roster {
            for (partner, entry) in entries {
                if entry.unread_count < 0 {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "roster {viewer}/{partner}: unreadCount {}",
                            entry.unread_count
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Only the two participants write into a conversation.
pub struct ParticipantsOnly;

impl Invariant for ParticipantsOnly {
    fn name(&self) -> &'static str {
        "participants_only"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (conversation, messages) in &state.conversations {
            let Some((low, high)) = conversation.split_once('~') else {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("conversation key {conversation:?} has no participant pair"),
                });
            };
            if low >= high {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("conversation key {conversation:?} is not in canonical order"),
                });
            }
            for (key, message) in messages {
                if message.sender_id != low && message.sender_id != high {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "{conversation}/{key}: sender {} is not a participant",
                            message.sender_id
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A roster entry's `lastMessageId` names a message that exists in the
/// conversation between viewer and partner.
pub struct RosterPointsAtExistingMessage;

impl Invariant for RosterPointsAtExistingMessage {
    fn name(&self) -> &'static str {
        "roster_points_at_existing_message"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (viewer, entries) in &state.roster {
            for (partner, entry) in entries {
                let Some(last) = &entry.last_message_id else { continue };
                let conversation = if viewer < partner {
                    format!("{viewer}~{partner}")
                } else {
                    format!("{partner}~{viewer}")
                };
                if state.message(&conversation, last).is_none() {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "roster {viewer}/{partner}: lastMessageId {last} missing from {conversation}"
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Messages are append-only: once observed, a message keeps its sender,
/// text and timestamp, and is never removed.
pub struct MessagesImmutable;

impl Invariant for MessagesImmutable {
    fn name(&self) -> &'static str {
        "messages_immutable"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (conversation, messages) in &state.conversations {
            for (key, now) in messages {
                let Some(before) = state.history.get(&history_key(conversation, key)) else {
                    continue;
                };
                if (&before.sender_id, &before.text, before.sent_at)
                    != (&now.sender_id, &now.text, now.sent_at)
                {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("{conversation}/{key}: changed from {before:?} to {now:?}"),
                    });
                }
            }
        }

        let live = state.message_count();
        let previous = state.history.len();
        if live < previous {
            return Err(Violation {
                invariant: self.name(),
                message: format!("message count dropped from {previous} to {live}"),
            });
        }
        Ok(())
    }
}

/// A `seen` flag never goes back from true to false.
pub struct SeenNeverReverts;

impl Invariant for SeenNeverReverts {
    fn name(&self) -> &'static str {
        "seen_never_reverts"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (conversation, messages) in &state.conversations {
            for (key, now) in messages {
                let was_seen =
                    state.history.get(&history_key(conversation, key)).is_some_and(|m| m.seen);
                if was_seen && !now.seen {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("{conversation}/{key}: seen reverted to false"),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn snapshot(dump: serde_json::Value) -> SystemSnapshot {
        SystemSnapshot::from_dump(&dump)
    }

    #[test]
    fn active_with_last_seen_is_a_violation() {
        let state = snapshot(json!({
            "presence": { "alice": { "isActive": true, "lastSeenAt": 5 } },
        }));
        assert!(PresenceConsistency.check(&state).is_err());

        let state = snapshot(json!({
            "presence": { "alice": { "isActive": false, "lastSeenAt": null } },
        }));
        assert!(PresenceConsistency.check(&state).is_err());
    }

    #[test]
    fn negative_unread_is_a_violation() {
        let state = snapshot(json!({ "roster": { "bob": { "alice": { "unreadCount": -1 } } } }));
        assert!(UnreadNonNegative.check(&state).is_err());
    }

    #[test]
    fn outsider_message_is_a_violation() {
        let state = snapshot(json!({ "rooms": { "alice~bob": { "messages": {
            "00000000000000000000": { "senderId": "carol", "text": "x", "sentAt": 1 },
        }}}}));
        assert!(ParticipantsOnly.check(&state).is_err());
    }

    #[test]
    fn dangling_roster_pointer_is_a_violation() {
        let state = snapshot(json!({
            "roster": { "bob": { "alice": { "lastMessageId": "00000000000000000003" } } },
        }));
        assert!(RosterPointsAtExistingMessage.check(&state).is_err());
    }

    #[test]
    fn edited_or_unseen_message_is_a_violation() {
        let before = snapshot(json!({ "rooms": { "a~b": { "messages": {
            "00000000000000000000": { "senderId": "a", "text": "x", "sentAt": 1, "seen": true },
        }}}}));

        let mut edited = snapshot(json!({ "rooms": { "a~b": { "messages": {
            "00000000000000000000": { "senderId": "a", "text": "y", "sentAt": 1, "seen": true },
        }}}}));
        edited.record_history(&before);
        assert!(MessagesImmutable.check(&edited).is_err());
        assert!(SeenNeverReverts.check(&edited).is_ok());

        let mut reverted = snapshot(json!({ "rooms": { "a~b": { "messages": {
            "00000000000000000000": { "senderId": "a", "text": "x", "sentAt": 1, "seen": false },
        }}}}));
        reverted.record_history(&before);
        assert!(SeenNeverReverts.check(&reverted).is_err());

        let mut deleted = SystemSnapshot::empty();
        deleted.record_history(&before);
        assert!(MessagesImmutable.check(&deleted).is_err());
    }
}
