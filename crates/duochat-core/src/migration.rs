//! One-shot import of legacy mirrored rooms.
//!
//! Older clients wrote every message twice, once under
//! `chatsRooms/{sender}{receiver}` and once under
//! `chatsRooms/{receiver}{sender}`, with the same push key in both. The two
//! copies could disagree on `seen`. Import takes the union by legacy key,
//! treats a message as seen if either copy says so, orders by
//! `(timestamp, legacy key)` and appends to the canonical room in a single
//! transaction.
//!
//! Imported messages remember their legacy key, so an interrupted import can
//! be re-run without duplicates. A marker under `migrations/` short-circuits
//! later runs.
//!
//! Import only targets a canonical room that holds nothing but earlier
//! imports. A room the pair already chatted in is refused with
//! [`ChatError::MigrationConflict`], since appending older history after it
//! would break the `(timestamp, legacy key)` order.
//!
//! Once the batch lands, both rosters point at the newest imported message and
//! each side's unread counter covers the partner's unseen imports.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::{
    config::RetryPolicy,
    env::Environment,
    error::ChatError,
    identity::{ConversationId, UserId, derive_id},
    path::{StorePath, layout},
    records::{Message, MessageRecord, decode_messages, decode_optional, encode},
    retry::retry_idempotent,
    roster::RosterMaterializer,
    store::{Store, format_key, parse_key, server_timestamp},
};

/// Message shape written by the legacy clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyMessage {
    message: String,
    sender_id: UserId,
    timestamp: u64,
    #[serde(default)]
    seen: bool,
}

/// Outcome of [`LegacyRoomMigration::migrate_pair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    /// Messages appended to the canonical room by this run
    pub imported: usize,
    /// A marker from an earlier run was found and nothing was read
    pub already_migrated: bool,
}

/// Imports legacy rooms into canonical conversations.
#[derive(Clone)]
pub struct LegacyRoomMigration<S: Store, E: Environment> {
    store: S,
    env: E,
    roster: RosterMaterializer<S, E>,
    retry: RetryPolicy,
}

impl<S: Store, E: Environment> LegacyRoomMigration<S, E> {
    /// Create a migration over `store`.
    pub fn new(store: S, env: E, roster: RosterMaterializer<S, E>, retry: RetryPolicy) -> Self {
        Self { store, env, roster, retry }
    }

    /// Import the legacy rooms of `a` and `b`. Re-running is a no-op.
    ///
    /// Legacy messages whose sender is not one of the pair are skipped.
    ///
    /// # Errors
    ///
    /// [`ChatError::MigrationConflict`] if the canonical room already holds
    /// messages that were not imported. Nothing is written in that case.
    pub async fn migrate_pair(&self, a: &UserId, b: &UserId) -> Result<MigrationReport, ChatError> {
        let conversation = derive_id(a, b)?;
        let marker = layout::migration_marker(&conversation);

        if self.read(&marker).await?.is_some() {
            tracing::debug!(%conversation, "Legacy rooms already migrated");
            return Ok(MigrationReport { imported: 0, already_migrated: true });
        }

        let mut merged: BTreeMap<String, LegacyMessage> = BTreeMap::new();
        for (owner, partner) in [(a, b), (b, a)] {
            let path = layout::legacy_room(owner, partner)?;
            let room: Option<BTreeMap<String, LegacyMessage>> =
                decode_optional(&path, self.read(&path).await?)?;

            for (key, message) in room.into_iter().flatten() {
                merged
                    .entry(key)
                    .and_modify(|existing| existing.seen |= message.seen)
                    .or_insert(message);
            }
        }

        let pending = canonical_records(&conversation, merged)?;
        let imported = if pending.is_empty() {
            0
        } else {
            let imported = self.append_all(&conversation, &pending).await?;
            self.reconcile(&conversation).await?;
            imported
        };

        let marker_value = json!({ "importedAt": server_timestamp(), "imported": imported });
        let (marker, marker_value) = (&marker, &marker_value);
        retry_idempotent(&self.env, &self.retry, "migration.marker", || async move {
            Ok(self.store.write(marker, marker_value.clone()).await?)
        })
        .await?;

        tracing::info!(%conversation, imported, "Legacy rooms migrated");

        Ok(MigrationReport { imported, already_migrated: false })
    }

    /// Append every record whose legacy key is not in the log yet, in one
    /// transaction. Returns the number appended.
    async fn append_all(
        &self,
        conversation: &ConversationId,
        pending: &[(String, Value)],
    ) -> Result<usize, ChatError> {
        let path = layout::messages(conversation);
        let path = &path;
        let appended = Arc::new(AtomicUsize::new(0));
        let conflict = Arc::new(AtomicBool::new(false));

        retry_idempotent(&self.env, &self.retry, "migration.append", || {
            let pending = pending.to_vec();
            let appended = Arc::clone(&appended);
            let conflict = Arc::clone(&conflict);
            async move {
                let update = move |current: Option<&Value>| {
                    appended.store(0, Ordering::SeqCst);
                    let mut log = current.and_then(Value::as_object).cloned().unwrap_or_else(Map::new);

                    let native = log.values().any(|body| body.get("legacyKey").is_none());
                    conflict.store(native, Ordering::SeqCst);
                    if native {
                        return None;
                    }

                    let present: HashSet<&str> = log
                        .values()
                        .filter_map(|body| body.get("legacyKey").and_then(Value::as_str))
                        .collect();
                    let fresh: Vec<&(String, Value)> =
                        pending.iter().filter(|(key, _)| !present.contains(key.as_str())).collect();

                    let mut next = log.keys().filter_map(|k| parse_key(k)).max().map_or(0, |i| i + 1);
                    let mut additions = Vec::with_capacity(fresh.len());
                    for (_, record) in fresh {
                        additions.push((format_key(next), record.clone()));
                        next += 1;
                    }

                    appended.store(additions.len(), Ordering::SeqCst);
                    if additions.is_empty() {
                        return None;
                    }
                    log.extend(additions);
                    Some(Value::Object(log))
                };
                Ok(self.store.transaction(path, Box::new(update)).await?)
            }
        })
        .await?;

        if conflict.load(Ordering::SeqCst) {
            tracing::warn!(%conversation, "Canonical room already has messages, legacy import refused");
            return Err(ChatError::MigrationConflict { conversation: conversation.to_string() });
        }

        Ok(appended.load(Ordering::SeqCst))
    }

    /// Point both rosters at the newest import and raise each unread counter
    /// to the partner's unseen imports.
    ///
    /// The canonical log holds only imports at this point, so the counts are
    /// absolute and a resumed run converges to the same values.
    async fn reconcile(&self, conversation: &ConversationId) -> Result<(), ChatError> {
        let path = layout::messages(conversation);
        let path = &path;
        let messages = retry_idempotent(&self.env, &self.retry, "migration.history", || {
            async move { decode_messages(path, self.store.read(path).await?) }
        })
        .await?;

        let Some(newest) = messages.last() else {
            return Ok(());
        };
        self.roster.record_message(conversation, newest).await?;

        let (low, high) = conversation.participants();
        for (viewer, partner) in [(low, high), (high, low)] {
            let unseen = unseen_from(&messages, partner);
            if unseen == 0 {
                continue;
            }

            let counter = layout::unread_counter(viewer, partner);
            let counter = &counter;
            retry_idempotent(&self.env, &self.retry, "migration.unread", || async move {
                let update = move |current: Option<&Value>| {
                    let count = current.and_then(Value::as_u64).unwrap_or(0);
                    (count < unseen).then(|| Value::from(unseen))
                };
                Ok(self.store.transaction(counter, Box::new(update)).await?)
            })
            .await?;
            tracing::debug!(%conversation, %viewer, unseen, "Unread counter covers imports");
        }

        Ok(())
    }

    async fn read(&self, path: &StorePath) -> Result<Option<Value>, ChatError> {
        retry_idempotent(&self.env, &self.retry, "migration.read", || async move {
            Ok(self.store.read(path).await?)
        })
        .await
    }
}

fn unseen_from(messages: &[Message], sender: &UserId) -> u64 {
    messages.iter().filter(|m| &m.sender_id == sender && !m.seen).count() as u64
}

/// Ordered, encoded records ready to append.
fn canonical_records(
    conversation: &ConversationId,
    merged: BTreeMap<String, LegacyMessage>,
) -> Result<Vec<(String, Value)>, ChatError> {
    let mut ordered: Vec<(String, LegacyMessage)> = merged
        .into_iter()
        .filter(|(key, message)| {
            let member = conversation.includes(&message.sender_id);
            if !member {
                tracing::warn!(%conversation, key = %key, sender = %message.sender_id, "Skipping legacy message from outsider");
            }
            member
        })
        .collect();
    ordered.sort_by(|(ka, ma), (kb, mb)| ma.timestamp.cmp(&mb.timestamp).then_with(|| ka.cmp(kb)));

    let path = layout::messages(conversation);
    ordered
        .into_iter()
        .map(|(key, legacy)| {
            let record = MessageRecord {
                sender_id: legacy.sender_id,
                text: legacy.message,
                sent_at: legacy.timestamp,
                seen: legacy.seen,
                legacy_key: Some(key.clone()),
            };
            Ok((key, encode(&path, &record)?))
        })
        .collect()
}
