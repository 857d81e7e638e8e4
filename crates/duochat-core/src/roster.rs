//! Denormalized conversation lists.
//!
//! Each user has one [`RosterRecord`] per partner. After a successful append
//! both participants' records are updated in a transaction that never moves
//! the last-message pointer backwards, so a late update for an older message
//! is dropped. The unread counter inside the record is owned by
//! [`UnseenStateReconciler`](crate::UnseenStateReconciler) and carried over
//! untouched.

use std::{
    cmp::Ordering,
    sync::{
        Arc,
        atomic::{self, AtomicBool},
    },
};

use futures::StreamExt;
use serde_json::Value;

use crate::{
    config::RetryPolicy,
    directory::UserDirectory,
    env::Environment,
    error::ChatError,
    identity::{ConversationId, UserId},
    path::layout,
    presence::PresenceTracker,
    records::{Message, RosterRecord, decode_roster, preview},
    retry::retry_idempotent,
    store::{Liveness, Store, Watch},
};

/// One row of a user's conversation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    /// The other participant
    pub partner: UserId,
    /// Partner's display name, or the uid if no profile exists
    pub partner_name: String,
    /// Truncated text of the newest message
    pub last_message_preview: Option<String>,
    /// Sender's clock for the newest message
    pub last_message_at: Option<u64>,
    /// Messages the viewer has not opened
    pub unread_count: u64,
    /// Partner is currently online
    pub online: bool,
}

impl RosterEntry {
    /// Case-insensitive match on the partner name or the preview.
    pub fn matches(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        self.partner_name.to_lowercase().contains(&term)
            || self.last_message_preview.as_ref().is_some_and(|p| p.to_lowercase().contains(&term))
    }
}

/// Newest conversation first, ties by partner id, conversations without a
/// message last.
pub fn roster_order(a: &RosterEntry, b: &RosterEntry) -> Ordering {
    match (a.last_message_at, b.last_message_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.partner.cmp(&b.partner))
}

/// Entries whose partner name or preview contains `term`.
pub fn search<'a>(entries: &'a [RosterEntry], term: &str) -> Vec<&'a RosterEntry> {
    entries.iter().filter(|entry| entry.matches(term)).collect()
}

/// Maintains and reads roster records.
#[derive(Clone)]
pub struct RosterMaterializer<S: Store, E: Environment> {
    store: S,
    env: E,
    directory: UserDirectory<S, E>,
    presence: PresenceTracker<S, E>,
    preview_max_chars: usize,
    retry: RetryPolicy,
}

impl<S: Store, E: Environment> RosterMaterializer<S, E> {
    /// Create a materializer.
    pub fn new(
        store: S,
        env: E,
        directory: UserDirectory<S, E>,
        presence: PresenceTracker<S, E>,
        preview_max_chars: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self { store, env, directory, presence, preview_max_chars, retry }
    }

    /// Point both participants' records at `message`.
    ///
    /// Idempotent, and a no-op for a message older than the one already
    /// recorded.
    pub async fn record_message(
        &self,
        conversation: &ConversationId,
        message: &Message,
    ) -> Result<(), ChatError> {
        let (low, high) = conversation.participants();
        let text = preview(&message.text, self.preview_max_chars);

        for (viewer, partner) in [(low, high), (high, low)] {
            let path = layout::roster_entry(viewer, partner);
            let path = &path;
            let text = &text;

            let malformed = Arc::new(AtomicBool::new(false));

            let outcome = retry_idempotent(&self.env, &self.retry, "roster.record", || {
                let id = message.id.as_str().to_string();
                let text = text.clone();
                let at = message.sent_at;
                let malformed = Arc::clone(&malformed);
                async move {
                    let update = move |current: Option<&Value>| {
                        let decoded = current.map(|value| serde_json::from_value::<RosterRecord>(value.clone()));
                        malformed.store(matches!(decoded, Some(Err(_))), atomic::Ordering::SeqCst);
                        let mut record: RosterRecord = match decoded {
                            Some(Ok(record)) => record,
                            Some(Err(_)) => return None,
                            None => RosterRecord::default(),
                        };
                        if record.last_message_id.as_deref().is_some_and(|last| last >= id.as_str()) {
                            return None;
                        }
                        record.last_message_id = Some(id.clone());
                        record.last_message_preview = Some(text.clone());
                        record.last_message_at = Some(at);
                        serde_json::to_value(record).ok()
                    };
                    Ok(self.store.transaction(path, Box::new(update)).await?)
                }
            })
            .await?;

            if malformed.load(atomic::Ordering::SeqCst) {
                tracing::warn!(%conversation, %viewer, key = %message.id, "Malformed roster record left untouched");
            } else if !outcome.committed {
                tracing::debug!(%conversation, %viewer, key = %message.id, "Roster already newer");
            }
        }

        Ok(())
    }

    /// `user`'s conversation list, ordered by [`roster_order`].
    pub async fn roster(&self, user: &UserId) -> Result<Vec<RosterEntry>, ChatError> {
        let path = layout::roster(user);
        let path = &path;

        let records = retry_idempotent(&self.env, &self.retry, "roster.read", || async move {
            decode_roster(path, self.store.read(path).await?)
        })
        .await?;

        self.materialize(records).await
    }

    /// Stream of `user`'s list, re-materialized on every roster change.
    pub async fn watch(&self, user: &UserId) -> Result<RosterWatch<S, E>, ChatError> {
        let path = layout::roster(user);
        let path = &path;

        let subscription = retry_idempotent(&self.env, &self.retry, "roster.subscribe", || {
            async move { Ok(self.store.subscribe(path).await?) }
        })
        .await?;

        Ok(RosterWatch { records: Watch::new(subscription, decode_roster), roster: self.clone() })
    }

    async fn materialize(
        &self,
        records: Vec<(UserId, RosterRecord)>,
    ) -> Result<Vec<RosterEntry>, ChatError> {
        let mut entries = Vec::with_capacity(records.len());
        for (partner, record) in records {
            let partner_name = self
                .directory
                .get(&partner)
                .await?
                .map_or_else(|| partner.to_string(), |profile| profile.name);
            let online = self.presence.current(&partner).await?.is_active();

            entries.push(RosterEntry {
                partner,
                partner_name,
                last_message_preview: record.last_message_preview,
                last_message_at: record.last_message_at,
                unread_count: record.unread_count,
                online,
            });
        }
        entries.sort_by(roster_order);
        Ok(entries)
    }
}

/// Live conversation list of one user.
pub struct RosterWatch<S: Store, E: Environment> {
    records: Watch<Vec<(UserId, RosterRecord)>>,
    roster: RosterMaterializer<S, E>,
}

impl<S: Store, E: Environment> RosterWatch<S, E> {
    /// Next materialized list. `None` once cancelled or closed.
    pub async fn next(&mut self) -> Option<Result<Vec<RosterEntry>, ChatError>> {
        let records = match self.records.next().await? {
            Ok(records) => records,
            Err(err) => return Some(Err(err)),
        };
        Some(self.roster.materialize(records).await)
    }

    /// Clone of the liveness token.
    pub fn liveness(&self) -> Liveness {
        self.records.liveness()
    }

    /// Stop yielding lists.
    pub fn cancel(&self) {
        self.records.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        blocks::BlockRegistry, env::SystemEnv, identity::derive_id, message_log::MessageLog,
        records::UserProfile, store::MemoryStore,
    };

    type Mem = MemoryStore<SystemEnv>;

    struct Fixture {
        store: Mem,
        log: MessageLog<Mem, SystemEnv>,
        roster: RosterMaterializer<Mem, SystemEnv>,
        directory: UserDirectory<Mem, SystemEnv>,
        presence: PresenceTracker<Mem, SystemEnv>,
    }

    fn fixture(preview_max_chars: usize) -> Fixture {
        let env = SystemEnv::new();
        let store = MemoryStore::new(env.clone());
        let retry = RetryPolicy::none();
        let directory = UserDirectory::new(store.clone(), env.clone(), retry);
        let presence = PresenceTracker::new(store.clone(), env.clone(), retry);
        let blocks = BlockRegistry::new(store.clone(), env.clone(), retry);
        let log = MessageLog::new(store.clone(), env.clone(), blocks, retry);
        let roster = RosterMaterializer::new(
            store.clone(),
            env,
            directory.clone(),
            presence.clone(),
            preview_max_chars,
            retry,
        );
        Fixture { store, log, roster, directory, presence }
    }

    fn uid(raw: &str) -> UserId {
        UserId::new(raw).expect("valid uid")
    }

    fn entry(partner: &str, at: Option<u64>) -> RosterEntry {
        RosterEntry {
            partner: uid(partner),
            partner_name: partner.to_string(),
            last_message_preview: None,
            last_message_at: at,
            unread_count: 0,
            online: false,
        }
    }

    #[test]
    fn ordering() {
        let mut entries =
            vec![entry("dave", None), entry("carol", Some(5)), entry("bob", Some(9)), entry("abe", Some(5))];
        entries.sort_by(roster_order);

        let order: Vec<_> = entries.iter().map(|e| e.partner.as_str()).collect();
        assert_eq!(order, ["bob", "abe", "carol", "dave"]);
    }

    #[test]
    fn search_is_case_insensitive() {
        let mut with_preview = entry("bob", Some(1));
        with_preview.last_message_preview = Some("See you Tomorrow".to_string());
        let entries = vec![entry("Alice", None), with_preview];

        assert_eq!(search(&entries, "ALI").len(), 1);
        assert_eq!(search(&entries, "tomorrow").len(), 1);
        assert_eq!(search(&entries, "zzz").len(), 0);
    }

    #[tokio::test]
    async fn both_sides_are_updated() {
        let f = fixture(60);
        let (alice, bob) = (uid("alice"), uid("bob"));
        let room = derive_id(&alice, &bob).expect("derive");
        f.directory.register(&UserProfile::new(alice.clone(), "Alice")).await.expect("register");
        f.presence.set_active(&alice).await.expect("presence");

        let message = f.log.append(&room, &alice, "hi").await.expect("append");
        f.roster.record_message(&room, &message).await.expect("record");

        let bobs = f.roster.roster(&bob).await.expect("roster");
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].partner_name, "Alice");
        assert_eq!(bobs[0].last_message_preview.as_deref(), Some("hi"));
        assert!(bobs[0].online);

        let alices = f.roster.roster(&alice).await.expect("roster");
        assert_eq!(alices[0].partner_name, "bob");
        assert!(!alices[0].online);
    }

    #[tokio::test]
    async fn older_message_never_regresses() {
        let f = fixture(60);
        let (alice, bob) = (uid("alice"), uid("bob"));
        let room = derive_id(&alice, &bob).expect("derive");

        let first = f.log.append(&room, &alice, "first").await.expect("append");
        let second = f.log.append(&room, &bob, "second").await.expect("append");

        f.roster.record_message(&room, &second).await.expect("record");
        f.roster.record_message(&room, &first).await.expect("record");

        let entries = f.roster.roster(&alice).await.expect("roster");
        assert_eq!(entries[0].last_message_preview.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn malformed_record_is_left_alone() {
        let f = fixture(60);
        let (alice, bob) = (uid("alice"), uid("bob"));
        let room = derive_id(&alice, &bob).expect("derive");
        let garbage = serde_json::json!({ "lastMessageAt": "yesterday" });
        f.store.write(&layout::roster_entry(&bob, &alice), garbage.clone()).await.expect("seed");

        let message = f.log.append(&room, &alice, "hi").await.expect("append");
        f.roster.record_message(&room, &message).await.expect("record");

        let stored = f.store.read(&layout::roster_entry(&bob, &alice)).await.expect("read");
        assert_eq!(stored, Some(garbage));
        let alices = f.roster.roster(&alice).await.expect("roster");
        assert_eq!(alices[0].last_message_preview.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn unread_counter_is_preserved() {
        let f = fixture(60);
        let (alice, bob) = (uid("alice"), uid("bob"));
        let room = derive_id(&alice, &bob).expect("derive");

        f.store
            .write(&layout::unread_counter(&bob, &alice), Value::from(4))
            .await
            .expect("seed counter");

        let message = f.log.append(&room, &alice, "hi").await.expect("append");
        f.roster.record_message(&room, &message).await.expect("record");

        assert_eq!(f.roster.roster(&bob).await.expect("roster")[0].unread_count, 4);
    }

    #[tokio::test]
    async fn preview_is_truncated() {
        let f = fixture(4);
        let (alice, bob) = (uid("alice"), uid("bob"));
        let room = derive_id(&alice, &bob).expect("derive");

        let message = f.log.append(&room, &alice, "hello there").await.expect("append");
        f.roster.record_message(&room, &message).await.expect("record");

        let entries = f.roster.roster(&bob).await.expect("roster");
        assert_eq!(entries[0].last_message_preview.as_deref(), Some("hell…"));
    }

    #[tokio::test]
    async fn watch_rematerializes() {
        let f = fixture(60);
        let (alice, bob) = (uid("alice"), uid("bob"));
        let room = derive_id(&alice, &bob).expect("derive");

        let mut watch = f.roster.watch(&bob).await.expect("watch");
        assert_eq!(watch.next().await, Some(Ok(Vec::new())));

        let message = f.log.append(&room, &alice, "hi").await.expect("append");
        f.roster.record_message(&room, &message).await.expect("record");

        let entries = watch.next().await.expect("delivery").expect("materialize");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].partner, alice);

        watch.cancel();
        assert_eq!(watch.next().await, None);
    }
}
