//! Unread counters and seen flags.
//!
//! Each (viewer, partner) pair has its own counter inside the viewer's roster
//! record. A new message either bumps the recipient's counter (recipient
//! offline) or is marked seen at once (recipient online). Opening the
//! conversation resets the counter and marks everything from the partner
//! seen. Every mutation is a store transaction, so concurrent senders never
//! lose an increment.

use serde_json::Value;

use crate::{
    config::RetryPolicy,
    env::Environment,
    error::ChatError,
    identity::{ConversationId, UserId, derive_id},
    message_log::MessageLog,
    path::layout,
    presence::PresenceTracker,
    records::{Message, decode, decode_roster},
    retry::retry_idempotent,
    store::Store,
};

/// Per-pair unread state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreadState {
    /// Nothing pending
    Idle,
    /// This many messages not yet opened
    Unread(u64),
}

impl UnreadState {
    /// State for a counter value.
    pub fn from_count(count: u64) -> Self {
        if count == 0 { Self::Idle } else { Self::Unread(count) }
    }

    /// Counter value.
    pub fn count(self) -> u64 {
        match self {
            Self::Idle => 0,
            Self::Unread(n) => n,
        }
    }
}

/// What happened to a freshly appended message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Recipient online: the message was marked seen
    Seen,
    /// Recipient offline: counter bumped to `unread`
    Queued {
        /// Recipient's counter after the increment
        unread: u64,
    },
}

/// Keeps unread counters and seen flags consistent.
#[derive(Clone)]
pub struct UnseenStateReconciler<S: Store, E: Environment> {
    store: S,
    env: E,
    presence: PresenceTracker<S, E>,
    log: MessageLog<S, E>,
    retry: RetryPolicy,
}

impl<S: Store, E: Environment> UnseenStateReconciler<S, E> {
    /// Create a reconciler.
    pub fn new(
        store: S,
        env: E,
        presence: PresenceTracker<S, E>,
        log: MessageLog<S, E>,
        retry: RetryPolicy,
    ) -> Self {
        Self { store, env, presence, log, retry }
    }

    /// React to a message that was just appended.
    ///
    /// The increment is not retried: a failure after the store applied it
    /// would double count. Marking seen is idempotent and is retried.
    pub async fn on_new_message(
        &self,
        conversation: &ConversationId,
        message: &Message,
    ) -> Result<Delivery, ChatError> {
        let sender = &message.sender_id;
        let recipient = conversation.partner_of(sender)?;

        if self.presence.current(recipient).await?.is_active() {
            self.log.mark_one_seen(conversation, &message.id).await?;
            tracing::debug!(%conversation, %recipient, "Recipient online, message seen");
            return Ok(Delivery::Seen);
        }

        let path = layout::unread_counter(recipient, sender);
        let outcome = self
            .store
            .transaction(
                &path,
                Box::new(|current: Option<&Value>| {
                    let count = current.and_then(Value::as_u64).unwrap_or(0);
                    Some(Value::from(count.saturating_add(1)))
                }),
            )
            .await?;

        let unread = outcome.value.as_ref().and_then(Value::as_u64).unwrap_or(0);
        debug_assert!(unread > 0);

        tracing::debug!(%conversation, %recipient, unread, "Recipient offline, unread bumped");
        Ok(Delivery::Queued { unread })
    }

    /// `viewer` opened the conversation with `partner`.
    ///
    /// Resets the viewer's counter to zero and marks every partner message
    /// seen. The partner's own counter is untouched. Returns the number of
    /// messages newly marked seen.
    pub async fn on_open_conversation(
        &self,
        viewer: &UserId,
        partner: &UserId,
    ) -> Result<usize, ChatError> {
        let conversation = derive_id(viewer, partner)?;
        let path = layout::unread_counter(viewer, partner);
        let path = &path;

        retry_idempotent(&self.env, &self.retry, "unseen.reset", || async move {
            let reset = |current: Option<&Value>| match current {
                // Absent or already zero: nothing to write.
                None => None,
                Some(value) if value.as_u64() == Some(0) => None,
                Some(_) => Some(Value::from(0u64)),
            };
            Ok(self.store.transaction(path, Box::new(reset)).await?)
        })
        .await?;

        let marked = self.log.mark_seen_from(&conversation, partner).await?;

        tracing::debug!(%conversation, %viewer, marked, "Conversation opened");
        Ok(marked)
    }

    /// `user` just came online.
    ///
    /// Marks pending messages seen in every conversation where `user` has
    /// unread messages. Counters stay as they are until the conversation is
    /// opened. Returns the number of messages newly marked seen.
    pub async fn on_presence_becomes_active(&self, user: &UserId) -> Result<usize, ChatError> {
        let path = layout::roster(user);
        let path = &path;

        let roster = retry_idempotent(&self.env, &self.retry, "unseen.roster", || async move {
            decode_roster(path, self.store.read(path).await?)
        })
        .await?;

        let mut marked = 0;
        for (partner, record) in roster {
            if record.unread_count == 0 {
                continue;
            }
            let conversation = derive_id(user, &partner)?;
            marked += self.log.mark_seen_from(&conversation, &partner).await?;
        }

        if marked > 0 {
            tracing::debug!(%user, marked, "Pending messages delivered on reconnect");
        }
        Ok(marked)
    }

    /// Unread messages from `partner` for `viewer`.
    pub async fn unread_count(&self, viewer: &UserId, partner: &UserId) -> Result<u64, ChatError> {
        let path = layout::unread_counter(viewer, partner);
        let path = &path;

        retry_idempotent(&self.env, &self.retry, "unseen.read", || async move {
            match self.store.read(path).await? {
                Some(value) => decode(path, value),
                None => Ok(0),
            }
        })
        .await
    }

    /// Unread state for the pair.
    pub async fn state(&self, viewer: &UserId, partner: &UserId) -> Result<UnreadState, ChatError> {
        Ok(UnreadState::from_count(self.unread_count(viewer, partner).await?))
    }
}
