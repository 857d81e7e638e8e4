//! Append-only message log per conversation.
//!
//! Messages are stored under `rooms/{conversation}/messages` with keys
//! generated by the store. Order is the key order, never the sender's clock,
//! so two clients with skewed clocks still agree on the sequence. A message
//! is immutable except for its `seen` flag, which only goes from false to
//! true.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use serde_json::Value;

use crate::{
    blocks::BlockRegistry,
    config::RetryPolicy,
    env::Environment,
    error::ChatError,
    identity::{ConversationId, UserId},
    path::{PathSegment, layout},
    records::{Message, MessageRecord, decode_messages, encode},
    retry::retry_idempotent,
    store::{Store, Watch},
};

/// Ordered message storage with block enforcement.
#[derive(Clone)]
pub struct MessageLog<S: Store, E: Environment> {
    store: S,
    env: E,
    blocks: BlockRegistry<S, E>,
    retry: RetryPolicy,
}

impl<S: Store, E: Environment> MessageLog<S, E> {
    /// Create a log over `store`, gated by `blocks`.
    pub fn new(store: S, env: E, blocks: BlockRegistry<S, E>, retry: RetryPolicy) -> Self {
        Self { store, env, blocks, retry }
    }

    /// Append a message from `sender`.
    ///
    /// # Errors
    ///
    /// - `EmptyMessage` if `text` is blank after trimming
    /// - `NotParticipant` if `sender` is not in `conversation`
    /// - `Blocked` if an edge exists between the participants
    /// - `StoreUnavailable` if the append failed (not retried, the append is
    ///   not idempotent)
    pub async fn append(
        &self,
        conversation: &ConversationId,
        sender: &UserId,
        text: &str,
    ) -> Result<Message, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let recipient = conversation.partner_of(sender)?;
        if self.blocks.check(sender, recipient).await? {
            tracing::debug!(%conversation, %sender, "Send rejected by block edge");
            return Err(ChatError::Blocked {
                sender: sender.to_string(),
                recipient: recipient.to_string(),
            });
        }

        let path = layout::messages(conversation);
        let record = MessageRecord {
            sender_id: sender.clone(),
            text: text.to_string(),
            sent_at: self.env.wall_clock_millis(),
            seen: false,
            legacy_key: None,
        };

        let key = self.store.append_ordered(&path, encode(&path, &record)?).await?;

        tracing::debug!(%conversation, %sender, key = %key, "Message appended");

        Ok(Message::from_record(key, record))
    }

    /// Every message, in order.
    pub async fn history(&self, conversation: &ConversationId) -> Result<Vec<Message>, ChatError> {
        let path = layout::messages(conversation);
        let path = &path;

        retry_idempotent(&self.env, &self.retry, "messages.read", || async move {
            decode_messages(path, self.store.read(path).await?)
        })
        .await
    }

    /// Newest message, if any.
    pub async fn last_message(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<Message>, ChatError> {
        Ok(self.history(conversation).await?.pop())
    }

    /// Ordered stream of the whole log: current messages first, then the
    /// full list after every append or seen change.
    pub async fn subscribe(
        &self,
        conversation: &ConversationId,
    ) -> Result<Watch<Vec<Message>>, ChatError> {
        let path = layout::messages(conversation);
        let path = &path;

        let subscription = retry_idempotent(&self.env, &self.retry, "messages.subscribe", || {
            async move { Ok(self.store.subscribe(path).await?) }
        })
        .await?;

        Ok(Watch::new(subscription, decode_messages))
    }

    /// Atomically mark every unseen message from `sender` as seen.
    ///
    /// Returns the number of messages that changed. Malformed entries are
    /// left untouched.
    pub async fn mark_seen_from(
        &self,
        conversation: &ConversationId,
        sender: &UserId,
    ) -> Result<usize, ChatError> {
        let path = layout::messages(conversation);
        let path = &path;
        let changed = Arc::new(AtomicUsize::new(0));

        retry_idempotent(&self.env, &self.retry, "messages.mark_seen", || {
            let changed = Arc::clone(&changed);
            let sender = sender.as_str().to_string();
            async move {
                let update = move |current: Option<&Value>| {
                    let mut log = current?.as_object()?.clone();
                    let mut count = 0;
                    for body in log.values_mut() {
                        let Some(fields) = body.as_object_mut() else { continue };
                        let from_sender =
                            fields.get("senderId").and_then(Value::as_str) == Some(sender.as_str());
                        let seen = fields.get("seen").and_then(Value::as_bool).unwrap_or(false);
                        if from_sender && !seen {
                            fields.insert("seen".to_string(), Value::Bool(true));
                            count += 1;
                        }
                    }
                    // The update may run more than once; keep only the last count.
                    changed.store(count, Ordering::SeqCst);
                    (count > 0).then_some(Value::Object(log))
                };
                Ok(self.store.transaction(path, Box::new(update)).await?)
            }
        })
        .await?;

        let changed = changed.load(Ordering::SeqCst);
        if changed > 0 {
            tracing::debug!(%conversation, %sender, changed, "Marked messages seen");
        }
        Ok(changed)
    }

    /// Atomically mark one message as seen. Returns whether it changed.
    ///
    /// A missing message is not created.
    pub async fn mark_one_seen(
        &self,
        conversation: &ConversationId,
        id: &PathSegment,
    ) -> Result<bool, ChatError> {
        let path = layout::message(conversation, id);
        let path = &path;

        let outcome = retry_idempotent(&self.env, &self.retry, "messages.mark_one_seen", || {
            async move {
                let update = |current: Option<&Value>| {
                    let mut fields = current?.as_object()?.clone();
                    if fields.get("seen").and_then(Value::as_bool) == Some(true) {
                        return None;
                    }
                    fields.insert("seen".to_string(), Value::Bool(true));
                    Some(Value::Object(fields))
                };
                Ok(self.store.transaction(path, Box::new(update)).await?)
            }
        })
        .await?;

        Ok(outcome.committed)
    }
}
