//! Message reports for moderation.
//!
//! A report copies the message as stored at report time, read back from the
//! log rather than taken from the caller.

use crate::{
    env::Environment,
    error::ChatError,
    identity::{ConversationId, UserId},
    path::{PathSegment, layout},
    records::{Message, MessageRecord, ReportRecord, decode_optional, encode},
    store::Store,
};

/// Files report records.
#[derive(Clone)]
pub struct Moderation<S: Store, E: Environment> {
    store: S,
    env: E,
}

impl<S: Store, E: Environment> Moderation<S, E> {
    /// Create a moderation sink over `store`.
    pub fn new(store: S, env: E) -> Self {
        Self { store, env }
    }

    /// Report message `message_id` of `conversation` on behalf of `reporter`.
    ///
    /// Returns the report key. Appends are not retried.
    ///
    /// # Errors
    ///
    /// - `NotParticipant` if `reporter` is not in the conversation
    /// - `NotReportable` if the message does not exist or was written by
    ///   `reporter`
    pub async fn report(
        &self,
        conversation: &ConversationId,
        reporter: &UserId,
        message_id: &PathSegment,
    ) -> Result<PathSegment, ChatError> {
        conversation.partner_of(reporter)?;

        let path = layout::message(conversation, message_id);
        let record: Option<MessageRecord> = decode_optional(&path, self.store.read(&path).await?)?;

        let not_reportable = || ChatError::NotReportable { message_id: message_id.to_string() };
        let record = record.ok_or_else(not_reportable)?;
        if &record.sender_id == reporter {
            return Err(not_reportable());
        }

        let message = Message::from_record(message_id.clone(), record);
        let report = ReportRecord::new(conversation, reporter, &message, self.env.wall_clock_millis());
        let reports = layout::reports();
        let key = self.store.append_ordered(&reports, encode(&reports, &report)?).await?;

        tracing::info!(%conversation, %reporter, message = %message_id, report = %key, "Message reported");

        Ok(key)
    }
}
