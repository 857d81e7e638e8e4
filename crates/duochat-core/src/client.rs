//! Per-viewer facade over the chat components.
//!
//! Resolves the signed-in viewer on every call through the injected
//! [`IdentityProvider`], so a sign-out between calls is noticed at once.
//!
//! # Send pipeline
//!
//! ```text
//! derive_id ─► MessageLog::append (block gate) ─► on_new_message ─► record_message
//! ```
//!
//! Only the append is authoritative. The two fan-out steps after it are
//! best-effort: a failure there is logged and the send still succeeds,
//! because the message is already durable and the next open or roster
//! update repairs the denormalized state.

use crate::{
    blocks::{BlockRegistry, BlockStatus, BlockWatch},
    config::ChatConfig,
    directory::UserDirectory,
    env::Environment,
    error::ChatError,
    identity::{ConversationId, IdentityProvider, UserId, derive_id},
    message_log::MessageLog,
    migration::{LegacyRoomMigration, MigrationReport},
    moderation::Moderation,
    path::PathSegment,
    presence::PresenceTracker,
    records::{Message, PresenceRecord, UserProfile},
    roster::{RosterEntry, RosterMaterializer, RosterWatch},
    store::{Store, Watch},
    unseen::{Delivery, UnseenStateReconciler},
};

/// Chat operations for one signed-in viewer.
#[derive(Clone)]
pub struct ChatClient<S: Store, E: Environment, I: IdentityProvider> {
    identity: I,
    presence: PresenceTracker<S, E>,
    blocks: BlockRegistry<S, E>,
    log: MessageLog<S, E>,
    unseen: UnseenStateReconciler<S, E>,
    roster: RosterMaterializer<S, E>,
    directory: UserDirectory<S, E>,
    moderation: Moderation<S, E>,
    migration: LegacyRoomMigration<S, E>,
}

impl<S: Store, E: Environment, I: IdentityProvider> ChatClient<S, E, I> {
    /// Wire every component over one store handle.
    pub fn new(store: S, env: E, identity: I, config: &ChatConfig) -> Self {
        let retry = config.retry;
        let presence = PresenceTracker::new(store.clone(), env.clone(), retry);
        let blocks = BlockRegistry::new(store.clone(), env.clone(), retry);
        let log = MessageLog::new(store.clone(), env.clone(), blocks.clone(), retry);
        let unseen = UnseenStateReconciler::new(
            store.clone(),
            env.clone(),
            presence.clone(),
            log.clone(),
            retry,
        );
        let directory = UserDirectory::new(store.clone(), env.clone(), retry);
        let roster = RosterMaterializer::new(
            store.clone(),
            env.clone(),
            directory.clone(),
            presence.clone(),
            config.preview_max_chars,
            retry,
        );
        let moderation = Moderation::new(store.clone(), env.clone());
        let migration = LegacyRoomMigration::new(store, env, roster.clone(), retry);

        Self { identity, presence, blocks, log, unseen, roster, directory, moderation, migration }
    }

    /// Signed-in viewer.
    pub fn viewer(&self) -> Result<UserId, ChatError> {
        self.identity.current_user().ok_or(ChatError::IdentityMissing)
    }

    /// Conversation between the viewer and `partner`.
    pub fn conversation_with(&self, partner: &UserId) -> Result<ConversationId, ChatError> {
        derive_id(&self.viewer()?, partner)
    }

    /// Go online and deliver whatever arrived while offline.
    pub async fn start_session(&self) -> Result<(), ChatError> {
        let viewer = self.viewer()?;
        self.presence.start_session(&viewer).await?;

        if let Err(err) = self.unseen.on_presence_becomes_active(&viewer).await {
            tracing::warn!(user = %viewer, error = %err, "Failed to deliver pending messages");
        }
        Ok(())
    }

    /// Go offline gracefully.
    pub async fn end_session(&self) -> Result<(), ChatError> {
        let viewer = self.viewer()?;
        self.presence.end_session(&viewer).await
    }

    /// Send `text` to `partner`.
    ///
    /// # Errors
    ///
    /// - `IdentityMissing` if nobody is signed in
    /// - `InvalidIdentity` if `partner` is the viewer
    /// - `EmptyMessage`, `Blocked`, `StoreUnavailable` from the append
    pub async fn send(&self, partner: &UserId, text: &str) -> Result<Message, ChatError> {
        let viewer = self.viewer()?;
        let conversation = derive_id(&viewer, partner)?;

        let mut message = self.log.append(&conversation, &viewer, text).await?;

        match self.unseen.on_new_message(&conversation, &message).await {
            Ok(Delivery::Seen) => message.seen = true,
            Ok(Delivery::Queued { .. }) => {},
            Err(err) => {
                tracing::warn!(%conversation, key = %message.id, error = %err, "Unread update failed after send");
            },
        }

        if let Err(err) = self.roster.record_message(&conversation, &message).await {
            tracing::warn!(%conversation, key = %message.id, error = %err, "Roster update failed after send");
        }

        Ok(message)
    }

    /// Open the conversation with `partner`: reset the viewer's unread count,
    /// mark partner messages seen and return the history.
    pub async fn open_conversation(&self, partner: &UserId) -> Result<Vec<Message>, ChatError> {
        let viewer = self.viewer()?;
        let conversation = derive_id(&viewer, partner)?;

        self.unseen.on_open_conversation(&viewer, partner).await?;
        self.log.history(&conversation).await
    }

    /// Viewer's conversation list.
    pub async fn roster(&self) -> Result<Vec<RosterEntry>, ChatError> {
        self.roster.roster(&self.viewer()?).await
    }

    /// Live conversation list.
    pub async fn watch_roster(&self) -> Result<RosterWatch<S, E>, ChatError> {
        self.roster.watch(&self.viewer()?).await
    }

    /// Live message list of the conversation with `partner`.
    pub async fn watch_conversation(&self, partner: &UserId) -> Result<Watch<Vec<Message>>, ChatError> {
        self.log.subscribe(&self.conversation_with(partner)?).await
    }

    /// Live presence of `user`.
    pub async fn watch_presence(&self, user: &UserId) -> Result<Watch<PresenceRecord>, ChatError> {
        self.presence.subscribe(user).await
    }

    /// Check if a composer should be offered for `partner`.
    pub async fn can_message(&self, partner: &UserId) -> Result<bool, ChatError> {
        Ok(!self.blocks.check(&self.viewer()?, partner).await?)
    }

    /// Block relationship with `partner`.
    pub async fn block_status(&self, partner: &UserId) -> Result<BlockStatus, ChatError> {
        self.blocks.status(&self.viewer()?, partner).await
    }

    /// Live block relationship with `partner`.
    pub async fn watch_block(&self, partner: &UserId) -> Result<BlockWatch, ChatError> {
        self.blocks.watch(&self.viewer()?, partner).await
    }

    /// Block `partner`.
    pub async fn block(&self, partner: &UserId) -> Result<(), ChatError> {
        self.blocks.block(&self.viewer()?, partner).await
    }

    /// Remove the viewer's block on `partner`.
    pub async fn unblock(&self, partner: &UserId) -> Result<(), ChatError> {
        self.blocks.unblock(&self.viewer()?, partner).await
    }

    /// Report a message written by `partner`.
    pub async fn report(
        &self,
        partner: &UserId,
        message_id: &PathSegment,
    ) -> Result<PathSegment, ChatError> {
        let viewer = self.viewer()?;
        let conversation = derive_id(&viewer, partner)?;
        self.moderation.report(&conversation, &viewer, message_id).await
    }

    /// Everyone the viewer could start a chat with.
    pub async fn contacts(&self) -> Result<Vec<UserProfile>, ChatError> {
        self.directory.list_except(&self.viewer()?).await
    }

    /// Import legacy rooms shared with `partner`.
    pub async fn migrate_legacy(&self, partner: &UserId) -> Result<MigrationReport, ChatError> {
        self.migration.migrate_pair(&self.viewer()?, partner).await
    }

    /// Profile directory.
    pub fn directory(&self) -> &UserDirectory<S, E> {
        &self.directory
    }
}
