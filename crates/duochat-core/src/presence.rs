//! Online/offline state per user.
//!
//! A session registers its offline write with the store before announcing
//! itself online, so a client that vanishes at any point after the first
//! write is still marked offline. The offline write carries a server
//! timestamp resolved when the store fires it, which makes `lastSeenAt` the
//! actual disconnect time rather than the time the hook was registered.

use serde_json::json;

use crate::{
    config::RetryPolicy,
    env::Environment,
    error::ChatError,
    identity::UserId,
    path::layout,
    records::{PresenceRecord, decode_presence, encode},
    retry::retry_idempotent,
    store::{Store, Watch, server_timestamp},
};

/// Tracks presence records in the store.
#[derive(Clone)]
pub struct PresenceTracker<S: Store, E: Environment> {
    store: S,
    env: E,
    retry: RetryPolicy,
}

impl<S: Store, E: Environment> PresenceTracker<S, E> {
    /// Create a tracker over `store`.
    pub fn new(store: S, env: E, retry: RetryPolicy) -> Self {
        Self { store, env, retry }
    }

    /// Announce `user` online for this connection.
    ///
    /// # Invariants
    ///
    /// - Pre: none. Calling twice is harmless.
    /// - Post: the disconnect hook is registered before the active record is
    ///   written.
    pub async fn start_session(&self, user: &UserId) -> Result<(), ChatError> {
        let path = layout::presence(user);
        let path = &path;

        retry_idempotent(&self.env, &self.retry, "presence.on_disconnect", || async move {
            let offline = json!({ "isActive": false, "lastSeenAt": server_timestamp() });
            Ok(self.store.on_disconnect(path, offline).await?)
        })
        .await?;

        self.set_active(user).await?;

        tracing::info!(%user, "Presence session started");
        Ok(())
    }

    /// Graceful sign-out: write the offline record and drop the hook.
    ///
    /// Safe to race with the disconnect hook. Both write the same shape.
    pub async fn end_session(&self, user: &UserId) -> Result<(), ChatError> {
        let path = layout::presence(user);
        let path = &path;

        retry_idempotent(&self.env, &self.retry, "presence.end_session", || async move {
            let offline = json!({ "isActive": false, "lastSeenAt": server_timestamp() });
            self.store.write(path, offline).await?;
            Ok(self.store.cancel_on_disconnect(path).await?)
        })
        .await?;

        tracing::info!(%user, "Presence session ended");
        Ok(())
    }

    /// Write `{isActive: true, lastSeenAt: null}`.
    pub async fn set_active(&self, user: &UserId) -> Result<(), ChatError> {
        self.put(user, PresenceRecord::active()).await
    }

    /// Write `{isActive: false, lastSeenAt: at}`.
    pub async fn set_inactive(&self, user: &UserId, at: u64) -> Result<(), ChatError> {
        self.put(user, PresenceRecord::inactive(at)).await
    }

    /// Current record. A user without a record is offline and never seen.
    pub async fn current(&self, user: &UserId) -> Result<PresenceRecord, ChatError> {
        let path = layout::presence(user);
        let path = &path;

        retry_idempotent(&self.env, &self.retry, "presence.read", || async move {
            decode_presence(path, self.store.read(path).await?)
        })
        .await
    }

    /// Stream of the user's presence: current value first, then every change.
    pub async fn subscribe(&self, user: &UserId) -> Result<Watch<PresenceRecord>, ChatError> {
        let path = layout::presence(user);
        let path = &path;

        let subscription = retry_idempotent(&self.env, &self.retry, "presence.subscribe", || {
            async move { Ok(self.store.subscribe(path).await?) }
        })
        .await?;

        Ok(Watch::new(subscription, decode_presence))
    }

    async fn put(&self, user: &UserId, record: PresenceRecord) -> Result<(), ChatError> {
        let path = layout::presence(user);
        let value = encode(&path, &record)?;
        let (path, value) = (&path, &value);

        retry_idempotent(&self.env, &self.retry, "presence.write", || async move {
            Ok(self.store.write(path, value.clone()).await?)
        })
        .await?;

        tracing::debug!(%user, active = record.is_active(), "Presence written");
        Ok(())
    }
}
