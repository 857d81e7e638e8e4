//! User profiles.

use serde_json::Value;

use crate::{
    config::RetryPolicy,
    env::Environment,
    error::ChatError,
    identity::UserId,
    path::layout,
    records::{UserProfile, decode, decode_optional, encode},
    retry::retry_idempotent,
    store::Store,
};

/// Directory of registered users.
#[derive(Clone)]
pub struct UserDirectory<S: Store, E: Environment> {
    store: S,
    env: E,
    retry: RetryPolicy,
}

impl<S: Store, E: Environment> UserDirectory<S, E> {
    /// Create a directory over `store`.
    pub fn new(store: S, env: E, retry: RetryPolicy) -> Self {
        Self { store, env, retry }
    }

    /// Create or replace a profile.
    pub async fn register(&self, profile: &UserProfile) -> Result<(), ChatError> {
        let path = layout::user(&profile.uid);
        let value = encode(&path, profile)?;
        let (path, value) = (&path, &value);

        retry_idempotent(&self.env, &self.retry, "directory.write", || async move {
            Ok(self.store.write(path, value.clone()).await?)
        })
        .await?;

        tracing::info!(user = %profile.uid, "User registered");
        Ok(())
    }

    /// Change the display name. Returns false if the user is unknown.
    pub async fn rename(&self, uid: &UserId, name: &str) -> Result<bool, ChatError> {
        self.update_field(uid, "name", Value::String(name.to_string())).await
    }

    /// Set or clear the avatar reference. Returns false if the user is unknown.
    pub async fn set_avatar(&self, uid: &UserId, avatar: Option<&str>) -> Result<bool, ChatError> {
        let value = avatar.map_or(Value::Null, |a| Value::String(a.to_string()));
        self.update_field(uid, "avatar", value).await
    }

    /// Profile of `uid`, if registered.
    pub async fn get(&self, uid: &UserId) -> Result<Option<UserProfile>, ChatError> {
        let path = layout::user(uid);
        let path = &path;

        retry_idempotent(&self.env, &self.retry, "directory.read", || async move {
            decode_optional(path, self.store.read(path).await?)
        })
        .await
    }

    /// Every user except `viewer`, ordered by name then uid.
    pub async fn list_except(&self, viewer: &UserId) -> Result<Vec<UserProfile>, ChatError> {
        let path = layout::users();
        let path = &path;

        let all = retry_idempotent(&self.env, &self.retry, "directory.list", || async move {
            Ok(self.store.read(path).await?)
        })
        .await?;

        let Some(Value::Object(users)) = all else {
            return Ok(Vec::new());
        };

        let mut profiles = users
            .into_iter()
            .map(|(uid, body)| decode::<UserProfile>(&path.child(uid)?, body))
            .filter(|profile| !matches!(profile, Ok(p) if &p.uid == viewer))
            .collect::<Result<Vec<_>, _>>()?;
        profiles.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.uid.cmp(&b.uid)));

        Ok(profiles)
    }

    /// Atomically replace one field of an existing profile.
    async fn update_field(
        &self,
        uid: &UserId,
        field: &'static str,
        value: Value,
    ) -> Result<bool, ChatError> {
        let path = layout::user(uid);
        let (path, value) = (&path, &value);

        let outcome = retry_idempotent(&self.env, &self.retry, "directory.update", || {
            let value = value.clone();
            async move {
                let update = move |current: Option<&Value>| {
                    let mut fields = current?.as_object()?.clone();
                    fields.insert(field.to_string(), value.clone());
                    Some(Value::Object(fields))
                };
                Ok(self.store.transaction(path, Box::new(update)).await?)
            }
        })
        .await?;

        if outcome.committed {
            tracing::debug!(user = %uid, field, "Profile updated");
        }
        Ok(outcome.committed)
    }
}
