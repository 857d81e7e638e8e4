//! Simulated users sharing one in-memory store.
//!
//! Every user gets a signed-in [`ChatClient`] on a connection of its own,
//! so dropping one user's connection fires only that user's disconnect
//! hooks. All connections and the store share one [`SimEnv`] clock.

use duochat_core::{
    ChatClient, ChatConfig, ChatError, MemoryStore, StaticIdentity, UserId, UserProfile,
};

use crate::{SimEnv, invariants::SystemSnapshot};

/// Client type used by the cluster.
pub type SimClient = ChatClient<MemoryStore<SimEnv>, SimEnv, StaticIdentity>;

/// One simulated user.
pub struct SimUser {
    /// User id.
    pub uid: UserId,
    /// The user's connection to the shared store.
    pub connection: MemoryStore<SimEnv>,
    /// Client bound to `connection`.
    pub client: SimClient,
}

/// Users sharing one store.
pub struct TestCluster {
    env: SimEnv,
    root: MemoryStore<SimEnv>,
    config: ChatConfig,
    users: Vec<SimUser>,
}

impl TestCluster {
    /// Cluster with one user per entry of `uids`, default configuration.
    pub fn new(seed: u64, uids: &[&str]) -> Result<Self, ChatError> {
        Self::with_config(seed, uids, ChatConfig::default())
    }

    /// Cluster with an explicit configuration.
    pub fn with_config(seed: u64, uids: &[&str], config: ChatConfig) -> Result<Self, ChatError> {
        let env = SimEnv::with_seed(seed);
        let root = MemoryStore::new(env.clone());
        let mut cluster = Self { env, root, config, users: Vec::with_capacity(uids.len()) };

        for raw in uids {
            let uid = UserId::new(*raw)?;
            let connection = cluster.root.connect()?;
            let client = cluster.client_on(&uid, connection.clone());
            cluster.users.push(SimUser { uid, connection, client });
        }
        Ok(cluster)
    }

    /// Register every user in the directory under its id.
    pub async fn register_all(&self) -> Result<(), ChatError> {
        for user in &self.users {
            let profile = UserProfile::new(user.uid.clone(), user.uid.as_str());
            user.client.directory().register(&profile).await?;
        }
        Ok(())
    }

    /// Shared clock.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Store handle that is not bound to any user.
    pub fn store(&self) -> &MemoryStore<SimEnv> {
        &self.root
    }

    /// Number of users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// True if the cluster has no users.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// User at `idx`.
    ///
    /// # Panics
    ///
    /// If `idx` is out of range.
    pub fn user(&self, idx: usize) -> &SimUser {
        &self.users[idx]
    }

    /// Client of the user at `idx`.
    pub fn client(&self, idx: usize) -> &SimClient {
        &self.users[idx].client
    }

    /// Id of the user at `idx`.
    pub fn uid(&self, idx: usize) -> &UserId {
        &self.users[idx].uid
    }

    /// Drop the user's connection without a goodbye, then reconnect.
    ///
    /// Returns the number of disconnect hooks that fired.
    pub fn reconnect(&mut self, idx: usize) -> Result<usize, ChatError> {
        let fired = self.users[idx].connection.drop_connection()?;
        let connection = self.root.connect()?;
        let client = self.client_on(&self.users[idx].uid, connection.clone());

        let user = &mut self.users[idx];
        user.connection = connection;
        user.client = client;

        tracing::debug!(user = %user.uid, fired, "Simulated reconnect");
        Ok(fired)
    }

    /// Snapshot of the shared store.
    pub fn snapshot(&self) -> Result<SystemSnapshot, ChatError> {
        Ok(SystemSnapshot::from_dump(&self.root.dump()?))
    }

    fn client_on(&self, uid: &UserId, connection: MemoryStore<SimEnv>) -> SimClient {
        ChatClient::new(
            connection,
            self.env.clone(),
            StaticIdentity::signed_in(uid.clone()),
            &self.config,
        )
    }
}
