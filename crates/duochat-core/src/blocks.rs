//! Directed block relationships.
//!
//! An edge `blocks/{blocker}/{blocked}` stops messaging in both directions.
//! The registry is consulted twice: by the UI before offering a composer
//! ([`BlockRegistry::status`], [`BlockRegistry::watch`]) and authoritatively
//! by [`MessageLog::append`](crate::MessageLog::append).

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::{
    Stream, StreamExt,
    stream::{self, BoxStream},
};
use serde_json::Value;

use crate::{
    config::RetryPolicy,
    env::Environment,
    error::ChatError,
    identity::{UserId, derive_id},
    path::{StorePath, layout},
    retry::retry_idempotent,
    store::{Liveness, Store, Watch},
};

/// Block relationship as seen by one viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// Messaging allowed
    None,
    /// The viewer blocked the partner (takes precedence if both exist)
    BlockedByMe,
    /// The partner blocked the viewer
    BlockedByPartner,
}

impl BlockStatus {
    /// Status from the two directed edges.
    pub fn from_edges(by_me: bool, by_partner: bool) -> Self {
        if by_me {
            Self::BlockedByMe
        } else if by_partner {
            Self::BlockedByPartner
        } else {
            Self::None
        }
    }

    /// Check if messaging is allowed.
    pub fn allows_messaging(self) -> bool {
        self == Self::None
    }
}

/// Registry of block edges.
#[derive(Clone)]
pub struct BlockRegistry<S: Store, E: Environment> {
    store: S,
    env: E,
    retry: RetryPolicy,
}

impl<S: Store, E: Environment> BlockRegistry<S, E> {
    /// Create a registry over `store`.
    pub fn new(store: S, env: E, retry: RetryPolicy) -> Self {
        Self { store, env, retry }
    }

    /// True if an edge exists in either direction.
    pub async fn check(&self, a: &UserId, b: &UserId) -> Result<bool, ChatError> {
        Ok(self.edge(a, b).await? || self.edge(b, a).await?)
    }

    /// Relationship from `viewer`'s side.
    pub async fn status(&self, viewer: &UserId, partner: &UserId) -> Result<BlockStatus, ChatError> {
        let by_me = self.edge(viewer, partner).await?;
        let by_partner = self.edge(partner, viewer).await?;
        Ok(BlockStatus::from_edges(by_me, by_partner))
    }

    /// Add the edge `blocker → blocked`. Idempotent.
    pub async fn block(&self, blocker: &UserId, blocked: &UserId) -> Result<(), ChatError> {
        derive_id(blocker, blocked)?;
        self.put(blocker, blocked, Value::Bool(true)).await?;
        tracing::info!(%blocker, %blocked, "User blocked");
        Ok(())
    }

    /// Remove the edge `blocker → blocked`. The reverse edge is untouched.
    pub async fn unblock(&self, blocker: &UserId, blocked: &UserId) -> Result<(), ChatError> {
        derive_id(blocker, blocked)?;
        self.put(blocker, blocked, Value::Null).await?;
        tracing::info!(%blocker, %blocked, "User unblocked");
        Ok(())
    }

    /// Stream of [`BlockStatus`] for the pair, current value first.
    pub async fn watch(&self, viewer: &UserId, partner: &UserId) -> Result<BlockWatch, ChatError> {
        let mine = self.watch_edge(&layout::block_edge(viewer, partner)).await?;
        let theirs = self.watch_edge(&layout::block_edge(partner, viewer)).await?;
        Ok(BlockWatch::new(mine, theirs))
    }

    async fn edge(&self, blocker: &UserId, blocked: &UserId) -> Result<bool, ChatError> {
        let path = layout::block_edge(blocker, blocked);
        let path = &path;

        retry_idempotent(&self.env, &self.retry, "blocks.read", || async move {
            decode_edge(path, self.store.read(path).await?)
        })
        .await
    }

    async fn put(&self, blocker: &UserId, blocked: &UserId, value: Value) -> Result<(), ChatError> {
        let path = layout::block_edge(blocker, blocked);
        let (path, value) = (&path, &value);

        retry_idempotent(&self.env, &self.retry, "blocks.write", || async move {
            Ok(self.store.write(path, value.clone()).await?)
        })
        .await
    }

    async fn watch_edge(&self, path: &StorePath) -> Result<Watch<bool>, ChatError> {
        let subscription = retry_idempotent(&self.env, &self.retry, "blocks.subscribe", || {
            async move { Ok(self.store.subscribe(path).await?) }
        })
        .await?;
        Ok(Watch::new(subscription, decode_edge))
    }
}

/// An edge is `true` or absent.
fn decode_edge(path: &StorePath, value: Option<Value>) -> Result<bool, ChatError> {
    match value {
        None | Some(Value::Bool(false)) => Ok(false),
        Some(Value::Bool(true)) => Ok(true),
        Some(other) => Err(ChatError::Decode {
            path: path.to_string(),
            reason: format!("block edge must be a boolean, got {other}"),
        }),
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Mine,
    Theirs,
}

/// Live [`BlockStatus`] for one pair.
///
/// Yields once both edges have been observed, then on every status change.
pub struct BlockWatch {
    events: BoxStream<'static, (Side, Result<bool, ChatError>)>,
    liveness: [Liveness; 2],
    by_me: Option<bool>,
    by_partner: Option<bool>,
    last: Option<BlockStatus>,
}

impl BlockWatch {
    fn new(mine: Watch<bool>, theirs: Watch<bool>) -> Self {
        let liveness = [mine.liveness(), theirs.liveness()];
        let events = stream::select(
            mine.map(|edge| (Side::Mine, edge)),
            theirs.map(|edge| (Side::Theirs, edge)),
        )
        .boxed();

        Self { events, liveness, by_me: None, by_partner: None, last: None }
    }

    /// Stop yielding statuses.
    pub fn cancel(&self) {
        for token in &self.liveness {
            token.cancel();
        }
    }
}

impl Stream for BlockWatch {
    type Item = Result<BlockStatus, ChatError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let (side, edge) = match this.events.poll_next_unpin(cx) {
                Poll::Ready(Some(event)) => event,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            };

            let edge = match edge {
                Ok(edge) => edge,
                Err(err) => return Poll::Ready(Some(Err(err))),
            };
            match side {
                Side::Mine => this.by_me = Some(edge),
                Side::Theirs => this.by_partner = Some(edge),
            }

            let (Some(by_me), Some(by_partner)) = (this.by_me, this.by_partner) else {
                continue;
            };
            let status = BlockStatus::from_edges(by_me, by_partner);
            if this.last != Some(status) {
                this.last = Some(status);
                return Poll::Ready(Some(Ok(status)));
            }
        }
    }
}
