//! Cancellable subscription streams.
//!
//! A store delivers snapshots through an unbounded channel. Each subscription
//! carries a [`Liveness`] token shared with the store side: once cancelled, no
//! further snapshot is yielded even if one is already sitting in the channel.
//! Handlers that outlive their screen clone the token and check it before
//! touching local state.

use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
};

use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{error::ChatError, path::StorePath};

/// Identifier assigned by the store to a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// Value observed at a subscribed path.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Subscribed path
    pub path: StorePath,
    /// Current value, `None` if nothing is stored there
    pub value: Option<Value>,
}

/// Shared cancellation flag.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    /// Create a live token.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Check if the owner still wants deliveries.
    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Void this token and every clone of it.
    pub fn cancel(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Store-side end of a subscription.
#[derive(Debug, Clone)]
pub struct SubscriberSink {
    sender: mpsc::UnboundedSender<Snapshot>,
    liveness: Liveness,
}

impl SubscriberSink {
    /// Push a snapshot. Returns `false` once the subscriber is gone, so the
    /// store can prune it.
    pub fn deliver(&self, snapshot: Snapshot) -> bool {
        self.liveness.is_alive() && self.sender.send(snapshot).is_ok()
    }

    /// Check if the receiving side is still interested.
    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive() && !self.sender.is_closed()
    }

    /// Cancel from the store side (explicit unsubscribe, dropped connection).
    pub fn close(&self) {
        self.liveness.cancel();
    }
}

/// Create a connected sink/subscription pair.
pub fn channel(id: SubscriptionId) -> (SubscriberSink, Subscription) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let liveness = Liveness::new();
    (
        SubscriberSink { sender, liveness: liveness.clone() },
        Subscription { id, receiver, liveness },
    )
}

/// Client-side stream of raw snapshots.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<Snapshot>,
    liveness: Liveness,
}

impl Subscription {
    /// Store-assigned identifier, for [`Store::unsubscribe`](super::Store::unsubscribe).
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Clone of the liveness token gating this subscription.
    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    /// Stop yielding snapshots, including ones already queued.
    pub fn cancel(&self) {
        self.liveness.cancel();
    }

    /// Snapshot already queued, if any, without waiting.
    pub fn try_next(&mut self) -> Option<Snapshot> {
        if !self.liveness.is_alive() {
            return None;
        }
        self.receiver.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Snapshot;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if !this.liveness.is_alive() {
            return Poll::Ready(None);
        }
        match this.receiver.poll_recv(cx) {
            // Cancellation may race with a delivery already in the channel.
            Poll::Ready(Some(_)) if !this.liveness.is_alive() => Poll::Ready(None),
            other => other,
        }
    }
}

/// Decoding step applied to each snapshot of a [`Watch`].
pub type Decoder<T> = fn(&StorePath, Option<Value>) -> Result<T, ChatError>;

/// Typed subscription: every snapshot passes through the decoding boundary.
#[derive(Debug)]
pub struct Watch<T> {
    inner: Subscription,
    decode: Decoder<T>,
}

impl<T> Watch<T> {
    /// Wrap a raw subscription with a decoder.
    pub fn new(inner: Subscription, decode: Decoder<T>) -> Self {
        Self { inner, decode }
    }

    /// Store-assigned identifier.
    pub fn id(&self) -> SubscriptionId {
        self.inner.id()
    }

    /// Clone of the liveness token.
    pub fn liveness(&self) -> Liveness {
        self.inner.liveness()
    }

    /// Stop yielding values.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Decoded value already queued, if any, without waiting.
    pub fn try_next(&mut self) -> Option<Result<T, ChatError>> {
        let snapshot = self.inner.try_next()?;
        Some((self.decode)(&snapshot.path, snapshot.value))
    }
}

impl<T> Stream for Watch<T> {
    type Item = Result<T, ChatError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(snapshot)) => {
                Poll::Ready(Some((this.decode)(&snapshot.path, snapshot.value)))
            },
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
