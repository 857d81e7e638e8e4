//! Backing store contract.
//!
//! The core never talks to a concrete backend. Every component is generic over
//! [`Store`], a realtime tree of JSON values addressed by [`StorePath`]. The
//! contract mirrors what managed realtime databases offer: point reads,
//! change subscriptions, replace/merge writes, ordered appends, atomic
//! transactions and server-side writes deferred until the client disconnects.
//!
//! [`MemoryStore`] is the in-process reference implementation and
//! [`ChaoticStore`] wraps any store with deterministic fault injection.

mod chaotic;
mod memory;
mod sequencer;
mod subscription;

use async_trait::async_trait;
pub use chaotic::ChaoticStore;
pub use memory::MemoryStore;
use serde_json::{Map, Value};
pub use sequencer::{KeySequencer, format_key, parse_key};
pub use subscription::{Decoder, Liveness, Snapshot, SubscriberSink, Subscription, SubscriptionId, Watch, channel};
use thiserror::Error;

use crate::path::{PathSegment, StorePath};

/// Key of the server-value placeholder object.
pub const SERVER_VALUE_KEY: &str = ".sv";

/// Errors reported by a store implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend unreachable or the request failed in transit.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// This client's connection was closed by the store.
    #[error("connection closed")]
    Disconnected,

    /// Path rejected by the store (reserved characters, bad root write).
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// Update function run inside [`Store::transaction`].
///
/// Receives the current value (`None` if absent) and returns the value to
/// commit, or `None` to abort without writing. Returning `Value::Null`
/// deletes the node. The function may run more than once and must be pure.
pub type TransactionFn = Box<dyn FnMut(Option<&Value>) -> Option<Value> + Send>;

/// Result of a [`Store::transaction`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOutcome {
    /// Whether the update function committed a value.
    pub committed: bool,
    /// Value at the path after the transaction.
    pub value: Option<Value>,
}

/// Realtime tree store shared by every client.
///
/// Must be Clone (each component holds a handle), Send + Sync, and every
/// operation must be atomic with respect to every other operation on the
/// same store. Handles cloned from one another share a client connection;
/// on-disconnect writes are scoped to that connection.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    /// Point-in-time read. `None` if nothing is stored at `path`.
    async fn read(&self, path: &StorePath) -> Result<Option<Value>, StoreError>;

    /// Subscribe to the value at `path`.
    ///
    /// The subscription yields the current value immediately, then the full
    /// current value after every change to `path` or anything below it.
    async fn subscribe(&self, path: &StorePath) -> Result<Subscription, StoreError>;

    /// Stop future deliveries for a subscription.
    ///
    /// Deliveries already queued are voided through the subscription's
    /// [`Liveness`] token.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError>;

    /// Replace the value at `path`. `Value::Null` deletes it.
    async fn write(&self, path: &StorePath, value: Value) -> Result<(), StoreError>;

    /// Shallow update: replace only the listed child fields of `path`.
    async fn merge(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError>;

    /// Append `value` under `path` with a generated key.
    ///
    /// Keys generated for one path increase monotonically and sort
    /// lexicographically in generation order.
    async fn append_ordered(&self, path: &StorePath, value: Value)
    -> Result<PathSegment, StoreError>;

    /// Atomic read-modify-write of the value at `path`.
    async fn transaction(
        &self,
        path: &StorePath,
        update: TransactionFn,
    ) -> Result<TransactionOutcome, StoreError>;

    /// Register a write the store performs when this client disconnects
    /// without cleaning up. Re-registering a path replaces the earlier value.
    async fn on_disconnect(&self, path: &StorePath, value: Value) -> Result<(), StoreError>;

    /// Drop a previously registered on-disconnect write.
    async fn cancel_on_disconnect(&self, path: &StorePath) -> Result<(), StoreError>;
}

/// Placeholder resolved to the store's clock (Unix millis) when written.
pub fn server_timestamp() -> Value {
    let mut placeholder = Map::new();
    placeholder.insert(SERVER_VALUE_KEY.to_string(), Value::String("timestamp".to_string()));
    Value::Object(placeholder)
}

/// Check if `value` is the [`server_timestamp`] placeholder.
pub fn is_server_timestamp(value: &Value) -> bool {
    value.as_object().is_some_and(|fields| {
        fields.len() == 1 && fields.get(SERVER_VALUE_KEY).and_then(Value::as_str) == Some("timestamp")
    })
}

/// Replace every server-timestamp placeholder inside `value` with `now_ms`.
pub fn resolve_server_values(value: Value, now_ms: u64) -> Value {
    if is_server_timestamp(&value) {
        return Value::from(now_ms);
    }
    match value {
        Value::Object(fields) => Value::Object(
            fields.into_iter().map(|(k, v)| (k, resolve_server_values(v, now_ms))).collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| resolve_server_values(v, now_ms)).collect())
        },
        other => other,
    }
}
