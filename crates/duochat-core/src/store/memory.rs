//! In-process realtime tree store.
//!
//! Reference implementation of the [`Store`] contract used by tests, the
//! simulation harness and the CLI. Every operation runs under one mutex, so
//! reads, writes, appends and whole transactions are atomic with respect to
//! each other. The lock is never held across an await point.
//!
//! Handles obtained through [`MemoryStore::connect`] share the tree but each
//! has its own client connection: on-disconnect writes and subscriptions are
//! scoped to it, and [`MemoryStore::drop_connection`] plays the role of the
//! store noticing that a client vanished.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{
    KeySequencer, Snapshot, Store, StoreError, Subscription, SubscriptionId, TransactionFn,
    TransactionOutcome, channel, resolve_server_values, subscription::SubscriberSink,
};
use crate::{
    env::Environment,
    path::{PathSegment, StorePath, segment_violation},
};

/// In-memory store implementation for testing and simulation.
///
/// Cloning a handle keeps the same connection. Use [`MemoryStore::connect`]
/// to model a second client.
#[derive(Clone)]
pub struct MemoryStore<E: Environment> {
    inner: Arc<Mutex<MemoryStoreInner>>,
    env: E,
    connection: u64,
}

struct MemoryStoreInner {
    /// Whole tree, always an object at the root
    root: Value,

    /// Ordered key generation for `append_ordered`
    sequencer: KeySequencer,

    /// Active subscriptions
    subscribers: BTreeMap<SubscriptionId, Subscriber>,

    next_subscription_id: u64,
    next_connection_id: u64,

    /// Connections that have not been dropped
    live_connections: HashSet<u64>,

    /// Connection → deferred writes performed when it drops
    disconnect_writes: HashMap<u64, BTreeMap<StorePath, Value>>,
}

struct Subscriber {
    path: StorePath,
    connection: u64,
    sink: SubscriberSink,
    /// Last value delivered, to suppress no-op notifications
    last: Option<Value>,
}

impl<E: Environment> MemoryStore<E> {
    /// Create an empty store with one live connection.
    pub fn new(env: E) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStoreInner {
                root: Value::Object(Map::new()),
                sequencer: KeySequencer::new(),
                subscribers: BTreeMap::new(),
                next_subscription_id: 0,
                next_connection_id: 1,
                live_connections: HashSet::from([0]),
                disconnect_writes: HashMap::new(),
            })),
            env,
            connection: 0,
        }
    }

    /// Open a new client connection on the same tree.
    pub fn connect(&self) -> Result<Self, StoreError> {
        let mut inner = self.lock()?;
        let connection = inner.next_connection_id;
        inner.next_connection_id += 1;
        inner.live_connections.insert(connection);

        tracing::debug!(connection, "Memory store connection opened");

        Ok(Self { inner: Arc::clone(&self.inner), env: self.env.clone(), connection })
    }

    /// Connection id of this handle.
    pub fn connection_id(&self) -> u64 {
        self.connection
    }

    /// Check if this handle's connection is still open.
    pub fn is_connected(&self) -> bool {
        self.lock().is_ok_and(|inner| inner.live_connections.contains(&self.connection))
    }

    /// Environment used to resolve server timestamps.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Drop this handle's connection as if the client vanished.
    ///
    /// Runs every registered on-disconnect write (resolving server
    /// timestamps to the current clock) and closes the connection's
    /// subscriptions. Further operations on this handle fail with
    /// [`StoreError::Disconnected`]. Returns the number of deferred writes
    /// applied.
    pub fn drop_connection(&self) -> Result<usize, StoreError> {
        let now = self.env.wall_clock_millis();
        let mut guard = self.lock()?;
        let inner = &mut *guard;

        if !inner.live_connections.remove(&self.connection) {
            return Ok(0);
        }

        let writes = inner.disconnect_writes.remove(&self.connection).unwrap_or_default();
        let applied = writes.len();
        for (path, value) in writes {
            let value = resolve_server_values(value, now);
            set_node(&mut inner.root, &path, value)?;
            inner.notify(&path);
        }

        let connection = self.connection;
        inner.subscribers.retain(|_, sub| {
            if sub.connection == connection {
                sub.sink.close();
                false
            } else {
                true
            }
        });

        tracing::info!(connection, applied, "Memory store connection dropped");

        Ok(applied)
    }

    /// Copy of the whole tree.
    pub fn dump(&self) -> Result<Value, StoreError> {
        Ok(self.lock()?.root.clone())
    }

    /// Number of subscriptions still registered.
    pub fn subscriber_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.subscribers.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStoreInner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    /// Lock and verify this handle's connection is still open.
    fn lock_connected(&self) -> Result<MutexGuard<'_, MemoryStoreInner>, StoreError> {
        let inner = self.lock()?;
        if !inner.live_connections.contains(&self.connection) {
            return Err(StoreError::Disconnected);
        }
        Ok(inner)
    }

    fn prepare(&self, value: Value) -> Result<Value, StoreError> {
        let value = resolve_server_values(value, self.env.wall_clock_millis());
        validate_keys(&value)?;
        Ok(value)
    }
}

impl MemoryStoreInner {
    /// Deliver the new value to every subscriber whose path overlaps `changed`.
    fn notify(&mut self, changed: &StorePath) {
        let root = &self.root;
        self.subscribers.retain(|id, sub| {
            if !sub.sink.is_alive() {
                tracing::debug!(subscription = id.0, "Pruning closed subscriber");
                return false;
            }
            if !sub.path.overlaps(changed) {
                return true;
            }

            let current = node_at(root, &sub.path).cloned();
            if current == sub.last {
                return true;
            }
            sub.last.clone_from(&current);

            sub.sink.deliver(Snapshot { path: sub.path.clone(), value: current })
        });
    }
}

#[async_trait]
impl<E: Environment> Store for MemoryStore<E> {
    async fn read(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        let inner = self.lock_connected()?;
        Ok(node_at(&inner.root, path).cloned())
    }

    async fn subscribe(&self, path: &StorePath) -> Result<Subscription, StoreError> {
        let mut inner = self.lock_connected()?;

        let id = SubscriptionId(inner.next_subscription_id);
        inner.next_subscription_id += 1;

        let (sink, subscription) = channel(id);
        let current = node_at(&inner.root, path).cloned();
        sink.deliver(Snapshot { path: path.clone(), value: current.clone() });

        inner.subscribers.insert(id, Subscriber {
            path: path.clone(),
            connection: self.connection,
            sink,
            last: current,
        });

        tracing::debug!(%path, subscription = id.0, "Subscribed");

        Ok(subscription)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if let Some(sub) = inner.subscribers.remove(&id) {
            sub.sink.close();
        }
        Ok(())
    }

    async fn write(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        let value = self.prepare(value)?;
        let mut inner = self.lock_connected()?;

        set_node(&mut inner.root, path, value)?;
        inner.notify(path);

        Ok(())
    }

    async fn merge(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError> {
        let mut children = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            children.push((path.join(PathSegment::new(key)?), self.prepare(value)?));
        }

        let mut inner = self.lock_connected()?;
        for (child, value) in children {
            set_node(&mut inner.root, &child, value)?;
        }
        inner.notify(path);

        Ok(())
    }

    async fn append_ordered(
        &self,
        path: &StorePath,
        value: Value,
    ) -> Result<PathSegment, StoreError> {
        let value = self.prepare(value)?;
        let mut guard = self.lock_connected()?;
        let inner = &mut *guard;

        let key = inner.sequencer.next_key(path, node_at(&inner.root, path))?;
        let child = path.join(key.clone());
        set_node(&mut inner.root, &child, value)?;
        inner.notify(&child);

        Ok(key)
    }

    async fn transaction(
        &self,
        path: &StorePath,
        mut update: TransactionFn,
    ) -> Result<TransactionOutcome, StoreError> {
        let now = self.env.wall_clock_millis();
        let mut inner = self.lock_connected()?;

        let current = node_at(&inner.root, path).cloned();
        let Some(next) = update(current.as_ref()) else {
            return Ok(TransactionOutcome { committed: false, value: current });
        };

        let next = resolve_server_values(next, now);
        validate_keys(&next)?;
        set_node(&mut inner.root, path, next)?;
        inner.notify(path);

        Ok(TransactionOutcome { committed: true, value: node_at(&inner.root, path).cloned() })
    }

    async fn on_disconnect(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        validate_keys(&resolve_server_values(value.clone(), 0))?;
        let mut inner = self.lock_connected()?;
        inner.disconnect_writes.entry(self.connection).or_default().insert(path.clone(), value);
        Ok(())
    }

    async fn cancel_on_disconnect(&self, path: &StorePath) -> Result<(), StoreError> {
        let mut inner = self.lock_connected()?;
        if let Some(writes) = inner.disconnect_writes.get_mut(&self.connection) {
            writes.remove(path);
        }
        Ok(())
    }
}

/// Node at `path`. Empty objects read as absent.
fn node_at<'a>(root: &'a Value, path: &StorePath) -> Option<&'a Value> {
    let mut node = root;
    for segment in path.segments() {
        node = node.as_object()?.get(segment.as_str())?;
    }
    if node.as_object().is_some_and(Map::is_empty) { None } else { Some(node) }
}

/// Replace the node at `path`, creating intermediate objects.
///
/// Null fields and empty objects are dropped, and writing nothing deletes the
/// node and prunes ancestors left empty.
fn set_node(root: &mut Value, path: &StorePath, value: Value) -> Result<(), StoreError> {
    let value = normalize(value);

    let Some((last, parents)) = path.segments().split_last() else {
        return match value {
            Value::Null => {
                *root = Value::Object(Map::new());
                Ok(())
            },
            Value::Object(_) => {
                *root = value;
                Ok(())
            },
            _ => Err(StoreError::InvalidPath("the root only accepts objects".to_string())),
        };
    };

    if value.is_null() {
        remove_node(root, path.segments());
        return Ok(());
    }

    let mut node = root;
    for segment in parents {
        node = ensure_object(node)
            .entry(segment.as_str().to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(node).insert(last.as_str().to_string(), value);

    Ok(())
}

/// Remove the node at `segments`. Returns whether `node` is now empty.
fn remove_node(node: &mut Value, segments: &[PathSegment]) -> bool {
    let Some(map) = node.as_object_mut() else {
        return false;
    };
    let Some((first, rest)) = segments.split_first() else {
        return map.is_empty();
    };

    if rest.is_empty() {
        map.remove(first.as_str());
    } else if let Some(child) = map.get_mut(first.as_str()) {
        if remove_node(child, rest) {
            map.remove(first.as_str());
        }
    }

    map.is_empty()
}

/// Interior node as an object, replacing a leaf if needed.
fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    match node {
        Value::Object(map) => map,
        other => {
            *other = Value::Object(Map::new());
            ensure_object(other)
        },
    }
}

/// Drop null fields and empty objects. An object left empty becomes null.
fn normalize(value: Value) -> Value {
    match value {
        Value::Object(fields) => {
            let cleaned: Map<String, Value> = fields
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if cleaned.is_empty() { Value::Null } else { Value::Object(cleaned) }
        },
        other => other,
    }
}

/// Every object key inside `value` must be a valid path segment.
fn validate_keys(value: &Value) -> Result<(), StoreError> {
    match value {
        Value::Object(fields) => {
            for (key, child) in fields {
                if let Some(reason) = segment_violation(key) {
                    return Err(StoreError::InvalidPath(format!("field {key:?}: {reason}")));
                }
                validate_keys(child)?;
            }
            Ok(())
        },
        Value::Array(items) => items.iter().try_for_each(validate_keys),
        _ => Ok(()),
    }
}
