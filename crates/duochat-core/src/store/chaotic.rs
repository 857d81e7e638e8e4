//! Chaotic store wrapper for fault injection testing
//!
//! Delegates to an underlying store but randomly fails operations to exercise
//! retry and recovery paths. A failed operation never reaches the inner
//! store, so it has no effect.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{Store, StoreError, Subscription, SubscriptionId, TransactionFn, TransactionOutcome};
use crate::path::{PathSegment, StorePath};

/// Chaotic store wrapper that randomly injects failures
///
/// Uses `Arc<Mutex<>>` for the RNG state, making it Clone and thread-safe.
/// Clones share the RNG and the operation counter.
#[derive(Clone)]
pub struct ChaoticStore<S: Store> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    /// Operations attempted, failed or not
    operation_count: Arc<AtomicUsize>,
    /// Operations that were failed on purpose
    injected_failures: Arc<AtomicUsize>,
}

/// Linear congruential generator. Reproducible with the same seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S: Store> ChaoticStore<S> {
    /// Create a chaotic wrapper with the default seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(AtomicUsize::new(0)),
            injected_failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying store (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of store operations attempted.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    /// Number of operations failed by injection.
    pub fn injected_failures(&self) -> usize {
        self.injected_failures.load(Ordering::Relaxed)
    }

    /// Count the operation and decide whether it fails.
    fn roll(&self, operation: &'static str) -> Result<(), StoreError> {
        self.operation_count.fetch_add(1, Ordering::Relaxed);

        let fail = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .should_fail(self.failure_rate);

        if fail {
            self.injected_failures.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(operation, "Injecting store failure");
            return Err(StoreError::Unavailable("chaotic failure injection".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: Store> Store for ChaoticStore<S> {
    async fn read(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        self.roll("read")?;
        self.inner.read(path).await
    }

    async fn subscribe(&self, path: &StorePath) -> Result<Subscription, StoreError> {
        self.roll("subscribe")?;
        self.inner.subscribe(path).await
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError> {
        self.roll("unsubscribe")?;
        self.inner.unsubscribe(id).await
    }

    async fn write(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.roll("write")?;
        self.inner.write(path, value).await
    }

    async fn merge(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.roll("merge")?;
        self.inner.merge(path, fields).await
    }

    async fn append_ordered(
        &self,
        path: &StorePath,
        value: Value,
    ) -> Result<PathSegment, StoreError> {
        self.roll("append_ordered")?;
        self.inner.append_ordered(path, value).await
    }

    async fn transaction(
        &self,
        path: &StorePath,
        update: TransactionFn,
    ) -> Result<TransactionOutcome, StoreError> {
        self.roll("transaction")?;
        self.inner.transaction(path, update).await
    }

    async fn on_disconnect(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.roll("on_disconnect")?;
        self.inner.on_disconnect(path, value).await
    }

    async fn cancel_on_disconnect(&self, path: &StorePath) -> Result<(), StoreError> {
        self.roll("cancel_on_disconnect")?;
        self.inner.cancel_on_disconnect(path).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{env::SystemEnv, store::MemoryStore};

    fn path(raw: &str) -> StorePath {
        StorePath::parse(raw).expect("valid path")
    }

    #[tokio::test]
    async fn zero_failure_rate_never_fails() {
        let store = ChaoticStore::new(MemoryStore::new(SystemEnv::new()), 0.0);

        for i in 0..100 {
            store.write(&path("a"), json!(i)).await.expect("write should succeed");
        }

        assert_eq!(store.operation_count(), 100);
        assert_eq!(store.injected_failures(), 0);
    }

    #[tokio::test]
    async fn full_failure_rate_always_fails() {
        let store = ChaoticStore::new(MemoryStore::new(SystemEnv::new()), 1.0);

        for _ in 0..20 {
            assert!(matches!(
                store.write(&path("a"), json!(1)).await,
                Err(StoreError::Unavailable(_))
            ));
        }

        // Nothing reached the inner store.
        assert_eq!(store.inner().read(&path("a")).await.expect("read"), None);
    }

    #[tokio::test]
    async fn same_seed_same_failures() {
        async fn pattern(seed: u64) -> Vec<bool> {
            let store = ChaoticStore::with_seed(MemoryStore::new(SystemEnv::new()), 0.5, seed);
            let mut outcomes = Vec::new();
            for _ in 0..50 {
                outcomes.push(store.read(&path("a")).await.is_ok());
            }
            outcomes
        }

        assert_eq!(pattern(42).await, pattern(42).await);
        assert_ne!(pattern(42).await, pattern(43).await);
    }

    #[test]
    #[should_panic(expected = "failure_rate must be between 0.0 and 1.0")]
    fn rejects_invalid_failure_rate() {
        let _ = ChaoticStore::new(MemoryStore::new(SystemEnv::new()), 1.5);
    }
}
