//! Simulated environment: virtual clock and seeded randomness.
//!
//! Time only moves when a test advances it or when code sleeps, and sleeping
//! returns at once after moving the clock. Clones share the clock and the
//! RNG, so a store and every client built from one `SimEnv` agree on "now".

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use duochat_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministic environment for simulation tests.
#[derive(Clone)]
pub struct SimEnv {
    now_ms: Arc<AtomicU64>,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimEnv {
    /// Clock value of a fresh environment (2023-11-14T22:13:20Z).
    pub const START_MS: u64 = 1_700_000_000_000;

    /// Environment with seed 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment whose random stream is fixed by `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(Self::START_MS)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Current virtual time.
    pub fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        self.advance_ms(duration.as_millis() as u64);
    }

    /// Move the clock forward by `ms` milliseconds.
    pub fn advance_ms(&self, ms: u64) {
        let now = self.now_ms.fetch_add(ms, Ordering::SeqCst) + ms;
        tracing::trace!(now_ms = now, advanced_ms = ms, "Virtual clock advanced");
    }

    /// Jump to `ms`. Ignored if that would move the clock backwards.
    pub fn set_time_ms(&self, ms: u64) {
        self.now_ms.fetch_max(ms, Ordering::SeqCst);
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("now_ms", &self.now_ms()).finish_non_exhaustive()
    }
}

impl Environment for SimEnv {
    fn wall_clock_millis(&self) -> u64 {
        self.now_ms()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_only_moves_forward() {
        let env = SimEnv::new();
        assert_eq!(env.now_ms(), SimEnv::START_MS);

        env.advance(Duration::from_secs(2));
        assert_eq!(env.wall_clock_millis(), SimEnv::START_MS + 2_000);

        env.set_time_ms(SimEnv::START_MS);
        assert_eq!(env.now_ms(), SimEnv::START_MS + 2_000);
    }

    #[test]
    fn clones_share_the_clock() {
        let env = SimEnv::new();
        let other = env.clone();

        other.advance_ms(5);

        assert_eq!(env.now_ms(), SimEnv::START_MS + 5);
    }

    #[test]
    fn same_seed_same_bytes() {
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        SimEnv::with_seed(9).random_bytes(&mut a);
        SimEnv::with_seed(9).random_bytes(&mut b);
        assert_eq!(a, b);

        SimEnv::with_seed(10).random_bytes(&mut b);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn sleep_advances_virtual_time() {
        let env = SimEnv::new();
        env.sleep(Duration::from_secs(60)).await;
        assert_eq!(env.now_ms(), SimEnv::START_MS + 60_000);
    }
}
