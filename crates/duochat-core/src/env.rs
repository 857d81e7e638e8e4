//! Environment abstraction for deterministic testing.
//!
//! Decouples chat logic from system resources (wall clock, sleeping,
//! randomness). Production code uses [`SystemEnv`]; the simulation harness
//! provides a virtual clock and a seeded RNG so scenarios replay exactly.

use std::time::Duration;

/// Abstract environment providing time, randomness, and async sleep.
///
/// # Invariants
///
/// Implementations MUST guarantee:
///
/// - `wall_clock_millis()` never goes backwards within one environment
/// - `random_bytes()` uses OS entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time as Unix milliseconds.
    ///
    /// Used for client-side `sentAt` stamps, presence transition times and
    /// report records. Ordering never depends on this value.
    fn wall_clock_millis(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait. Only retry backoff uses it.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

/// Production environment using the system clock and OS randomness.
///
/// # Panics
///
/// Panics if the OS RNG fails or the system clock is before the Unix epoch.
/// Both indicate a broken host rather than a recoverable condition.
#[derive(Debug, Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::expect_used)]
    fn wall_clock_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after Unix epoch (1970-01-01)")
            .as_millis() as u64
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_env_clock_is_after_2020() {
        let env = SystemEnv::new();
        assert!(env.wall_clock_millis() > 1_577_836_800_000);
    }

    #[test]
    fn system_env_random_bytes_are_random() {
        let env = SystemEnv::new();

        let mut bytes1 = [0u8; 32];
        let mut bytes2 = [0u8; 32];

        env.random_bytes(&mut bytes1);
        env.random_bytes(&mut bytes2);

        assert_ne!(bytes1, bytes2, "Random bytes should differ");
    }

    #[tokio::test]
    async fn system_env_sleep_works() {
        let env = SystemEnv::new();

        let start = std::time::Instant::now();
        env.sleep(Duration::from_millis(20)).await;

        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
