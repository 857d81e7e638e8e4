//! Client configuration.

/// Backoff policy for idempotent store operations.
///
/// Only errors where [`ChatError::is_transient`](crate::ChatError::is_transient)
/// holds are retried. Appends and counter increments are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (1 disables retries)
    pub max_attempts: u32,
    /// Backoff before the second attempt, in milliseconds
    pub initial_backoff_ms: u64,
    /// Upper bound on a single backoff, in milliseconds
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self { max_attempts: 1, initial_backoff_ms: 0, max_backoff_ms: 0 }
    }

    /// Backoff before attempt `attempt + 1`, without jitter.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(32);
        self.initial_backoff_ms.saturating_mul(1u64 << exponent).min(self.max_backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 4, initial_backoff_ms: 100, max_backoff_ms: 2_000 }
    }
}

/// Chat client configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Longest roster preview, in characters
    pub preview_max_chars: usize,
    /// Retry policy for idempotent operations
    pub retry: RetryPolicy,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self { preview_max_chars: 60, retry: RetryPolicy::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy { max_attempts: 10, initial_backoff_ms: 100, max_backoff_ms: 700 };

        assert_eq!(policy.backoff_ms(1), 100);
        assert_eq!(policy.backoff_ms(2), 200);
        assert_eq!(policy.backoff_ms(3), 400);
        assert_eq!(policy.backoff_ms(4), 700);
        assert_eq!(policy.backoff_ms(60), 700);
    }
}
