//! Bounded retry for idempotent operations.

use std::{future::Future, time::Duration};

use crate::{config::RetryPolicy, env::Environment, error::ChatError};

/// Run `attempt` until it succeeds, fails permanently, or the policy gives up.
///
/// Sleeps through the environment between attempts, so simulated runs stay
/// deterministic. Callers must only pass operations that are safe to repeat.
pub async fn retry_idempotent<E, T, F, Fut>(
    env: &E,
    policy: &RetryPolicy,
    operation: &'static str,
    mut attempt: F,
) -> Result<T, ChatError>
where
    E: Environment,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChatError>>,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempts < policy.max_attempts => {
                let base = policy.backoff_ms(attempts);
                let jitter = if base == 0 { 0 } else { env.random_u64() % (base / 2 + 1) };
                let delay_ms = base + jitter;

                tracing::warn!(operation, attempts, delay_ms, error = %err, "Retrying store operation");

                env.sleep(Duration::from_millis(delay_ms)).await;
            },
            Err(err) => return Err(err),
        }
    }
}
