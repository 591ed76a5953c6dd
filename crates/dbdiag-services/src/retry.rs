//! Exponential-backoff retry for transient upstream failures.

use dbdiag_core::config::RetryConfig;
use dbdiag_core::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run `op` up to `retry.max_attempts` times, sleeping with exponential
/// backoff between attempts. Only transient errors are retried; permanent
/// errors propagate immediately.
pub async fn with_retry<T, F, Fut>(retry: &RetryConfig, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = retry.max_attempts.max(1);
    let mut delay_ms = retry.initial_delay_ms;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < attempts => {
                warn!(
                    op = op_name,
                    attempt,
                    max_attempts = attempts,
                    delay_ms,
                    error = %err,
                    "transient upstream failure, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = ((delay_ms as f64) * retry.backoff_multiplier) as u64;
                delay_ms = delay_ms.min(retry.max_delay_ms);
            }
            Err(err) => return Err(err),
        }
    }

    // Unreachable: the loop always returns on the last attempt.
    Err(Error::upstream(format!("{op_name}: retries exhausted")))
}
