//! Bounded retry with exponential backoff and jitter.
//!
//! Transient failures are retried with a delay that doubles per attempt up
//! to a cap, plus uniform random jitter so a failing batch does not hammer
//! the provider in lockstep. Permanent and not-found outcomes fail
//! immediately. The result is an explicit value, not unwound control flow.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::remote::object_store::ObjectStoreError;

/// Compute the backoff delay before retry number `attempt` (1-based).
/// Deterministic portion only; jitter is added by the caller.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.base_delay();
    let exp = base.saturating_mul(1u32 << attempt.min(16).saturating_sub(1));
    exp.min(config.max_delay())
}

fn with_jitter(delay: Duration) -> Duration {
    let jitter_max = delay.as_millis() as u64 / 2;
    if jitter_max == 0 {
        return delay;
    }
    let jitter = rand::thread_rng().gen_range(0..=jitter_max);
    delay + Duration::from_millis(jitter)
}

/// Run `op` up to `config.max_attempts` times.
///
/// Only transient errors are retried; the last transient error surfaces
/// once the attempt budget is exhausted.
pub async fn retry<T, F, Fut>(
    config: &RetryConfig,
    op_name: &str,
    mut op: F,
) -> Result<T, ObjectStoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ObjectStoreError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = with_jitter(backoff_delay(config, attempt));
                debug!(
                    op = op_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(op = op_name, attempts = attempt, error = %e, "Retry budget exhausted");
                }
                return Err(e);
            }
        }
    }
}
