//! Exponential backoff for transient remote failures.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::TaleforgeError;

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ms = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(exp))
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or
/// `policy.max_attempts` is exhausted. The last error is returned as-is.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, TaleforgeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TaleforgeError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(attempt, error = %e, "{} failed, retrying in {:?}", label, delay);
                tokio::time::sleep(delay).await;
                debug!(attempt, "retrying {}", label);
            }
            Err(e) => return Err(e),
        }
    }
}
