//! Retry with exponential backoff
//!
//! Upstream calls get three attempts with exponential backoff: 1s base,
//! factor 2, capped at 10s. Only retryable errors re-enter the loop.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::error::{Error, Result};

/// Backoff policy for upstream calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            factor: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `n` (first retry is n = 1)
    fn delay_for(&self, n: u32) -> Duration {
        let factor = self.factor.saturating_pow(n.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Run `op` under the policy, retrying retryable failures
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    upstream = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "upstream call failed, retrying"
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Convenience wrapper that also bounds the whole operation by `timeout`
pub async fn with_retry_timeout<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    op_name: &str,
    op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, with_retry(policy, op_name, op)).await {
        Ok(result) => result,
        Err(_) => Err(Error::ServiceDegraded(format!(
            "{op_name} timed out after {}s",
            timeout.as_secs()
        ))),
    }
}
