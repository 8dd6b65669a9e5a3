use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::Result;

/// Retry policy for transient backend failures: a fixed attempt budget with
/// exponential backoff and jitter. One executor replaces per-call-site
/// fallback chains.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: u32,
}

impl RetryPolicy {
    /// Default policy for backend calls: 3 attempts, 100ms then 400ms.
    pub fn transient() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            backoff_factor: 4,
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            backoff_factor: 1,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.base_delay * self.backoff_factor.saturating_pow(attempt);
        let jitter = Duration::from_millis(rand::rng().random_range(0..25));
        backoff + jitter
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// attempt budget is exhausted. Integrity and validation errors are never
/// retried.
pub async fn retry<T, Fut, Op>(policy: RetryPolicy, mut op: Op) -> Result<T>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
