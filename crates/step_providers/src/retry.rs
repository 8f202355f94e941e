use rand::{RngExt, rng};
use std::time::Duration;

use crate::ProviderError;

/// Retry policy with exponential backoff and jitter.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Re-run `f` while it fails with an error `should_retry` accepts.
    pub async fn retry_if<F, Fut, T, E, P>(&self, mut f: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries || !should_retry(&e) {
                        return Err(e);
                    }
                    let delay = self.backoff(attempt);
                    tracing::debug!(attempt, ?delay, "retrying after transient failure");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Retry only the failures [`ProviderError::is_transient`] accepts.
    pub async fn retry_transient<F, Fut, T>(&self, f: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        self.retry_if(f, ProviderError::is_transient).await
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let max_delay = self.base_delay * (1u32 << attempt.min(16));
        let max_ms = max_delay.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let jitter = rng().random_range(0..max_ms);
        Duration::from_millis(jitter)
    }
}
