use std::future::Future;
use std::time::Duration;

use crate::error::AppResult;

/// Retry policy applied uniformly to every sync batch: a bounded number of
/// attempts with exponential backoff. Carries no I/O of its own.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff before retry number `retry` (0-based): base * 2^retry
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry)
    }

    /// Runs `op` until it succeeds or attempts are exhausted, sleeping the
    /// backoff between attempts. The final error is returned to the caller,
    /// which decides whether to skip or abandon.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if retry + 1 < self.max_attempts => {
                    let delay = self.delay_for(retry);
                    tracing::warn!(
                        error = %e,
                        attempt = retry + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Batch attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
