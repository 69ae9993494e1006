//! Exponential backoff.

use crate::config::RetryConfig;
use crate::error::SyncResult;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Counts retries and hands out exponentially growing delays.
///
/// Each retry sequence owns its counter; nothing is shared between
/// unrelated sequences.
#[derive(Debug, Clone)]
pub struct BackoffCounter {
    config: RetryConfig,
    retries: u32,
}

impl BackoffCounter {
    /// Creates a counter at its seed.
    pub fn new(config: RetryConfig) -> Self {
        Self { config, retries: 0 }
    }

    /// Returns the next delay and advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.config.delay_for_retry(self.retries);
        self.retries = self.retries.saturating_add(1);
        delay
    }

    /// Number of delays handed out since the last reset.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Goes back to the seed delay.
    pub fn reset(&mut self) {
        self.retries = 0;
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent.
///
/// With `retry_on_fail` unset the operation runs exactly once.
pub(crate) async fn with_retry<T, F, Fut>(
    retry: &RetryConfig,
    retry_on_fail: bool,
    what: &'static str,
    mut op: F,
) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let mut backoff = BackoffCounter::new(retry.clone());
    let mut attempts = 0u32;
    loop {
        attempts = attempts.saturating_add(1);
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if retry_on_fail && e.is_retryable() && retry.allows_attempt(attempts) => {
                let delay = backoff.next_delay();
                warn!(
                    task = what,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
