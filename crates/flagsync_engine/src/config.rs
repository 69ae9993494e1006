//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Configuration for synchronization, recording and streaming.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Polling period for flag changes.
    pub flags_refresh_rate: Duration,
    /// Polling period for segment membership.
    pub segments_refresh_rate: Duration,
    /// Period between record flushes.
    pub records_refresh_rate: Duration,
    /// Whether polling periods are randomized to spread load.
    pub randomize_polling: bool,
    /// Whether the push channel is used.
    pub streaming_enabled: bool,
    /// How long to wait for readiness before signalling a timeout.
    pub ready_timeout: Option<Duration>,
    /// Retry configuration for sync tasks.
    pub retry: RetryConfig,
    /// Number of task bodies that may run at once.
    pub worker_count: usize,
    /// How long `stop` waits for in-flight tasks.
    pub shutdown_grace: Duration,
    /// Liveness window of the push connection.
    pub streaming_keep_alive: Duration,
    /// Reconnect backoff of the push connection.
    pub reconnect: RetryConfig,
    /// How long before token expiry the push connection is renewed.
    pub token_expiry_margin: Duration,
    /// Records posted per request.
    pub records_per_push: usize,
    /// Records pushed before a flush is requested.
    pub record_queue_size: u64,
    /// Bytes pushed before a flush is requested.
    pub record_queue_bytes: u64,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            flags_refresh_rate: Duration::from_secs(3600),
            segments_refresh_rate: Duration::from_secs(1800),
            records_refresh_rate: Duration::from_secs(1800),
            randomize_polling: true,
            streaming_enabled: true,
            ready_timeout: Some(Duration::from_secs(10)),
            retry: RetryConfig::default(),
            worker_count: 2,
            shutdown_grace: Duration::from_secs(60),
            streaming_keep_alive: Duration::from_secs(70),
            reconnect: RetryConfig::default(),
            token_expiry_margin: Duration::from_secs(60),
            records_per_push: 2000,
            record_queue_size: 10_000,
            record_queue_bytes: 5 * 1024 * 1024,
        }
    }

    /// Sets the flags polling period.
    pub fn with_flags_refresh_rate(mut self, rate: Duration) -> Self {
        self.flags_refresh_rate = rate;
        self
    }

    /// Sets the segments polling period.
    pub fn with_segments_refresh_rate(mut self, rate: Duration) -> Self {
        self.segments_refresh_rate = rate;
        self
    }

    /// Sets the record flush period.
    pub fn with_records_refresh_rate(mut self, rate: Duration) -> Self {
        self.records_refresh_rate = rate;
        self
    }

    /// Enables or disables randomized polling periods.
    pub fn with_randomized_polling(mut self, enabled: bool) -> Self {
        self.randomize_polling = enabled;
        self
    }

    /// Enables or disables streaming.
    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming_enabled = enabled;
        self
    }

    /// Sets the readiness timeout; `None` disables it.
    pub fn with_ready_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the worker count (at least one).
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Sets the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Sets the push connection liveness window.
    pub fn with_streaming_keep_alive(mut self, window: Duration) -> Self {
        self.streaming_keep_alive = window;
        self
    }

    /// Sets the push reconnect backoff.
    pub fn with_reconnect(mut self, reconnect: RetryConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the token expiry margin.
    pub fn with_token_expiry_margin(mut self, margin: Duration) -> Self {
        self.token_expiry_margin = margin;
        self
    }

    /// Sets how many records are posted per request.
    pub fn with_records_per_push(mut self, count: usize) -> Self {
        self.records_per_push = count.max(1);
        self
    }

    /// Sets the flush thresholds of the record queues.
    pub fn with_record_queue_limits(mut self, records: u64, bytes: u64) -> Self {
        self.record_queue_size = records;
        self.record_queue_bytes = bytes;
        self
    }

    /// Returns the effective polling period for a configured maximum.
    pub fn polling_period(&self, max: Duration) -> Duration {
        if self.randomize_polling {
            randomized_period(max)
        } else {
            max
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Picks a period uniformly in `[max / 2, max]`.
pub fn randomized_period(max: Duration) -> Duration {
    let min = max / 2;
    if min >= max {
        return max;
    }
    rand::thread_rng().gen_range(min..=max)
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts; `0` retries until success.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30 * 60),
            backoff_multiplier: 2.0,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Returns true if another attempt is allowed after `attempts` failures.
    pub fn allows_attempt(&self, attempts: u32) -> bool {
        self.max_attempts == 0 || attempts < self.max_attempts
    }

    /// Calculates the delay before retry number `retry` (0-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let delay_secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else if capped.is_finite() {
            Duration::ZERO
        } else {
            self.max_delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_defaults() {
        let config = SyncConfig::default();

        assert_eq!(config.flags_refresh_rate, Duration::from_secs(3600));
        assert_eq!(config.segments_refresh_rate, Duration::from_secs(1800));
        assert!(config.streaming_enabled);
        assert_eq!(config.ready_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.shutdown_grace, Duration::from_secs(60));
        assert_eq!(config.streaming_keep_alive, Duration::from_secs(70));
        assert_eq!(config.records_per_push, 2000);
        assert_eq!(config.record_queue_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_flags_refresh_rate(Duration::from_secs(30))
            .with_streaming(false)
            .with_ready_timeout(None)
            .with_worker_count(0)
            .with_randomized_polling(false);

        assert_eq!(config.flags_refresh_rate, Duration::from_secs(30));
        assert!(!config.streaming_enabled);
        assert_eq!(config.ready_timeout, None);
        assert_eq!(config.worker_count, 1);
        assert_eq!(
            config.polling_period(Duration::from_secs(30)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn randomized_period_in_range() {
        let max = Duration::from_secs(3600);
        for _ in 0..100 {
            let period = randomized_period(max);
            assert!(period >= Duration::from_secs(1800));
            assert!(period <= max);
        }
        assert_eq!(randomized_period(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn retry_delays_double_from_one_second() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for_retry(0), Duration::from_secs(1));
        assert_eq!(retry.delay_for_retry(1), Duration::from_secs(2));
        assert_eq!(retry.delay_for_retry(2), Duration::from_secs(4));
    }

    #[test]
    fn retry_delay_respects_max() {
        let retry = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        assert_eq!(retry.delay_for_retry(5), Duration::from_secs(5));
        assert_eq!(retry.delay_for_retry(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn attempt_limits() {
        assert!(RetryConfig::new(0).allows_attempt(1_000));
        assert!(RetryConfig::new(3).allows_attempt(2));
        assert!(!RetryConfig::new(3).allows_attempt(3));
        assert!(!RetryConfig::no_retry().allows_attempt(1));
    }
}
