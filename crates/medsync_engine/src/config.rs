//! Configuration for the sync engine.

use medsync_protocol::DEFAULT_MAX_RETRIES;
use rand::Rng;
use std::time::Duration;

/// Configuration for the sync orchestrator and its components.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Retry ceiling stamped on newly queued operations.
    pub max_retries: u32,
    /// Refresh an unresolved conflict for the same record instead of
    /// registering a second one.
    pub dedupe_conflicts: bool,
    /// Backoff between failed sync passes.
    pub retry: RetryConfig,
    /// Retries for persistence writes.
    pub persist_retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            dedupe_conflicts: true,
            retry: RetryConfig::new(5),
            persist_retry: RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(20))
                .with_max_delay(Duration::from_millis(500)),
        }
    }

    /// Sets the retry ceiling for new operations.
    ///
    /// Every operation gets at least one attempt, so zero is raised to one.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Enables or disables conflict deduplication.
    pub fn with_dedupe_conflicts(mut self, dedupe: bool) -> Self {
        self.dedupe_conflicts = dedupe;
        self
    }

    /// Sets the backoff between failed sync passes.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the retry behaviour for persistence writes.
    pub fn with_persist_retry(mut self, retry: RetryConfig) -> Self {
        self.persist_retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded backoff schedule.
///
/// Used twice by the engine: [`SyncConfig::persist_retry`] spaces out
/// rewrites of a collection whose store write failed, and
/// [`SyncConfig::retry`] spaces out automatic sync passes after a pass
/// left operations waiting. The delay doubles from `initial_delay` on
/// every attempt and is capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Add up to a quarter of the delay at random.
    pub jitter: bool,
}

impl RetryConfig {
    /// Creates a schedule of `max_attempts` starting at one second.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }

    /// A single attempt with no delay.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Sets the first delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the delay cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait before `attempt` (0-indexed). The first attempt runs
    /// immediately.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        let delay = self.initial_delay.saturating_mul(factor).min(self.max_delay);

        if self.jitter {
            delay + delay.mul_f64(0.25 * rand::thread_rng().gen::<f64>())
        } else {
            delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_max_retries(5)
            .with_dedupe_conflicts(false)
            .with_persist_retry(RetryConfig::no_retry());

        assert_eq!(config.max_retries, 5);
        assert!(!config.dedupe_conflicts);
        assert_eq!(config.persist_retry.max_attempts, 1);
    }

    #[test]
    fn sync_config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert!(config.dedupe_conflicts);
    }

    #[test]
    fn zero_retries_means_one_attempt() {
        let config = SyncConfig::new().with_max_retries(0);
        assert_eq!(config.max_retries, 1);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5).with_initial_delay(Duration::from_millis(100));

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_without_jitter_is_exact() {
        let config = RetryConfig::new(4)
            .with_initial_delay(Duration::from_millis(50))
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(50));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5));

        let delay = config.delay_for_attempt(5);
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_millis(6250));
        assert!(config.delay_for_attempt(40) <= Duration::from_millis(6250));
    }
}
