//! Retry policy with exponential backoff.

use std::time::Duration;

use herald_common::QueueConfig;

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts before a retryable job is dead-lettered.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(60),    // 1 minute
            max_delay: Duration::from_secs(3600 * 24), // 24 hours
            multiplier: 2.0,
        }
    }
}

impl From<&QueueConfig> for RetryConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_secs(config.initial_backoff_secs),
            max_delay: Duration::from_secs(config.max_backoff_secs),
            ..Self::default()
        }
    }
}

impl RetryConfig {
    /// Delay after the given failed attempt (1-indexed).
    #[must_use]
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }

    /// Whether a job that has made `attempts` attempts may run again.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let config = RetryConfig::default();

        assert_eq!(config.delay_after_attempt(1), Duration::from_secs(60));
        assert_eq!(config.delay_after_attempt(2), Duration::from_secs(120));
        assert_eq!(config.delay_after_attempt(3), Duration::from_secs(240));
        assert_eq!(config.delay_after_attempt(4), Duration::from_secs(480));
    }

    #[test]
    fn test_max_delay() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_secs(3600),
            max_delay: Duration::from_secs(7200),
            multiplier: 2.0,
        };

        assert_eq!(config.delay_after_attempt(6), Duration::from_secs(7200));
        assert_eq!(config.delay_after_attempt(u32::MAX), Duration::from_secs(7200));
    }

    #[test]
    fn test_should_retry() {
        let config = RetryConfig {
            max_attempts: 3,
            ..Default::default()
        };

        assert!(config.should_retry(1));
        assert!(config.should_retry(2));
        assert!(!config.should_retry(3));
        assert!(!config.should_retry(4));
    }

    #[test]
    fn test_from_queue_config() {
        let queue = QueueConfig {
            max_attempts: 8,
            initial_backoff_secs: 5,
            max_backoff_secs: 50,
            ..QueueConfig::default()
        };
        let config = RetryConfig::from(&queue);

        assert_eq!(config.max_attempts, 8);
        assert_eq!(config.delay_after_attempt(1), Duration::from_secs(5));
        assert_eq!(config.delay_after_attempt(5), Duration::from_secs(50));
    }
}
