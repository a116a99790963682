//! Retry policy with exponential backoff and jitter

use crate::error::QueryError;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry; doubles on each subsequent attempt
    pub base_delay: Duration,

    /// Upper bound on any single backoff delay
    pub max_delay: Duration,

    /// Random fuzz added to each delay, sampled from `0..jitter`
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_secs(1),
        }
    }
}

pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Whether `error` has retry budget left after `attempts` tries
    pub fn should_retry(&self, error: &QueryError, attempts: u32) -> bool {
        attempts < error.retry_budget()
    }

    /// Backoff before retry number `attempt` (zero-based), capped at
    /// `max_delay` after jitter is applied
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt.min(16));
        let base_ms = (self.config.base_delay.as_millis() as u64).saturating_mul(exp);
        let jitter_ms = self.config.jitter.as_millis() as u64;
        let fuzz = if jitter_ms > 0 {
            rand::rng().random_range(0..jitter_ms)
        } else {
            0
        };
        Duration::from_millis(base_ms.saturating_add(fuzz)).min(self.config.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(RetryConfig {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            jitter: Duration::ZERO,
        });
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(4000));
        assert_eq!(policy.backoff_delay(10), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = RetryPolicy::new(RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(50),
        });
        for _ in 0..32 {
            let delay = policy.backoff_delay(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(150));
        }
    }

    #[test]
    fn test_should_retry_respects_budget() {
        let policy = RetryPolicy::new(RetryConfig::default());
        let network = QueryError::Network("reset".to_string());
        assert!(policy.should_retry(&network, 0));
        assert!(policy.should_retry(&network, 2));
        assert!(!policy.should_retry(&network, 3));

        let client = QueryError::Client { status: 404 };
        assert!(policy.should_retry(&client, 0));
        assert!(!policy.should_retry(&client, 1));

        assert!(!policy.should_retry(&QueryError::Timeout(Duration::from_secs(30)), 0));
        assert!(!policy.should_retry(&QueryError::Aborted, 0));
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let policy = RetryPolicy::new(RetryConfig::default());
        assert_eq!(policy.backoff_delay(u32::MAX), Duration::from_secs(30));
    }
}
