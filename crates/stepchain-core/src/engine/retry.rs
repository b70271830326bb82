//! Attempt budgets and exponential backoff.
//!
//! A step with `max_retries = n` gets `n + 1` attempts, shared between
//! transport failures and criteria failures. Only transport failures wait
//! between attempts: the delay doubles per attempt (1s, 2s, 4s...) up to a
//! cap. Criteria retries re-invoke immediately.

use std::time::Duration;

use stepchain_types::config::BackoffConfig;

/// Total attempts allowed for a step.
pub fn attempts_allowed(max_retries: u32) -> u32 {
    max_retries + 1
}

/// Whether another attempt remains after `attempt` (1-based) failed.
pub fn should_retry(attempt: u32, max_retries: u32) -> bool {
    attempt < attempts_allowed(max_retries)
}

/// Exponential backoff between transport-failure attempts.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Delay before the attempt following `attempt` (1-based).
    ///
    /// Attempt 1 failing waits `base`, attempt 2 waits `2 * base`, and so on,
    /// saturating at the cap.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base.saturating_mul(1u32 << exp);
        delay.min(self.cap)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_allowed_is_retries_plus_one() {
        assert_eq!(attempts_allowed(0), 1);
        assert_eq!(attempts_allowed(3), 4);
    }

    #[test]
    fn should_retry_within_budget() {
        assert!(should_retry(1, 2));
        assert!(should_retry(2, 2));
        assert!(!should_retry(3, 2));
    }

    #[test]
    fn zero_retries_means_single_attempt() {
        assert!(!should_retry(1, 0));
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(8));
    }

    #[test]
    fn delay_saturates_at_cap() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(policy.delay_after(6), Duration::from_secs(30));
        assert_eq!(policy.delay_after(40), Duration::from_secs(30));
    }

    #[test]
    fn from_config_uses_milliseconds() {
        let policy = BackoffPolicy::from_config(&BackoffConfig {
            base_delay_ms: 500,
            max_delay_ms: 2_000,
        });
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2_000));
    }
}
