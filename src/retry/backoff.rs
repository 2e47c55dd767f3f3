//! Retry configuration and exponential backoff with jitter.

use crate::core::duration_ms;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Computes the delay inserted before a retry.
///
/// The delay for retry `n` (0-indexed) is `min(max_delay, initial_delay * 2^n)`
/// widened by a uniform random jitter in `[0, jitter_fraction * delay]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,

    /// Upper bound on the un-jittered delay.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,

    /// Fraction of the delay added as random jitter, in `0.0..=1.0`.
    pub jitter_fraction: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter_fraction: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy with the given bounds and no jitter.
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            jitter_fraction: 0.0,
        }
    }

    /// Sets the jitter fraction, clamped to `0.0..=1.0`.
    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Returns the capped, un-jittered delay for retry `attempt`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Returns the delay for retry `attempt` with jitter drawn from the thread RNG.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let sample = if self.jitter_fraction > 0.0 {
            rand::thread_rng().gen_range(0.0..=1.0)
        } else {
            0.0
        };
        self.delay_with_sample(attempt, sample)
    }

    /// Returns the delay for retry `attempt` given a jitter sample in `[0, 1]`.
    pub fn delay_with_sample(&self, attempt: u32, sample: f64) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = base.mul_f64(self.jitter_fraction * sample.clamp(0.0, 1.0));
        base.saturating_add(jitter)
    }
}

/// Retry budget plus the backoff used between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Number of retries after the first attempt. Zero disables retries.
    pub max_retries: u32,

    /// Delay schedule between attempts.
    #[serde(flatten)]
    pub backoff: BackoffPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryConfig {
    /// Creates a new retry configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Sets the number of retries after the first attempt.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.backoff.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.backoff.max_delay = delay;
        self
    }

    /// Sets the jitter fraction.
    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.backoff = self.backoff.with_jitter_fraction(fraction);
        self
    }

    /// Returns whether another attempt may follow retry index `retries_done`.
    pub fn should_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 2);
        assert!(config.backoff.jitter_fraction > 0.0);
    }

    #[test]
    fn test_no_retry() {
        let config = RetryConfig::no_retry();
        assert!(!config.should_retry(0));
    }

    #[test]
    fn test_base_delay_doubles() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(60));

        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay(2), Duration::from_millis(400));
        assert_eq!(policy.base_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_capped() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(5));

        assert_eq!(policy.base_delay(3), Duration::from_secs(5));
        assert_eq!(policy.base_delay(40), Duration::from_secs(5));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(60))
            .with_jitter_fraction(0.5);

        assert_eq!(policy.delay_with_sample(2, 0.0), Duration::from_millis(400));
        assert_eq!(policy.delay_with_sample(2, 1.0), Duration::from_millis(600));

        for attempt in 0..6 {
            let low = Duration::from_millis(100) * 2u32.pow(attempt);
            let high = low.mul_f64(1.5);
            for _ in 0..50 {
                let delay = policy.delay_for_attempt(attempt);
                assert!(delay >= low, "{delay:?} below {low:?}");
                assert!(delay <= high, "{delay:?} above {high:?}");
            }
        }
    }

    #[test]
    fn test_jitter_applies_after_cap() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_millis(300))
            .with_jitter_fraction(1.0);

        assert_eq!(policy.delay_with_sample(5, 1.0), Duration::from_millis(600));
        assert_eq!(policy.delay_with_sample(5, 0.0), Duration::from_millis(300));
    }

    #[test]
    fn test_jitter_fraction_clamped() {
        let policy = BackoffPolicy::default().with_jitter_fraction(3.0);
        assert_eq!(policy.jitter_fraction, 1.0);
    }

    #[test]
    fn test_should_retry() {
        let config = RetryConfig::new().with_max_retries(2);
        assert!(config.should_retry(0));
        assert!(config.should_retry(1));
        assert!(!config.should_retry(2));
    }
}
