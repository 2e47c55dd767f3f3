//! Circuit breaker configuration.

use crate::core::duration_ms;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn count_timeouts_default() -> bool {
    true
}

/// Configuration for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive terminal failures that trip the breaker open.
    pub failure_threshold: u32,

    /// How long the breaker stays open before a trial is admitted.
    #[serde(rename = "reset_timeout_ms", with = "duration_ms")]
    pub reset_timeout: Duration,

    /// Whether lease timeouts count toward `failure_threshold`.
    #[serde(default = "count_timeouts_default")]
    pub count_timeouts: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            count_timeouts: true,
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the reset timeout.
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Sets whether timeouts count as failures.
    pub fn with_count_timeouts(mut self, count: bool) -> Self {
        self.count_timeouts = count;
        self
    }

    /// Creates a configuration that trips early and cools down slowly.
    ///
    /// This configuration:
    /// - Uses a lower failure threshold (3)
    /// - Keeps circuits open longer (60 seconds)
    pub fn strict() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(60),
            count_timeouts: true,
        }
    }

    /// Creates a configuration optimized for high availability.
    ///
    /// This configuration:
    /// - Uses a higher failure threshold (10)
    /// - Keeps circuits open for a shorter time (10 seconds)
    /// - Ignores timeouts, which are common under load
    pub fn high_availability() -> Self {
        Self {
            failure_threshold: 10,
            reset_timeout: Duration::from_secs(10),
            count_timeouts: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.reset_timeout, Duration::from_secs(30));
        assert!(config.count_timeouts);
    }

    #[test]
    fn test_config_builder() {
        let config = CircuitBreakerConfig::new()
            .with_failure_threshold(10)
            .with_reset_timeout(Duration::from_secs(60))
            .with_count_timeouts(false);

        assert_eq!(config.failure_threshold, 10);
        assert_eq!(config.reset_timeout, Duration::from_secs(60));
        assert!(!config.count_timeouts);
    }

    #[test]
    fn test_presets() {
        assert!(CircuitBreakerConfig::strict().failure_threshold < 5);
        assert!(!CircuitBreakerConfig::high_availability().count_timeouts);
    }
}
