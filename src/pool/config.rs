//! Resource pool configuration.

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::core::{duration_ms, ConfigError};
use crate::retry::RetryConfig;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn event_capacity_default() -> usize {
    64
}

/// Configuration for a [`ResourcePool`](crate::ResourcePool).
///
/// Immutable once the pool is built. Every construction path runs
/// [`validate`](Self::validate).
///
/// # TOML
///
/// ```toml
/// name = "postgres"
/// max_concurrent = 8
/// lease_timeout_ms = 5000
/// heartbeat_interval_ms = 0
///
/// [retry]
/// max_retries = 3
/// initial_delay_ms = 100
/// max_delay_ms = 2000
/// jitter_fraction = 0.2
///
/// [circuit]
/// failure_threshold = 5
/// reset_timeout_ms = 30000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePoolConfig {
    /// Identifies the pool in logs and events.
    pub name: String,

    /// Maximum number of leases held at once.
    pub max_concurrent: usize,

    /// How long a granted operation may run. Zero means unbounded.
    #[serde(rename = "lease_timeout_ms", with = "duration_ms")]
    pub lease_timeout: Duration,

    /// Retry budget and backoff.
    pub retry: RetryConfig,

    /// Circuit breaker settings.
    pub circuit: CircuitBreakerConfig,

    /// Period of the heartbeat probe. Zero disables it.
    #[serde(rename = "heartbeat_interval_ms", with = "duration_ms")]
    pub heartbeat_interval: Duration,

    /// Buffer size of the lifecycle event channel.
    #[serde(default = "event_capacity_default")]
    pub event_capacity: usize,
}

impl Default for ResourcePoolConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_concurrent: 4,
            lease_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            circuit: CircuitBreakerConfig::default(),
            heartbeat_interval: Duration::ZERO,
            event_capacity: event_capacity_default(),
        }
    }
}

impl ResourcePoolConfig {
    /// Creates a configuration with defaults and the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the concurrency ceiling.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Sets the lease timeout.
    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the circuit breaker configuration.
    pub fn with_circuit(mut self, circuit: CircuitBreakerConfig) -> Self {
        self.circuit = circuit;
        self
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Returns true when a granted operation may run forever.
    ///
    /// Such a pool relies on callers passing a cancellation token.
    pub fn is_unbounded(&self) -> bool {
        self.lease_timeout.is_zero()
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("name", "must not be empty"));
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid("max_concurrent", "must be at least 1"));
        }
        if self.circuit.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "circuit.failure_threshold",
                "must be at least 1",
            ));
        }
        let jitter = self.retry.backoff.jitter_fraction;
        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::invalid(
                "retry.jitter_fraction",
                format!("must be within 0.0..=1.0, got {jitter}"),
            ));
        }
        if self.retry.backoff.initial_delay > self.retry.backoff.max_delay {
            return Err(ConfigError::invalid(
                "retry.initial_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::invalid("event_capacity", "must be at least 1"));
        }
        Ok(())
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
name = "postgres"
max_concurrent = 8
lease_timeout_ms = 5000
heartbeat_interval_ms = 1000

[retry]
max_retries = 3
initial_delay_ms = 100
max_delay_ms = 2000
jitter_fraction = 0.25

[circuit]
failure_threshold = 4
reset_timeout_ms = 15000
"#;

    #[test]
    fn test_default_config_is_valid() {
        let config = ResourcePoolConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.is_unbounded());
    }

    #[test]
    fn test_from_toml_str() {
        let config = ResourcePoolConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.name, "postgres");
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.lease_timeout, Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.backoff.max_delay, Duration::from_secs(2));
        assert_eq!(config.circuit.failure_threshold, 4);
        assert!(config.circuit.count_timeouts);
        assert_eq!(config.event_capacity, 64);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = ResourcePoolConfig::load(file.path()).unwrap();
        assert_eq!(config.name, "postgres");
    }

    #[test]
    fn test_load_missing_file() {
        let err = ResourcePoolConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_parse_error_on_missing_field() {
        let err = ResourcePoolConfig::from_toml_str("name = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let err = ResourcePoolConfig::new("x")
            .with_max_concurrent(0)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "max_concurrent",
                ..
            }
        ));
    }

    #[test]
    fn test_validation_rejects_zero_threshold() {
        let config = ResourcePoolConfig::new("x")
            .with_circuit(CircuitBreakerConfig::new().with_failure_threshold(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_delays() {
        let config = ResourcePoolConfig::new("x").with_retry(
            RetryConfig::new()
                .with_initial_delay(Duration::from_secs(5))
                .with_max_delay(Duration::from_secs(1)),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unbounded_lease() {
        let config = ResourcePoolConfig::new("x").with_lease_timeout(Duration::ZERO);
        assert!(config.is_unbounded());
    }
}
