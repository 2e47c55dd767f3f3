//! Circuit breaker state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// The current state of a circuit breaker.
#[derive(Debug, Clone)]
pub enum BreakerState {
    /// Circuit is closed; requests pass through normally.
    Closed {
        /// Number of consecutive failures.
        consecutive_failures: u32,
    },

    /// Circuit is open; requests are rejected.
    Open {
        /// When the circuit was opened.
        opened_at: Instant,
        /// Failure count at the moment the circuit tripped.
        consecutive_failures: u32,
    },

    /// Circuit is half-open; at most one trial request is in flight.
    HalfOpen {
        /// Whether the trial slot is taken.
        trial_in_flight: bool,
        /// Failure count carried over from the open state.
        consecutive_failures: u32,
    },
}

impl BreakerState {
    /// Creates a new closed state.
    pub fn closed() -> Self {
        Self::Closed {
            consecutive_failures: 0,
        }
    }

    /// Returns `true` if the circuit is closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }

    /// Returns `true` if the circuit is open.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Returns `true` if the circuit is half-open.
    pub fn is_half_open(&self) -> bool {
        matches!(self, Self::HalfOpen { .. })
    }

    /// Returns the consecutive failure count.
    pub fn consecutive_failures(&self) -> u32 {
        match self {
            Self::Closed {
                consecutive_failures,
            }
            | Self::Open {
                consecutive_failures,
                ..
            }
            | Self::HalfOpen {
                consecutive_failures,
                ..
            } => *consecutive_failures,
        }
    }

    /// Returns the data-free view of this state.
    pub fn kind(&self) -> CircuitState {
        match self {
            Self::Closed { .. } => CircuitState::Closed,
            Self::Open { .. } => CircuitState::Open,
            Self::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Returns the name of the state.
    pub fn name(&self) -> &'static str {
        self.kind().name()
    }
}

impl Default for BreakerState {
    fn default() -> Self {
        Self::closed()
    }
}

/// Data-free circuit state, as reported in snapshots and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests pass through.
    Closed,
    /// Requests are rejected.
    Open,
    /// One trial request is admitted.
    HalfOpen,
}

impl CircuitState {
    /// Returns the name of the state.
    pub fn name(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A change of circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// State before the change.
    pub from: CircuitState,
    /// State after the change.
    pub to: CircuitState,
}

/// Metrics about circuit breaker behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakerMetrics {
    /// Number of outcomes that counted as successes.
    pub successes: u64,
    /// Number of outcomes that counted as failures.
    pub failures: u64,
    /// Number of requests rejected while open or while a trial was in flight.
    pub rejected: u64,
    /// Number of trials admitted from half-open.
    pub trials: u64,
    /// Number of times the circuit has opened.
    pub times_opened: u64,
    /// Number of times the circuit has closed from half-open.
    pub times_closed: u64,
}

impl BreakerMetrics {
    /// Creates new empty metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the failure rate over counted outcomes (0.0 to 1.0).
    pub fn failure_rate(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            return 0.0;
        }
        self.failures as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_state_default() {
        let state = BreakerState::default();
        assert!(state.is_closed());
        assert_eq!(state.consecutive_failures(), 0);
    }

    #[test]
    fn test_breaker_state_names() {
        assert_eq!(BreakerState::closed().name(), "closed");
        assert_eq!(
            BreakerState::Open {
                opened_at: Instant::now(),
                consecutive_failures: 3,
            }
            .name(),
            "open"
        );
        assert_eq!(
            BreakerState::HalfOpen {
                trial_in_flight: false,
                consecutive_failures: 3,
            }
            .name(),
            "half_open"
        );
    }

    #[test]
    fn test_circuit_state_serializes_snake_case() {
        let json = serde_json::to_string(&CircuitState::HalfOpen).unwrap();
        assert_eq!(json, r#""half_open""#);
    }

    #[test]
    fn test_metrics_failure_rate() {
        let mut metrics = BreakerMetrics::new();
        assert_eq!(metrics.failure_rate(), 0.0);

        metrics.successes = 3;
        metrics.failures = 1;
        assert!((metrics.failure_rate() - 0.25).abs() < f64::EPSILON);
    }
}
