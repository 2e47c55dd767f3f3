//! Circuit breaker implementation.

use crate::circuit_breaker::config::CircuitBreakerConfig;
use crate::circuit_breaker::state::{BreakerMetrics, BreakerState, CircuitState, Transition};

use std::time::Duration;
use tokio::time::Instant;

/// How a request was let through the breaker.
///
/// Outcomes are reported back with the same admission. A request admitted
/// during an earlier closed period reports a stale outcome, which neither
/// settles a half-open trial nor counts toward a later closed period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Admitted while closed.
    Normal {
        /// Closed period the request was admitted in.
        epoch: u64,
    },
    /// Admitted as the single half-open trial.
    Trial,
}

impl Admission {
    /// Returns `true` for the half-open trial.
    pub fn is_trial(self) -> bool {
        self == Self::Trial
    }
}

/// Why the breaker refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    /// Remaining cool-down, when the breaker is open.
    pub retry_in: Option<Duration>,
    /// `true` when refused because another trial is already in flight.
    pub trial_in_flight: bool,
}

/// A three-state circuit breaker.
///
/// The breaker is a plain state machine: it performs no locking and reads no
/// clock of its own. The owner serializes access and passes `now` in.
///
/// # States
///
/// - **Closed**: Normal operation. Requests pass through, failures are counted.
/// - **Open**: Resource is failing. Requests are rejected immediately.
/// - **Half-Open**: Exactly one trial request is allowed through to test
///   whether the resource has recovered.
///
/// # Example
///
/// ```rust
/// use leasepool::circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerConfig};
/// use std::time::Duration;
/// use tokio::time::Instant;
///
/// let config = CircuitBreakerConfig::default()
///     .with_failure_threshold(2)
///     .with_reset_timeout(Duration::from_millis(50));
/// let mut breaker = CircuitBreaker::new(config);
/// let now = Instant::now();
///
/// for _ in 0..2 {
///     let admission = breaker.try_acquire(now).unwrap();
///     breaker.on_failure(admission, now);
/// }
/// assert!(breaker.try_acquire(now).is_err());
/// assert_eq!(
///     breaker.try_acquire(now + Duration::from_millis(50)),
///     Ok(Admission::Trial)
/// );
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    /// Current state of the circuit.
    state: BreakerState,
    /// Configuration.
    config: CircuitBreakerConfig,
    /// Metrics.
    metrics: BreakerMetrics,
    /// Bumped on every state change.
    epoch: u64,
}

impl CircuitBreaker {
    /// Creates a new, closed circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: BreakerState::closed(),
            config,
            metrics: BreakerMetrics::new(),
            epoch: 0,
        }
    }

    /// Returns the current state of the circuit breaker.
    pub fn state(&self) -> &BreakerState {
        &self.state
    }

    /// Returns the data-free current state.
    pub fn circuit_state(&self) -> CircuitState {
        self.state.kind()
    }

    /// Returns the metrics.
    pub fn metrics(&self) -> &BreakerMetrics {
        &self.metrics
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the number of state changes so far.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns `true` if an outcome reported under `admission` would still
    /// be counted.
    pub fn is_current(&self, admission: Admission) -> bool {
        match (admission, &self.state) {
            (Admission::Normal { epoch }, BreakerState::Closed { .. }) => epoch == self.epoch,
            (
                Admission::Trial,
                BreakerState::HalfOpen {
                    trial_in_flight: true,
                    ..
                },
            ) => true,
            _ => false,
        }
    }

    /// Returns the remaining cool-down at `now`, if the circuit is open.
    pub fn retry_in(&self, now: Instant) -> Option<Duration> {
        match &self.state {
            BreakerState::Open { opened_at, .. } => Some(
                self.config
                    .reset_timeout
                    .saturating_sub(now.saturating_duration_since(*opened_at)),
            ),
            _ => None,
        }
    }

    /// Checks if a request should be allowed through.
    ///
    /// An open circuit whose cool-down has elapsed moves to half-open and
    /// admits the caller as the trial.
    pub fn try_acquire(&mut self, now: Instant) -> Result<Admission, Rejection> {
        match self.state {
            BreakerState::Closed { .. } => Ok(Admission::Normal { epoch: self.epoch }),

            BreakerState::Open {
                opened_at,
                consecutive_failures,
            } => {
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= self.config.reset_timeout {
                    self.state = BreakerState::HalfOpen {
                        trial_in_flight: true,
                        consecutive_failures,
                    };
                    self.epoch += 1;
                    self.metrics.trials += 1;
                    Ok(Admission::Trial)
                } else {
                    self.metrics.rejected += 1;
                    Err(Rejection {
                        retry_in: Some(self.config.reset_timeout - elapsed),
                        trial_in_flight: false,
                    })
                }
            }

            BreakerState::HalfOpen {
                trial_in_flight: false,
                consecutive_failures,
            } => {
                self.state = BreakerState::HalfOpen {
                    trial_in_flight: true,
                    consecutive_failures,
                };
                self.metrics.trials += 1;
                Ok(Admission::Trial)
            }

            BreakerState::HalfOpen {
                trial_in_flight: true,
                ..
            } => {
                self.metrics.rejected += 1;
                Err(Rejection {
                    retry_in: None,
                    trial_in_flight: true,
                })
            }
        }
    }

    /// Records a successful outcome.
    pub fn on_success(&mut self, admission: Admission) -> Option<Transition> {
        if !self.is_current(admission) {
            return None;
        }
        let before = self.state.kind();
        if admission.is_trial() {
            self.metrics.times_closed += 1;
        }
        self.state = BreakerState::closed();
        self.metrics.successes += 1;
        self.transition_from(before)
    }

    /// Records a failed outcome.
    pub fn on_failure(&mut self, admission: Admission, now: Instant) -> Option<Transition> {
        // Stale: admitted in an earlier closed period, or the trial was superseded
        if !self.is_current(admission) {
            return None;
        }
        let before = self.state.kind();
        let count = self.state.consecutive_failures().saturating_add(1);
        self.metrics.failures += 1;
        // Any trial failure reopens the circuit
        if admission.is_trial() || count >= self.config.failure_threshold {
            self.state = BreakerState::Open {
                opened_at: now,
                consecutive_failures: count,
            };
            self.metrics.times_opened += 1;
        } else {
            self.state = BreakerState::Closed {
                consecutive_failures: count,
            };
        }
        self.transition_from(before)
    }

    /// Gives back a trial slot whose request ended without a verdict
    /// (cancelled, or failed with a non-countable error).
    pub fn abandon_trial(&mut self, admission: Admission) {
        if !admission.is_trial() {
            return;
        }
        if let BreakerState::HalfOpen {
            trial_in_flight: true,
            consecutive_failures,
        } = self.state
        {
            self.state = BreakerState::HalfOpen {
                trial_in_flight: false,
                consecutive_failures,
            };
        }
    }

    /// Forces the circuit into the open state.
    pub fn force_open(&mut self, now: Instant) -> Option<Transition> {
        let before = self.state.kind();
        self.state = BreakerState::Open {
            opened_at: now,
            consecutive_failures: self.state.consecutive_failures(),
        };
        self.metrics.times_opened += 1;
        self.transition_from(before)
    }

    /// Forces the circuit into the closed state.
    pub fn force_close(&mut self) -> Option<Transition> {
        let before = self.state.kind();
        self.state = BreakerState::closed();
        if before != CircuitState::Closed {
            self.metrics.times_closed += 1;
        }
        self.transition_from(before)
    }

    fn transition_from(&mut self, before: CircuitState) -> Option<Transition> {
        let after = self.state.kind();
        if before == after {
            return None;
        }
        self.epoch += 1;
        Some(Transition {
            from: before,
            to: after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_reset_timeout(Duration::from_millis(reset_ms)),
        )
    }

    fn normal(breaker: &CircuitBreaker) -> Admission {
        Admission::Normal {
            epoch: breaker.epoch(),
        }
    }

    #[test]
    fn test_circuit_opens_on_exact_threshold() {
        let mut breaker = breaker(3, 50);
        let now = Instant::now();

        assert_eq!(breaker.on_failure(normal(&breaker), now), None);
        assert_eq!(breaker.on_failure(normal(&breaker), now), None);
        assert!(breaker.state().is_closed());
        assert_eq!(breaker.state().consecutive_failures(), 2);

        let transition = breaker.on_failure(normal(&breaker), now);
        assert_eq!(
            transition,
            Some(Transition {
                from: CircuitState::Closed,
                to: CircuitState::Open
            })
        );
        assert_eq!(breaker.metrics().times_opened, 1);
    }

    #[test]
    fn test_success_resets_counter() {
        let mut breaker = breaker(3, 50);
        let now = Instant::now();

        breaker.on_failure(normal(&breaker), now);
        breaker.on_failure(normal(&breaker), now);
        breaker.on_success(normal(&breaker));
        assert_eq!(breaker.state().consecutive_failures(), 0);

        breaker.on_failure(normal(&breaker), now);
        breaker.on_failure(normal(&breaker), now);
        assert!(breaker.state().is_closed());
    }

    #[test]
    fn test_circuit_rejects_when_open() {
        let mut breaker = breaker(1, 50);
        let now = Instant::now();
        breaker.on_failure(normal(&breaker), now);

        let rejection = breaker
            .try_acquire(now + Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(rejection.retry_in, Some(Duration::from_millis(30)));
        assert!(!rejection.trial_in_flight);
        assert_eq!(breaker.metrics().rejected, 1);
    }

    #[test]
    fn test_failure_count_frozen_while_open() {
        let mut breaker = breaker(2, 50);
        let now = Instant::now();
        breaker.on_failure(normal(&breaker), now);
        breaker.on_failure(normal(&breaker), now);

        breaker.on_failure(normal(&breaker), now);
        breaker.on_success(normal(&breaker));
        assert!(breaker.state().is_open());
        assert_eq!(breaker.state().consecutive_failures(), 2);
    }

    #[test]
    fn test_single_trial_after_reset_timeout() {
        let mut breaker = breaker(1, 50);
        let now = Instant::now();
        breaker.on_failure(normal(&breaker), now);

        let later = now + Duration::from_millis(50);
        assert_eq!(breaker.try_acquire(later), Ok(Admission::Trial));
        assert!(breaker.state().is_half_open());

        let second = breaker.try_acquire(later).unwrap_err();
        assert!(second.trial_in_flight);
        assert_eq!(second.retry_in, None);
    }

    #[test]
    fn test_trial_success_closes() {
        let mut breaker = breaker(1, 50);
        let now = Instant::now();
        breaker.on_failure(normal(&breaker), now);
        breaker
            .try_acquire(now + Duration::from_millis(60))
            .unwrap();

        let transition = breaker.on_success(Admission::Trial);
        assert_eq!(
            transition,
            Some(Transition {
                from: CircuitState::HalfOpen,
                to: CircuitState::Closed
            })
        );
        assert_eq!(breaker.state().consecutive_failures(), 0);
        assert_eq!(breaker.metrics().times_closed, 1);
    }

    #[test]
    fn test_trial_failure_restarts_cooldown() {
        let mut breaker = breaker(1, 50);
        let now = Instant::now();
        breaker.on_failure(normal(&breaker), now);

        let trial_at = now + Duration::from_millis(60);
        breaker.try_acquire(trial_at).unwrap();
        breaker.on_failure(Admission::Trial, trial_at);
        assert!(breaker.state().is_open());

        // Cool-down counts from the trial failure, not the first opening.
        assert!(breaker
            .try_acquire(trial_at + Duration::from_millis(49))
            .is_err());
        assert_eq!(
            breaker.try_acquire(trial_at + Duration::from_millis(50)),
            Ok(Admission::Trial)
        );
    }

    #[test]
    fn test_stale_normal_outcome_does_not_settle_trial() {
        let mut breaker = breaker(1, 50);
        let now = Instant::now();
        let slow = breaker.try_acquire(now).unwrap();
        let tripping = breaker.try_acquire(now).unwrap();
        breaker.on_failure(tripping, now);
        breaker
            .try_acquire(now + Duration::from_millis(50))
            .unwrap();

        assert!(!breaker.is_current(slow));
        assert_eq!(breaker.on_success(slow), None);
        assert!(breaker.state().is_half_open());
        assert_eq!(
            breaker.on_failure(slow, now + Duration::from_millis(51)),
            None
        );
        assert!(breaker.state().is_half_open());
    }

    #[test]
    fn test_outcome_from_earlier_closed_period_ignored() {
        let mut breaker = breaker(2, 50);
        let now = Instant::now();
        let early = breaker.try_acquire(now).unwrap();
        for _ in 0..2 {
            let admission = breaker.try_acquire(now).unwrap();
            breaker.on_failure(admission, now);
        }
        assert!(breaker.state().is_open());

        let later = now + Duration::from_millis(50);
        let trial = breaker.try_acquire(later).unwrap();
        breaker.on_success(trial);
        assert!(breaker.state().is_closed());

        // Admitted before the trip, failing only after recovery.
        assert_eq!(breaker.on_failure(early, later), None);
        assert_eq!(breaker.state().consecutive_failures(), 0);

        let fresh = breaker.try_acquire(later).unwrap();
        assert!(breaker.is_current(fresh));
        breaker.on_failure(fresh, later);
        assert_eq!(breaker.state().consecutive_failures(), 1);
    }

    #[test]
    fn test_trial_superseded_by_force_close() {
        let mut breaker = breaker(1, 50);
        let now = Instant::now();
        breaker.force_open(now);
        let trial = breaker
            .try_acquire(now + Duration::from_millis(50))
            .unwrap();
        assert!(trial.is_trial());

        breaker.force_close();
        assert!(!breaker.is_current(trial));
        assert_eq!(breaker.on_failure(trial, now), None);
        assert!(breaker.state().is_closed());
    }

    #[test]
    fn test_abandoned_trial_frees_slot() {
        let mut breaker = breaker(1, 50);
        let now = Instant::now();
        breaker.on_failure(normal(&breaker), now);
        let later = now + Duration::from_millis(50);
        breaker.try_acquire(later).unwrap();

        breaker.abandon_trial(Admission::Trial);
        assert!(breaker.state().is_half_open());
        assert_eq!(breaker.try_acquire(later), Ok(Admission::Trial));
    }

    #[test]
    fn test_force_open_close() {
        let mut breaker = breaker(5, 50);
        assert!(breaker.state().is_closed());

        breaker.force_open(Instant::now());
        assert!(breaker.state().is_open());

        breaker.force_close();
        assert!(breaker.state().is_closed());
        assert_eq!(breaker.force_close(), None);
    }
}
