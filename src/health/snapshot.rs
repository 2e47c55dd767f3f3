//! Running counters and point-in-time health snapshots.

use crate::circuit_breaker::CircuitState;
use crate::core::duration_ms;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smoothing factor of the latency moving average.
const LATENCY_ALPHA: f64 = 0.2;

/// Counters aggregated by the pool. Lives inside the pool lock.
#[derive(Debug, Clone, Default)]
pub(crate) struct PoolStats {
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub failed_attempts: u64,
    pub timed_out_attempts: u64,
    pub rejected_calls: u64,
    pub cancelled_calls: u64,
    /// Calls that ended with a forced shutdown cancellation.
    pub shutdown_cancelled: u64,
    pub average_latency: Option<Duration>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub probes_run: u64,
    pub probe_failures: u64,
    /// Heartbeat ticks that found no free slot.
    pub probes_skipped: u64,
    pub last_probe_at: Option<DateTime<Utc>>,
}

impl PoolStats {
    /// Folds a sample into the exponentially weighted latency average.
    pub fn record_latency(&mut self, sample: Duration) {
        self.average_latency = Some(match self.average_latency {
            None => sample,
            Some(avg) => {
                let avg = avg.as_secs_f64();
                Duration::from_secs_f64(avg + LATENCY_ALPHA * (sample.as_secs_f64() - avg))
            }
        });
    }

    /// Records a terminal failure.
    pub fn record_failure(&mut self, error: String) {
        self.failed_attempts += 1;
        self.last_error = Some(error);
        self.last_error_at = Some(Utc::now());
    }
}

/// A point-in-time copy of pool health.
///
/// Snapshots are taken under the pool lock, so every field reflects the same
/// instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Pool name.
    pub pool: String,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
    /// Whether the pool still accepts new calls.
    pub accepting: bool,

    /// Configured slot count.
    pub max_concurrent: usize,
    /// Leases currently held.
    pub active_leases: usize,
    /// Calls waiting for a slot.
    pub queue_length: usize,
    /// Calls that have ever had to queue.
    pub queued_calls: u64,
    /// How long the head of the queue has waited.
    #[serde(rename = "oldest_queue_wait_ms", with = "duration_ms::option")]
    pub oldest_queue_wait: Option<Duration>,

    /// Operation invocations, one per attempt.
    pub total_attempts: u64,
    /// Calls that ended in success.
    pub successful_attempts: u64,
    /// Calls that ended in failure.
    pub failed_attempts: u64,
    /// Lease and queue-wait timeouts.
    pub timed_out_attempts: u64,
    /// Calls fast-failed by the circuit breaker.
    pub rejected_calls: u64,
    /// Calls withdrawn by their caller or by shutdown.
    pub cancelled_calls: u64,
    /// Leases granted since the pool was built.
    pub granted_leases: u64,
    /// Leases returned by their holder.
    pub released_leases: u64,
    /// Leases reclaimed after their deadline.
    pub revoked_leases: u64,
    /// Moving average of final-attempt run time.
    #[serde(rename = "average_latency_ms", with = "duration_ms::option")]
    pub average_latency: Option<Duration>,

    /// Circuit breaker state.
    pub circuit_state: CircuitState,
    /// Consecutive failures counted by the breaker.
    pub consecutive_failures: u32,
    /// Times the breaker has opened.
    pub circuit_times_opened: u64,

    /// Rendered error of the most recent terminal failure.
    pub last_error: Option<String>,
    /// When the most recent terminal failure happened.
    pub last_error_at: Option<DateTime<Utc>>,

    /// Heartbeat probes run.
    pub probes_run: u64,
    /// Heartbeat probes that failed.
    pub probe_failures: u64,
    /// Heartbeat ticks skipped because every slot was busy.
    pub probes_skipped: u64,
    /// When the last heartbeat probe finished.
    pub last_probe_at: Option<DateTime<Utc>>,
}

impl HealthSnapshot {
    /// Fraction of finished calls that succeeded, or `None` before any finished.
    pub fn success_rate(&self) -> Option<f64> {
        let finished = self.successful_attempts + self.failed_attempts;
        (finished > 0).then(|| self.successful_attempts as f64 / finished as f64)
    }

    /// Returns true while the pool accepts work and its circuit is closed.
    pub fn is_healthy(&self) -> bool {
        self.accepting && self.circuit_state == CircuitState::Closed
    }

    /// Returns the number of free slots.
    pub fn available_slots(&self) -> usize {
        self.max_concurrent.saturating_sub(self.active_leases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> HealthSnapshot {
        HealthSnapshot {
            pool: "db".into(),
            taken_at: Utc::now(),
            accepting: true,
            max_concurrent: 4,
            active_leases: 1,
            queue_length: 0,
            queued_calls: 2,
            oldest_queue_wait: None,
            total_attempts: 5,
            successful_attempts: 3,
            failed_attempts: 1,
            timed_out_attempts: 0,
            rejected_calls: 0,
            cancelled_calls: 0,
            granted_leases: 4,
            released_leases: 3,
            revoked_leases: 0,
            average_latency: Some(Duration::from_millis(12)),
            circuit_state: CircuitState::Closed,
            consecutive_failures: 0,
            circuit_times_opened: 0,
            last_error: None,
            last_error_at: None,
            probes_run: 0,
            probe_failures: 0,
            probes_skipped: 0,
            last_probe_at: None,
        }
    }

    #[test]
    fn test_latency_average_seeded_then_smoothed() {
        let mut stats = PoolStats::default();
        stats.record_latency(Duration::from_millis(100));
        assert_eq!(stats.average_latency, Some(Duration::from_millis(100)));

        stats.record_latency(Duration::from_millis(200));
        let avg = stats.average_latency.unwrap().as_secs_f64();
        assert!((avg - 0.120).abs() < 1e-9);
    }

    #[test]
    fn test_record_failure_sets_last_error() {
        let mut stats = PoolStats::default();
        stats.record_failure("connection reset".into());
        assert_eq!(stats.failed_attempts, 1);
        assert_eq!(stats.last_error.as_deref(), Some("connection reset"));
        assert!(stats.last_error_at.is_some());
    }

    #[test]
    fn test_snapshot_helpers() {
        let snap = snapshot();
        assert_eq!(snap.success_rate(), Some(0.75));
        assert!(snap.is_healthy());
        assert_eq!(snap.available_slots(), 3);

        let open = HealthSnapshot {
            circuit_state: CircuitState::Open,
            ..snapshot()
        };
        assert!(!open.is_healthy());
    }

    #[test]
    fn test_snapshot_serializes_millis() {
        let value = serde_json::to_value(snapshot()).unwrap();
        assert_eq!(value["average_latency_ms"], 12);
        assert_eq!(value["circuit_state"], "closed");
        assert!(value["oldest_queue_wait_ms"].is_null());
    }
}
