//! Lifecycle event types and the bus that emits them.

use crate::circuit_breaker::{CircuitState, Transition};
use crate::core::LeaseId;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// What happened in the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum PoolEventKind {
    /// A slot was granted to a call.
    LeaseGranted {
        /// Lease identifier.
        lease_id: LeaseId,
        /// Call label.
        label: String,
        /// Time spent queued before the grant, in milliseconds.
        waited_ms: u64,
    },

    /// A lease was released by its holder.
    LeaseReleased {
        /// Lease identifier.
        lease_id: LeaseId,
        /// Call label.
        label: String,
        /// How long the slot was held, in milliseconds.
        held_ms: u64,
    },

    /// A lease was reclaimed after its deadline.
    LeaseRevoked {
        /// Lease identifier.
        lease_id: LeaseId,
        /// Call label.
        label: String,
        /// How long the slot was held, in milliseconds.
        held_ms: u64,
    },

    /// A call joined the wait queue.
    Queued {
        /// Call label.
        label: String,
        /// Queue length including this call.
        position: usize,
    },

    /// A failed attempt will be retried.
    RetryScheduled {
        /// Call label.
        label: String,
        /// Attempt that just failed, starting at 1.
        attempt: u32,
        /// Backoff before the next attempt, in milliseconds.
        delay_ms: u64,
        /// Rendered error of the failed attempt.
        error: String,
    },

    /// The circuit breaker changed state.
    CircuitTransition {
        /// State before.
        from: CircuitState,
        /// State after.
        to: CircuitState,
        /// Consecutive failure count after the change.
        consecutive_failures: u32,
    },

    /// A heartbeat probe finished.
    Heartbeat {
        /// Whether the probe succeeded.
        success: bool,
        /// Rendered error, if the probe failed.
        error: Option<String>,
    },

    /// Shutdown began; no new calls are accepted.
    ShutdownStarted {
        /// Leases held when shutdown began.
        active: usize,
        /// Calls queued when shutdown began.
        queued: usize,
    },

    /// Shutdown finished.
    ShutdownCompleted {
        /// Whether all work finished within the drain timeout.
        drained: bool,
        /// Calls force-cancelled after the drain timeout.
        cancelled: u64,
    },
}

impl PoolEventKind {
    /// Returns the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::LeaseGranted { .. } => "lease_granted",
            Self::LeaseReleased { .. } => "lease_released",
            Self::LeaseRevoked { .. } => "lease_revoked",
            Self::Queued { .. } => "queued",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::CircuitTransition { .. } => "circuit_transition",
            Self::Heartbeat { .. } => "heartbeat",
            Self::ShutdownStarted { .. } => "shutdown_started",
            Self::ShutdownCompleted { .. } => "shutdown_completed",
        }
    }

    pub(crate) fn transition(transition: Transition, consecutive_failures: u32) -> Self {
        Self::CircuitTransition {
            from: transition.from,
            to: transition.to,
            consecutive_failures,
        }
    }
}

/// A timestamped lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEvent {
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,

    /// Name of the emitting pool.
    pub pool: String,

    /// Event payload.
    #[serde(flatten)]
    pub kind: PoolEventKind,
}

impl PoolEvent {
    /// Returns the event type name.
    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    /// Renders the event as a single JSON object.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Fan-out of lifecycle events to subscribers and to `tracing`.
///
/// Sending never blocks. Receivers that fall behind by more than the
/// channel capacity observe `RecvError::Lagged` and miss the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    pool: Arc<str>,
    sender: broadcast::Sender<PoolEvent>,
}

impl EventBus {
    /// Creates a bus for the named pool.
    pub fn new(pool: &str, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            pool: Arc::from(pool),
            sender,
        }
    }

    /// Returns a new receiver for events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }

    /// Logs the event and broadcasts it to current subscribers.
    pub fn emit(&self, kind: PoolEventKind) {
        log_event(&self.pool, &kind);
        let event = PoolEvent {
            timestamp: Utc::now(),
            pool: self.pool.to_string(),
            kind,
        };
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }
}

fn log_event(pool: &str, kind: &PoolEventKind) {
    match kind {
        PoolEventKind::LeaseGranted {
            lease_id,
            label,
            waited_ms,
        } => tracing::debug!(
            target: "leasepool::events",
            pool = %pool,
            lease_id = %lease_id,
            label = %label,
            waited_ms,
            "Lease granted"
        ),
        PoolEventKind::LeaseReleased {
            lease_id,
            label,
            held_ms,
        } => tracing::debug!(
            target: "leasepool::events",
            pool = %pool,
            lease_id = %lease_id,
            label = %label,
            held_ms,
            "Lease released"
        ),
        PoolEventKind::LeaseRevoked {
            lease_id,
            label,
            held_ms,
        } => tracing::warn!(
            target: "leasepool::events",
            pool = %pool,
            lease_id = %lease_id,
            label = %label,
            held_ms,
            "Lease revoked after deadline"
        ),
        PoolEventKind::Queued { label, position } => tracing::debug!(
            target: "leasepool::events",
            pool = %pool,
            label = %label,
            position,
            "Call queued"
        ),
        PoolEventKind::RetryScheduled {
            label,
            attempt,
            delay_ms,
            error,
        } => tracing::debug!(
            target: "leasepool::events",
            pool = %pool,
            label = %label,
            attempt,
            delay_ms,
            error = %error,
            "Retry scheduled"
        ),
        PoolEventKind::CircuitTransition {
            from,
            to,
            consecutive_failures,
        } => match to {
            CircuitState::Open => tracing::warn!(
                target: "leasepool::events",
                pool = %pool,
                from = %from,
                to = %to,
                consecutive_failures,
                "Circuit opened"
            ),
            CircuitState::Closed => tracing::info!(
                target: "leasepool::events",
                pool = %pool,
                from = %from,
                to = %to,
                "Circuit closed"
            ),
            CircuitState::HalfOpen => tracing::info!(
                target: "leasepool::events",
                pool = %pool,
                from = %from,
                to = %to,
                "Circuit half-open, admitting trial"
            ),
        },
        PoolEventKind::Heartbeat { success, error } => {
            if *success {
                tracing::debug!(target: "leasepool::events", pool = %pool, "Heartbeat ok");
            } else {
                tracing::warn!(
                    target: "leasepool::events",
                    pool = %pool,
                    error = ?error,
                    "Heartbeat failed"
                );
            }
        }
        PoolEventKind::ShutdownStarted { active, queued } => tracing::info!(
            target: "leasepool::events",
            pool = %pool,
            active,
            queued,
            "Shutdown started"
        ),
        PoolEventKind::ShutdownCompleted { drained, cancelled } => tracing::info!(
            target: "leasepool::events",
            pool = %pool,
            drained,
            cancelled,
            "Shutdown completed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_is_flat() {
        let event = PoolEvent {
            timestamp: Utc::now(),
            pool: "db".to_string(),
            kind: PoolEventKind::Queued {
                label: "query".to_string(),
                position: 3,
            },
        };

        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["event_type"], "queued");
        assert_eq!(value["pool"], "db");
        assert_eq!(value["position"], 3);
    }

    #[test]
    fn test_transition_event_type() {
        let kind = PoolEventKind::transition(
            Transition {
                from: CircuitState::Closed,
                to: CircuitState::Open,
            },
            5,
        );
        assert_eq!(kind.event_type(), "circuit_transition");
    }

    #[tokio::test]
    async fn test_bus_delivers_to_subscribers() {
        let bus = EventBus::new("db", 8);
        let mut rx = bus.subscribe();

        bus.emit(PoolEventKind::ShutdownStarted {
            active: 1,
            queued: 0,
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.pool, "db");
        assert_eq!(event.event_type(), "shutdown_started");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new("db", 1);
        bus.emit(PoolEventKind::Heartbeat {
            success: true,
            error: None,
        });
    }
}
