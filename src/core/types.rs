//! Core types used throughout the leasepool library.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Opaque, unique identifier of a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseId(Uuid);

impl LeaseId {
    /// Creates a fresh random lease id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An exclusive, time-bounded grant of one pool slot to one in-flight operation.
#[derive(Debug, Clone)]
pub struct Lease {
    /// Unique identifier.
    pub id: LeaseId,
    /// Label of the call holding the lease.
    pub label: String,
    /// When the slot was granted.
    pub granted_at: Instant,
    /// When the lease will be reclaimed, if it is bounded.
    pub deadline: Option<Instant>,
}

impl Lease {
    /// Creates a lease granted at `now`. A zero `timeout` means unbounded.
    pub fn new(label: impl Into<String>, now: Instant, timeout: Duration) -> Self {
        Self {
            id: LeaseId::new(),
            label: label.into(),
            granted_at: now,
            deadline: (!timeout.is_zero()).then(|| now + timeout),
        }
    }

    /// Returns how long the lease has been held at `now`.
    pub fn held_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.granted_at)
    }

    /// Returns `true` if the lease has a deadline and `now` is at or past it.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}

/// Per-call options for [`ResourcePool::execute_with`](crate::ResourcePool::execute_with).
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Cancels the call when fired, wherever it is suspended.
    pub cancel: Option<CancellationToken>,
    /// Upper bound on the time spent waiting in the queue for a slot.
    pub queue_timeout: Option<Duration>,
}

impl ExecuteOptions {
    /// Creates options with no cancellation and no queue-wait bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cancellation token.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Sets the queue-wait bound.
    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_ids_are_unique() {
        assert_ne!(LeaseId::new(), LeaseId::new());
    }

    #[test]
    fn test_bounded_lease_deadline() {
        let now = Instant::now();
        let lease = Lease::new("query", now, Duration::from_millis(100));

        assert_eq!(lease.deadline, Some(now + Duration::from_millis(100)));
        assert!(!lease.is_expired(now + Duration::from_millis(99)));
        assert!(lease.is_expired(now + Duration::from_millis(100)));
        assert_eq!(
            lease.held_for(now + Duration::from_millis(40)),
            Duration::from_millis(40)
        );
    }

    #[test]
    fn test_zero_timeout_is_unbounded() {
        let now = Instant::now();
        let lease = Lease::new("query", now, Duration::ZERO);

        assert!(lease.deadline.is_none());
        assert!(!lease.is_expired(now + Duration::from_secs(3600)));
    }

    #[test]
    fn test_execute_options_builder() {
        let token = CancellationToken::new();
        let options = ExecuteOptions::new()
            .with_cancel(token.clone())
            .with_queue_timeout(Duration::from_secs(1));

        assert!(options.cancel.is_some());
        assert_eq!(options.queue_timeout, Some(Duration::from_secs(1)));
    }
}
