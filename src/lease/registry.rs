//! Registry of active leases.

use crate::core::{Lease, LeaseId};

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Tracks every lease currently holding a pool slot.
///
/// The registry is the single source of truth for the active count: a slot
/// is occupied exactly while its lease is present here.
#[derive(Debug)]
pub struct LeaseRegistry {
    /// Maximum number of leases held at once.
    max_concurrent: usize,
    /// Currently held leases.
    active: HashMap<LeaseId, Lease>,
    /// Leases granted since creation.
    total_granted: u64,
    /// Leases released by their holder.
    total_released: u64,
    /// Leases reclaimed after their deadline.
    total_revoked: u64,
}

impl LeaseRegistry {
    /// Creates an empty registry with the given capacity.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            active: HashMap::with_capacity(max_concurrent),
            total_granted: 0,
            total_released: 0,
            total_revoked: 0,
        }
    }

    /// Returns the maximum number of concurrent leases.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Returns the number of leases currently held.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Returns true if another lease can be granted.
    pub fn has_capacity(&self) -> bool {
        self.active.len() < self.max_concurrent
    }

    /// Grants a new lease, or returns `None` when every slot is taken.
    pub fn grant(&mut self, label: &str, now: Instant, timeout: Duration) -> Option<Lease> {
        if !self.has_capacity() {
            return None;
        }
        let lease = Lease::new(label, now, timeout);
        self.active.insert(lease.id, lease.clone());
        self.total_granted += 1;
        Some(lease)
    }

    /// Releases a lease. Releasing an unknown or already released lease is a no-op.
    pub fn release(&mut self, id: LeaseId) -> Option<Lease> {
        let lease = self.active.remove(&id)?;
        self.total_released += 1;
        Some(lease)
    }

    /// Reclaims a lease whose holder overran its deadline.
    pub fn revoke(&mut self, id: LeaseId) -> Option<Lease> {
        let lease = self.active.remove(&id)?;
        self.total_revoked += 1;
        Some(lease)
    }

    /// Leases granted since creation.
    pub fn total_granted(&self) -> u64 {
        self.total_granted
    }

    /// Leases released by their holder since creation.
    pub fn total_released(&self) -> u64 {
        self.total_released
    }

    /// Leases revoked since creation.
    pub fn total_revoked(&self) -> u64 {
        self.total_revoked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_up_to_capacity() {
        let mut registry = LeaseRegistry::new(2);
        let now = Instant::now();

        assert!(registry.grant("a", now, Duration::ZERO).is_some());
        assert!(registry.grant("b", now, Duration::ZERO).is_some());
        assert!(registry.grant("c", now, Duration::ZERO).is_none());
        assert_eq!(registry.active_count(), 2);
        assert!(!registry.has_capacity());
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut registry = LeaseRegistry::new(1);
        let lease = registry
            .grant("a", Instant::now(), Duration::ZERO)
            .unwrap();

        assert!(registry.release(lease.id).is_some());
        assert!(registry.release(lease.id).is_none());
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.total_released(), 1);
    }

    #[test]
    fn test_revoke_frees_slot() {
        let mut registry = LeaseRegistry::new(1);
        let now = Instant::now();
        let lease = registry
            .grant("slow", now, Duration::from_millis(10))
            .unwrap();

        assert!(!registry.has_capacity());
        assert!(registry.revoke(lease.id).is_some());
        assert!(registry.has_capacity());
        assert!(registry.release(lease.id).is_none());
        assert_eq!(registry.total_granted(), 1);
        assert_eq!(registry.total_revoked(), 1);
        assert_eq!(registry.total_released(), 0);
    }
}
