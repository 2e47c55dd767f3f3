//! FIFO queue of callers waiting for a slot.

use crate::core::Lease;

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Identifier of a queued waiter, unique within one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterId(u64);

/// A caller waiting for a slot.
///
/// Slots are handed off directly: whoever frees a slot grants the lease to
/// the head waiter and sends it through `grant`.
#[derive(Debug)]
pub struct Waiter {
    /// Queue-local identifier.
    pub id: WaiterId,
    /// Label of the waiting call.
    pub label: String,
    /// When the waiter joined the queue.
    pub enqueued_at: Instant,
    /// Channel the lease is delivered on.
    pub grant: oneshot::Sender<Lease>,
}

/// Strict FIFO queue of waiters.
#[derive(Debug, Default)]
pub struct WaitQueue {
    entries: VecDeque<Waiter>,
    next_id: u64,
    /// Waiters that have ever joined.
    total_enqueued: u64,
}

impl WaitQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a waiter and returns its id with the receiving half of its grant channel.
    pub fn push(&mut self, label: &str, now: Instant) -> (WaiterId, oneshot::Receiver<Lease>) {
        let (tx, rx) = oneshot::channel();
        let id = WaiterId(self.next_id);
        self.next_id += 1;
        self.total_enqueued += 1;
        self.entries.push_back(Waiter {
            id,
            label: label.to_string(),
            enqueued_at: now,
            grant: tx,
        });
        (id, rx)
    }

    /// Removes and returns the head waiter.
    pub fn pop_front(&mut self) -> Option<Waiter> {
        self.entries.pop_front()
    }

    /// Removes a waiter wherever it sits. Returns `false` if it already left.
    pub fn remove(&mut self, id: WaiterId) -> bool {
        match self.entries.iter().position(|w| w.id == id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Returns the number of waiters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nobody is waiting.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns how long the head waiter has been queued.
    pub fn oldest_wait(&self, now: Instant) -> Option<Duration> {
        self.entries
            .front()
            .map(|w| now.saturating_duration_since(w.enqueued_at))
    }

    /// Waiters that have ever joined.
    pub fn total_enqueued(&self) -> u64 {
        self.total_enqueued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = WaitQueue::new();
        let now = Instant::now();
        let (a, _rx_a) = queue.push("a", now);
        let (b, _rx_b) = queue.push("b", now);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_front().map(|w| w.id), Some(a));
        assert_eq!(queue.pop_front().map(|w| w.id), Some(b));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_from_middle() {
        let mut queue = WaitQueue::new();
        let now = Instant::now();
        let (a, _rx_a) = queue.push("a", now);
        let (b, _rx_b) = queue.push("b", now);
        let (c, _rx_c) = queue.push("c", now);

        assert!(queue.remove(b));
        assert!(!queue.remove(b));
        assert_eq!(queue.pop_front().map(|w| w.id), Some(a));
        assert_eq!(queue.pop_front().map(|w| w.id), Some(c));
        assert_eq!(queue.total_enqueued(), 3);
    }

    #[test]
    fn test_oldest_wait() {
        let mut queue = WaitQueue::new();
        let start = Instant::now();
        assert_eq!(queue.oldest_wait(start), None);

        let _rx = queue.push("a", start);
        let _rx2 = queue.push("b", start + Duration::from_millis(5));
        assert_eq!(
            queue.oldest_wait(start + Duration::from_millis(20)),
            Some(Duration::from_millis(20))
        );
    }

    #[tokio::test]
    async fn test_grant_delivered_through_channel() {
        let mut queue = WaitQueue::new();
        let now = Instant::now();
        let (_, rx) = queue.push("a", now);

        let waiter = queue.pop_front().unwrap();
        let lease = Lease::new(waiter.label.clone(), now, Duration::ZERO);
        let id = lease.id;
        waiter.grant.send(lease).unwrap();

        assert_eq!(rx.await.unwrap().id, id);
    }
}
