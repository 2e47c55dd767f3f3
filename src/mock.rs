//! Mock resource for testing.
//!
//! This module provides a scripted stand-in for a protected resource, so
//! pools can be exercised without a real backend. Each call consumes the
//! next scripted outcome; once the script runs out the default outcome is
//! used.

use crate::health::Probe;
use crate::retry::{Classify, FailureKind};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// What a single mock call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    /// Return `Ok` with the call number.
    Succeed,
    /// Return a [`MockError`] of the given kind.
    Fail(FailureKind),
    /// Never complete.
    Hang,
}

/// Error returned by a failing mock call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("mock resource '{resource}' failed with {kind} on call {call}")]
pub struct MockError {
    /// Name of the mock.
    pub resource: String,
    /// Scripted failure kind.
    pub kind: FailureKind,
    /// 1-based call number.
    pub call: u64,
}

impl Classify for MockError {
    fn failure_kind(&self) -> FailureKind {
        self.kind
    }
}

/// A scripted mock resource.
///
/// # Examples
///
/// ```rust
/// use leasepool::mock::{MockOutcome, MockResource};
/// use leasepool::FailureKind;
/// use std::time::Duration;
///
/// // Fails twice with a connectivity error, then succeeds forever.
/// let resource = MockResource::new()
///     .with_script([
///         MockOutcome::Fail(FailureKind::Connectivity),
///         MockOutcome::Fail(FailureKind::Connectivity),
///     ])
///     .with_latency(Duration::from_millis(5));
/// ```
#[derive(Debug)]
pub struct MockResource {
    /// Name of this mock instance.
    name: String,
    /// Outcomes consumed one per call.
    script: Mutex<VecDeque<MockOutcome>>,
    /// Outcome once the script is exhausted.
    default_outcome: MockOutcome,
    /// Simulated latency per call.
    latency: Option<Duration>,
    /// Calls started.
    call_count: AtomicU64,
    /// Calls currently running.
    in_flight: AtomicUsize,
    /// Highest `in_flight` ever observed.
    peak_in_flight: AtomicUsize,
}

impl MockResource {
    /// Creates a mock that always succeeds.
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            script: Mutex::new(VecDeque::new()),
            default_outcome: MockOutcome::Succeed,
            latency: None,
            call_count: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Creates a mock that always fails with `kind`.
    pub fn new_failing(kind: FailureKind) -> Self {
        Self {
            default_outcome: MockOutcome::Fail(kind),
            ..Self::new()
        }
    }

    /// Sets the name of this mock.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the scripted outcomes, replacing any existing script.
    pub fn with_script(self, outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
        *self.lock_script() = outcomes.into_iter().collect();
        self
    }

    /// Sets the outcome used once the script is exhausted.
    pub fn with_default_outcome(mut self, outcome: MockOutcome) -> Self {
        self.default_outcome = outcome;
        self
    }

    /// Sets the simulated latency per call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Appends an outcome to the script.
    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.lock_script().push_back(outcome);
    }

    /// Returns the number of calls started.
    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Returns the number of calls currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Returns the highest number of concurrent calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Performs one call. Returns the 1-based call number on success.
    pub async fn call(&self) -> Result<u64, MockError> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self.lock_script().pop_front().unwrap_or(self.default_outcome);

        let _running = InFlight::enter(self);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match outcome {
            MockOutcome::Succeed => Ok(call),
            MockOutcome::Fail(kind) => Err(MockError {
                resource: self.name.clone(),
                kind,
                call,
            }),
            MockOutcome::Hang => std::future::pending().await,
        }
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<MockOutcome>> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MockResource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe<MockError> for MockResource {
    async fn probe(&self) -> Result<(), MockError> {
        self.call().await.map(|_| ())
    }
}

/// Tracks a running call, including calls dropped mid-flight.
struct InFlight<'a> {
    resource: &'a MockResource,
}

impl<'a> InFlight<'a> {
    fn enter(resource: &'a MockResource) -> Self {
        let now = resource.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        resource.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { resource }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.resource.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{DefaultClassifier, ErrorClass, ErrorClassifier};

    #[tokio::test]
    async fn test_mock_resource_succeeds_by_default() {
        let resource = MockResource::new();

        assert_eq!(resource.call().await, Ok(1));
        assert_eq!(resource.call().await, Ok(2));
        assert_eq!(resource.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_resource_follows_script() {
        let resource = MockResource::new()
            .with_name("db")
            .with_script([MockOutcome::Fail(FailureKind::Timeout), MockOutcome::Succeed])
            .with_default_outcome(MockOutcome::Fail(FailureKind::Validation));

        let err = resource.call().await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Timeout);
        assert_eq!(err.resource, "db");
        assert_eq!(resource.call().await, Ok(2));
        assert_eq!(
            resource.call().await.unwrap_err().kind,
            FailureKind::Validation
        );
    }

    #[tokio::test]
    async fn test_mock_error_classifies_by_kind() {
        let resource = MockResource::new_failing(FailureKind::Connectivity);
        let err = resource.call().await.unwrap_err();
        assert_eq!(DefaultClassifier.classify(&err), ErrorClass::Retryable);

        let resource = MockResource::new_failing(FailureKind::Permission);
        let err = resource.call().await.unwrap_err();
        assert_eq!(DefaultClassifier.classify(&err), ErrorClass::Fatal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_resource_tracks_in_flight() {
        let resource = MockResource::new().with_latency(Duration::from_millis(10));

        let (a, b) = tokio::join!(resource.call(), resource.call());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(resource.peak_in_flight(), 2);
        assert_eq!(resource.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_call_released_on_drop() {
        let resource = MockResource::new().with_script([MockOutcome::Hang]);

        let result = tokio::time::timeout(Duration::from_millis(50), resource.call()).await;
        assert!(result.is_err());
        assert_eq!(resource.in_flight(), 0);
    }
}
