//! The resource pool implementation.

use crate::circuit_breaker::{Admission, CircuitBreaker, Transition};
use crate::core::{
    CancelReason, ConfigError, ExecuteOptions, Lease, LeaseId, PoolError, PoolResult,
    TimeoutPhase,
};
use crate::events::{EventBus, PoolEvent, PoolEventKind};
use crate::health::{monitor, HealthSnapshot, NoopProbe, PoolStats, Probe};
use crate::lease::{LeaseRegistry, WaitQueue, WaiterId};
use crate::pool::config::ResourcePoolConfig;
use crate::retry::{AlwaysRetry, ErrorClass, ErrorClassifier};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot, Notify, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for force-cancelled calls to unwind.
const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Outcome of [`ResourcePool::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Whether every call finished within the drain timeout.
    pub drained: bool,
    /// Calls force-cancelled after the drain timeout.
    pub cancelled: u64,
}

/// Mutable pool state. Guarded by one mutex, never held across an await.
struct PoolState {
    registry: LeaseRegistry,
    queue: WaitQueue,
    breaker: CircuitBreaker,
    stats: PoolStats,
    accepting: bool,
    /// Admitted calls that have not returned yet.
    calls_in_flight: usize,
}

pub(crate) struct PoolInner<E> {
    config: ResourcePoolConfig,
    classifier: Arc<dyn ErrorClassifier<E>>,
    probe: Arc<dyn Probe<E>>,
    state: Mutex<PoolState>,
    events: EventBus,
    /// Signalled when `calls_in_flight` drops to zero.
    idle: Notify,
    monitor_stop: CancellationToken,
    force_cancel: CancellationToken,
    monitor: Mutex<Option<JoinHandle<()>>>,
    shutdown_report: OnceCell<ShutdownReport>,
    warned_unbounded: AtomicBool,
}

impl<E> Drop for PoolInner<E> {
    fn drop(&mut self) {
        self.monitor_stop.cancel();
    }
}

/// Builder for creating a [`ResourcePool`].
pub struct ResourcePoolBuilder<E> {
    config: ResourcePoolConfig,
    classifier: Option<Arc<dyn ErrorClassifier<E>>>,
    probe: Option<Arc<dyn Probe<E>>>,
}

impl<E> ResourcePoolBuilder<E>
where
    E: fmt::Display + Send + 'static,
{
    /// Creates a builder for the given configuration.
    pub fn new(config: ResourcePoolConfig) -> Self {
        Self {
            config,
            classifier: None,
            probe: None,
        }
    }

    /// Sets the error classifier. Defaults to [`AlwaysRetry`].
    pub fn classifier<C: ErrorClassifier<E> + 'static>(mut self, classifier: C) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// Sets the heartbeat probe. Defaults to [`NoopProbe`].
    pub fn probe<P: Probe<E> + 'static>(mut self, probe: P) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    /// Validates the configuration and builds the pool.
    ///
    /// A pool with a heartbeat must be built inside a tokio runtime.
    pub fn build(self) -> Result<ResourcePool<E>, ConfigError> {
        self.config.validate()?;

        let runtime = if self.config.heartbeat_interval.is_zero() {
            None
        } else {
            Some(Handle::try_current().map_err(|_| ConfigError::NoRuntime)?)
        };

        let state = PoolState {
            registry: LeaseRegistry::new(self.config.max_concurrent),
            queue: WaitQueue::new(),
            breaker: CircuitBreaker::new(self.config.circuit.clone()),
            stats: PoolStats::default(),
            accepting: true,
            calls_in_flight: 0,
        };

        let inner = Arc::new(PoolInner {
            events: EventBus::new(&self.config.name, self.config.event_capacity),
            classifier: self.classifier.unwrap_or_else(|| Arc::new(AlwaysRetry)),
            probe: self.probe.unwrap_or_else(|| Arc::new(NoopProbe)),
            state: Mutex::new(state),
            idle: Notify::new(),
            monitor_stop: CancellationToken::new(),
            force_cancel: CancellationToken::new(),
            monitor: Mutex::new(None),
            shutdown_report: OnceCell::new(),
            warned_unbounded: AtomicBool::new(false),
            config: self.config,
        });

        if let Some(runtime) = runtime {
            let task = monitor::spawn(
                &runtime,
                Arc::downgrade(&inner),
                inner.config.heartbeat_interval,
                inner.monitor_stop.clone(),
            );
            *inner
                .monitor
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(task);
        }

        tracing::info!(
            pool = %inner.config.name,
            max_concurrent = inner.config.max_concurrent,
            lease_timeout_ms = inner.config.lease_timeout.as_millis() as u64,
            heartbeat_ms = inner.config.heartbeat_interval.as_millis() as u64,
            "Resource pool created"
        );

        Ok(ResourcePool { inner })
    }
}

/// A bounded-concurrency pool that guards one protected resource.
///
/// The pool runs caller-supplied operations under an exclusive, time-bounded
/// lease on one of `max_concurrent` slots. Excess calls wait in a FIFO queue.
/// Retryable failures are retried with exponential backoff, and sustained
/// failure trips a circuit breaker that fast-fails new calls until a single
/// trial succeeds.
///
/// `ResourcePool` is a cheap handle; clones share the same pool.
///
/// # Example
///
/// ```rust
/// use leasepool::{ResourcePool, ResourcePoolConfig, DefaultClassifier};
/// use std::io;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pool: ResourcePool<io::Error> =
///     ResourcePool::new(ResourcePoolConfig::new("files"), DefaultClassifier).unwrap();
///
/// let value = pool
///     .execute("read", || async { Ok::<_, io::Error>(42) })
///     .await
///     .unwrap();
/// assert_eq!(value, 42);
/// # }
/// ```
pub struct ResourcePool<E> {
    inner: Arc<PoolInner<E>>,
}

impl<E> Clone for ResourcePool<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> fmt::Debug for ResourcePool<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("name", &self.inner.config.name)
            .field("max_concurrent", &self.inner.config.max_concurrent)
            .finish_non_exhaustive()
    }
}

impl<E> ResourcePool<E>
where
    E: fmt::Display + Send + 'static,
{
    /// Creates a pool with the given classifier and the no-op heartbeat probe.
    pub fn new<C>(config: ResourcePoolConfig, classifier: C) -> Result<Self, ConfigError>
    where
        C: ErrorClassifier<E> + 'static,
    {
        ResourcePoolBuilder::new(config).classifier(classifier).build()
    }

    /// Creates a builder.
    pub fn builder(config: ResourcePoolConfig) -> ResourcePoolBuilder<E> {
        ResourcePoolBuilder::new(config)
    }

    pub(crate) fn from_inner(inner: Arc<PoolInner<E>>) -> Self {
        Self { inner }
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &ResourcePoolConfig {
        &self.inner.config
    }

    /// Returns the pool name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Subscribes to lifecycle events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }

    /// Runs `operation` under a lease, with queueing, retries and circuit gating.
    ///
    /// `operation` is invoked once per attempt.
    pub async fn execute<T, F, Fut>(&self, label: &str, operation: F) -> PoolResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(label, ExecuteOptions::default(), operation)
            .await
    }

    /// Like [`execute`](Self::execute), with a cancellation token and a
    /// queue-wait bound.
    ///
    /// Dropping the returned future at any point releases every slot, queue
    /// position and trial it held.
    pub async fn execute_with<T, F, Fut>(
        &self,
        label: &str,
        options: ExecuteOptions,
        operation: F,
    ) -> PoolResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(label, options, Origin::Caller, operation).await
    }

    async fn run<T, F, Fut>(
        &self,
        label: &str,
        options: ExecuteOptions,
        origin: Origin,
        mut operation: F,
    ) -> PoolResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let inner = &*self.inner;
        let Some(_call) = CallGuard::enter(inner) else {
            return Err(PoolError::ShuttingDown {
                label: label.to_string(),
            });
        };
        let caller = options.cancel.as_ref();
        if caller.is_none() && origin == Origin::Caller {
            inner.warn_if_unbounded(label);
        }

        // `attempts` counts operation invocations; `tries` also counts
        // queue-wait timeouts, which spend retry budget too.
        let mut attempts: u32 = 0;
        let mut tries: u32 = 0;
        loop {
            let mut admission = inner.admit(label)?;
            let slot = inner.acquire(label, options.queue_timeout, caller).await?;
            tries += 1;

            let lease = match slot {
                Slot::Granted(lease) => lease,
                Slot::TimedOut(waited) => {
                    let timeout = PoolError::Timeout {
                        label: label.to_string(),
                        phase: TimeoutPhase::QueueWait,
                        elapsed: waited,
                        attempts,
                    };
                    if origin == Origin::Heartbeat {
                        return Err(timeout);
                    }
                    inner.lock().stats.timed_out_attempts += 1;
                    let text = format!("queue wait timed out after {}ms", waited.as_millis());
                    let retries_left =
                        !admission.is_trial() && inner.config.retry.should_retry(tries - 1);
                    if !retries_left {
                        inner.settle_unrun(&mut admission, text);
                        return Err(timeout);
                    }
                    drop(admission);
                    inner.backoff(label, tries, text, caller).await?;
                    continue;
                }
            };
            let mut held = LeaseGuard::new(inner, lease);
            inner.readmit(label, &mut admission)?;

            attempts += 1;
            inner.lock().stats.total_attempts += 1;

            let started = Instant::now();
            let outcome = run_leased(operation(), held.deadline(), caller, &inner.force_cancel).await;
            let ran_for = started.elapsed();
            let retries_left = !admission.is_trial() && inner.config.retry.should_retry(tries - 1);

            // Outcomes settle before the slot is handed on, so the next
            // waiter is gated against the updated breaker.
            let error_text = match outcome {
                Attempt::Done(Ok(value)) => {
                    inner.settle_success(&mut admission, ran_for);
                    held.release();
                    return Ok(value);
                }
                Attempt::Done(Err(err)) => match inner.classifier.classify(&err) {
                    ErrorClass::Fatal => {
                        inner.settle_failure(&mut admission, false, err.to_string(), ran_for);
                        held.release();
                        return Err(PoolError::Fatal {
                            label: label.to_string(),
                            attempts,
                            source: err,
                        });
                    }
                    ErrorClass::Retryable if !retries_left => {
                        inner.settle_failure(&mut admission, true, err.to_string(), ran_for);
                        held.release();
                        return Err(PoolError::RetriesExhausted {
                            label: label.to_string(),
                            attempts,
                            source: err,
                        });
                    }
                    ErrorClass::Retryable => {
                        held.release();
                        err.to_string()
                    }
                },
                Attempt::TimedOut => {
                    let text = format!("lease timed out after {}ms", ran_for.as_millis());
                    if !retries_left {
                        let counts = inner.config.circuit.count_timeouts;
                        inner.settle_failure(&mut admission, counts, text, ran_for);
                        held.revoke();
                        return Err(PoolError::Timeout {
                            label: label.to_string(),
                            phase: TimeoutPhase::Lease,
                            elapsed: ran_for,
                            attempts,
                        });
                    }
                    held.revoke();
                    text
                }
                Attempt::Cancelled(reason) => {
                    held.release();
                    return Err(inner.cancelled(label, reason));
                }
            };

            drop(admission);
            inner.backoff(label, tries, error_text, caller).await?;
        }
    }

    /// Returns a point-in-time snapshot of pool health.
    pub fn health(&self) -> HealthSnapshot {
        let now = Instant::now();
        let st = self.inner.lock();
        HealthSnapshot {
            pool: self.inner.config.name.clone(),
            taken_at: Utc::now(),
            accepting: st.accepting,
            max_concurrent: st.registry.max_concurrent(),
            active_leases: st.registry.active_count(),
            queue_length: st.queue.len(),
            queued_calls: st.queue.total_enqueued(),
            oldest_queue_wait: st.queue.oldest_wait(now),
            total_attempts: st.stats.total_attempts,
            successful_attempts: st.stats.successful_attempts,
            failed_attempts: st.stats.failed_attempts,
            timed_out_attempts: st.stats.timed_out_attempts,
            rejected_calls: st.stats.rejected_calls,
            cancelled_calls: st.stats.cancelled_calls,
            granted_leases: st.registry.total_granted(),
            released_leases: st.registry.total_released(),
            revoked_leases: st.registry.total_revoked(),
            average_latency: st.stats.average_latency,
            circuit_state: st.breaker.circuit_state(),
            consecutive_failures: st.breaker.state().consecutive_failures(),
            circuit_times_opened: st.breaker.metrics().times_opened,
            last_error: st.stats.last_error.clone(),
            last_error_at: st.stats.last_error_at,
            probes_run: st.stats.probes_run,
            probe_failures: st.stats.probe_failures,
            probes_skipped: st.stats.probes_skipped,
            last_probe_at: st.stats.last_probe_at,
        }
    }

    /// Forces the circuit open, fast-failing calls for one reset timeout.
    pub fn force_open_circuit(&self) {
        let mut st = self.inner.lock();
        let transition = st.breaker.force_open(Instant::now());
        self.inner.emit_transition(&st, transition);
    }

    /// Forces the circuit closed and clears its failure count.
    pub fn force_close_circuit(&self) {
        let mut st = self.inner.lock();
        let transition = st.breaker.force_close();
        self.inner.emit_transition(&st, transition);
    }

    /// Stops accepting work, drains, and cancels whatever is left.
    ///
    /// Waits up to `drain_timeout` for in-flight and queued calls to finish,
    /// then cancels the rest with [`CancelReason::Shutdown`]. The heartbeat
    /// stops first. Later calls return the first report immediately.
    pub async fn shutdown(&self, drain_timeout: Duration) -> ShutdownReport {
        *self
            .inner
            .shutdown_report
            .get_or_init(|| self.run_shutdown(drain_timeout))
            .await
    }

    async fn run_shutdown(&self, drain_timeout: Duration) -> ShutdownReport {
        let inner = &*self.inner;
        let (active, queued) = {
            let mut st = inner.lock();
            st.accepting = false;
            (st.registry.active_count(), st.queue.len())
        };
        inner
            .events
            .emit(PoolEventKind::ShutdownStarted { active, queued });

        inner.monitor_stop.cancel();
        let monitor = inner
            .monitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = monitor {
            if let Err(e) = task.await {
                tracing::warn!(pool = %inner.config.name, error = %e, "Health monitor task failed");
            }
        }

        let drained = inner.wait_idle(Instant::now() + drain_timeout).await;
        if !drained {
            tracing::warn!(
                pool = %inner.config.name,
                drain_timeout_ms = drain_timeout.as_millis() as u64,
                "Drain timeout elapsed, cancelling remaining calls"
            );
            inner.force_cancel.cancel();
            inner.wait_idle(Instant::now() + CANCEL_GRACE).await;
        }

        let cancelled = inner.lock().stats.shutdown_cancelled;
        inner
            .events
            .emit(PoolEventKind::ShutdownCompleted { drained, cancelled });
        ShutdownReport { drained, cancelled }
    }

    /// Runs one heartbeat probe through the pool and records its outcome.
    ///
    /// The probe never queues. A tick that finds every slot busy is counted
    /// as skipped, not as a failure.
    pub(crate) async fn heartbeat(&self) {
        let probe = Arc::clone(&self.inner.probe);
        let options = ExecuteOptions::new().with_queue_timeout(Duration::ZERO);
        let result = self
            .run("heartbeat", options, Origin::Heartbeat, || probe.probe())
            .await;

        if let Err(PoolError::Timeout {
            phase: TimeoutPhase::QueueWait,
            ..
        }) = result
        {
            self.inner.lock().stats.probes_skipped += 1;
            tracing::debug!(pool = %self.inner.config.name, "Heartbeat skipped, no free slot");
            return;
        }

        let error = result.err().map(|e| e.to_string());
        {
            let mut st = self.inner.lock();
            st.stats.probes_run += 1;
            if error.is_some() {
                st.stats.probe_failures += 1;
            }
            st.stats.last_probe_at = Some(Utc::now());
        }
        self.inner.events.emit(PoolEventKind::Heartbeat {
            success: error.is_none(),
            error,
        });
    }
}

impl<E> PoolInner<E> {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn warn_if_unbounded(&self, label: &str) {
        if self.config.is_unbounded() && !self.warned_unbounded.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                pool = %self.config.name,
                label = %label,
                "Pool has no lease timeout and the call has no cancellation token; a hung operation will hold its slot forever"
            );
        }
    }

    fn emit_transition(&self, st: &PoolState, transition: Option<Transition>) {
        if let Some(transition) = transition {
            self.events.emit(PoolEventKind::transition(
                transition,
                st.breaker.state().consecutive_failures(),
            ));
        }
    }

    /// Passes the circuit gate.
    fn admit(&self, label: &str) -> Result<AdmissionGuard<'_, E>, PoolError<E>> {
        let admission = self.gate(&mut self.lock(), label)?;
        Ok(AdmissionGuard {
            inner: self,
            admission: Some(admission),
        })
    }

    /// Gates a call again if the breaker moved on while it waited for its
    /// slot. A queued call never runs against an open circuit.
    fn readmit(
        &self,
        label: &str,
        admission: &mut AdmissionGuard<'_, E>,
    ) -> Result<(), PoolError<E>> {
        let Some(current) = admission.admission else {
            return Ok(());
        };
        let mut st = self.lock();
        if st.breaker.is_current(current) {
            return Ok(());
        }
        admission.admission = None;
        admission.admission = Some(self.gate(&mut st, label)?);
        Ok(())
    }

    fn gate(&self, st: &mut PoolState, label: &str) -> Result<Admission, PoolError<E>> {
        let before = st.breaker.circuit_state();
        match st.breaker.try_acquire(Instant::now()) {
            Ok(admission) => {
                let after = st.breaker.circuit_state();
                if before != after {
                    self.emit_transition(
                        st,
                        Some(Transition {
                            from: before,
                            to: after,
                        }),
                    );
                }
                Ok(admission)
            }
            Err(rejection) => {
                st.stats.rejected_calls += 1;
                tracing::debug!(
                    pool = %self.config.name,
                    label = %label,
                    trial_in_flight = rejection.trial_in_flight,
                    "Call rejected by open circuit"
                );
                Err(PoolError::CircuitOpen {
                    label: label.to_string(),
                    retry_in: rejection.retry_in,
                })
            }
        }
    }

    /// Takes a free slot, or queues until one is handed over.
    ///
    /// A zero `queue_timeout` never queues.
    async fn acquire(
        &self,
        label: &str,
        queue_timeout: Option<Duration>,
        caller: Option<&CancellationToken>,
    ) -> Result<Slot, PoolError<E>> {
        let now = Instant::now();
        let (id, rx) = {
            let mut st = self.lock();
            if st.queue.is_empty() {
                if let Some(lease) = st.registry.grant(label, now, self.config.lease_timeout) {
                    self.events.emit(PoolEventKind::LeaseGranted {
                        lease_id: lease.id,
                        label: lease.label.clone(),
                        waited_ms: 0,
                    });
                    return Ok(Slot::Granted(lease));
                }
            }
            if queue_timeout.is_some_and(|timeout| timeout.is_zero()) {
                return Ok(Slot::TimedOut(Duration::ZERO));
            }
            let (id, rx) = st.queue.push(label, now);
            self.events.emit(PoolEventKind::Queued {
                label: label.to_string(),
                position: st.queue.len(),
            });
            (id, rx)
        };

        let mut wait = QueueWait {
            inner: self,
            id,
            rx,
            granted: false,
        };
        let outcome = tokio::select! {
            biased;
            _ = caller_cancelled(caller) => WaitOutcome::Cancelled(CancelReason::Caller),
            _ = self.force_cancel.cancelled() => WaitOutcome::Cancelled(CancelReason::Shutdown),
            grant = &mut wait.rx => WaitOutcome::Granted(grant),
            _ = sleep_for(queue_timeout) => WaitOutcome::TimedOut,
        };

        match outcome {
            WaitOutcome::Granted(Ok(lease)) => {
                wait.granted = true;
                Ok(Slot::Granted(lease))
            }
            WaitOutcome::Granted(Err(_)) => {
                panic!("wait queue dropped waiter for '{label}' without a grant")
            }
            WaitOutcome::Cancelled(reason) => {
                drop(wait);
                Err(self.cancelled(label, reason))
            }
            WaitOutcome::TimedOut => {
                drop(wait);
                Ok(Slot::TimedOut(now.elapsed()))
            }
        }
    }

    /// Waits out the backoff before the next attempt.
    async fn backoff(
        &self,
        label: &str,
        attempt: u32,
        error: String,
        caller: Option<&CancellationToken>,
    ) -> Result<(), PoolError<E>> {
        let delay = self.config.retry.backoff.delay_for_attempt(attempt - 1);
        self.events.emit(PoolEventKind::RetryScheduled {
            label: label.to_string(),
            attempt,
            delay_ms: delay.as_millis() as u64,
            error,
        });

        tokio::select! {
            biased;
            _ = caller_cancelled(caller) => Err(self.cancelled(label, CancelReason::Caller)),
            _ = self.force_cancel.cancelled() => Err(self.cancelled(label, CancelReason::Shutdown)),
            _ = time::sleep(delay) => Ok(()),
        }
    }

    fn cancelled(&self, label: &str, reason: CancelReason) -> PoolError<E> {
        {
            let mut st = self.lock();
            st.stats.cancelled_calls += 1;
            if reason == CancelReason::Shutdown {
                st.stats.shutdown_cancelled += 1;
            }
        }
        tracing::debug!(pool = %self.config.name, label = %label, reason = %reason, "Call cancelled");
        PoolError::Cancelled {
            label: label.to_string(),
            reason,
        }
    }

    fn settle_success(&self, admission: &mut AdmissionGuard<'_, E>, ran_for: Duration) {
        let admission = admission.take();
        let mut st = self.lock();
        st.stats.successful_attempts += 1;
        st.stats.record_latency(ran_for);
        if let Some(admission) = admission {
            let transition = st.breaker.on_success(admission);
            self.emit_transition(&st, transition);
        }
    }

    /// Records a terminal failure. `counts` decides whether the breaker sees it.
    fn settle_failure(
        &self,
        admission: &mut AdmissionGuard<'_, E>,
        counts: bool,
        error: String,
        ran_for: Duration,
    ) {
        let admission = admission.take();
        let mut st = self.lock();
        st.stats.record_failure(error);
        st.stats.record_latency(ran_for);
        match admission {
            Some(admission) if counts => {
                let transition = st.breaker.on_failure(admission, Instant::now());
                self.emit_transition(&st, transition);
            }
            Some(admission) => st.breaker.abandon_trial(admission),
            None => {}
        }
    }

    /// Records a terminal failure of a call whose operation never ran.
    fn settle_unrun(&self, admission: &mut AdmissionGuard<'_, E>, error: String) {
        let admission = admission.take();
        let mut st = self.lock();
        st.stats.record_failure(error);
        if let Some(admission) = admission {
            st.breaker.abandon_trial(admission);
        }
    }

    /// Returns a slot to the pool and hands it to the next waiter.
    fn finish_lease(&self, id: LeaseId, revoke: bool) {
        let now = Instant::now();
        let mut st = self.lock();
        let lease = if revoke {
            st.stats.timed_out_attempts += 1;
            st.registry.revoke(id)
        } else {
            st.registry.release(id)
        };
        if let Some(lease) = lease {
            let held_ms = lease.held_for(now).as_millis() as u64;
            self.events.emit(if revoke {
                PoolEventKind::LeaseRevoked {
                    lease_id: lease.id,
                    label: lease.label,
                    held_ms,
                }
            } else {
                PoolEventKind::LeaseReleased {
                    lease_id: lease.id,
                    label: lease.label,
                    held_ms,
                }
            });
        }
        self.dispatch(&mut st, now);
    }

    /// Grants free slots to queued waiters in arrival order.
    fn dispatch(&self, st: &mut PoolState, now: Instant) {
        while st.registry.has_capacity() {
            let Some(waiter) = st.queue.pop_front() else {
                break;
            };
            let Some(lease) = st
                .registry
                .grant(&waiter.label, now, self.config.lease_timeout)
            else {
                panic!("lease registry refused a grant below capacity");
            };
            let lease_id = lease.id;
            match waiter.grant.send(lease) {
                Ok(()) => self.events.emit(PoolEventKind::LeaseGranted {
                    lease_id,
                    label: waiter.label,
                    waited_ms: now.saturating_duration_since(waiter.enqueued_at).as_millis()
                        as u64,
                }),
                Err(lease) => {
                    st.registry.release(lease.id);
                }
            }
        }
    }

    /// Waits until no admitted call is left, or `deadline` passes.
    async fn wait_idle(&self, deadline: Instant) -> bool {
        loop {
            let notified = self.idle.notified();
            if self.lock().calls_in_flight == 0 {
                return true;
            }
            tokio::select! {
                _ = notified => {}
                _ = time::sleep_until(deadline) => return false,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Caller,
    Heartbeat,
}

enum Slot {
    Granted(Lease),
    TimedOut(Duration),
}

enum Attempt<T, E> {
    Done(Result<T, E>),
    TimedOut,
    Cancelled(CancelReason),
}

enum WaitOutcome {
    Granted(Result<Lease, oneshot::error::RecvError>),
    Cancelled(CancelReason),
    TimedOut,
}

/// Runs one attempt under its lease deadline.
///
/// The operation future is dropped before this returns, so it never outlives
/// the lease.
async fn run_leased<T, E, Fut>(
    attempt: Fut,
    deadline: Option<Instant>,
    caller: Option<&CancellationToken>,
    force_cancel: &CancellationToken,
) -> Attempt<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    tokio::select! {
        biased;
        _ = caller_cancelled(caller) => Attempt::Cancelled(CancelReason::Caller),
        _ = force_cancel.cancelled() => Attempt::Cancelled(CancelReason::Shutdown),
        result = attempt => Attempt::Done(result),
        _ = sleep_until(deadline) => Attempt::TimedOut,
    }
}

async fn caller_cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn sleep_for(duration: Option<Duration>) {
    match duration {
        Some(duration) => time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Counts a call as in flight until it returns or is dropped.
struct CallGuard<'a, E> {
    inner: &'a PoolInner<E>,
}

impl<'a, E> CallGuard<'a, E> {
    fn enter(inner: &'a PoolInner<E>) -> Option<Self> {
        let mut st = inner.lock();
        if !st.accepting {
            return None;
        }
        st.calls_in_flight += 1;
        Some(Self { inner })
    }
}

impl<E> Drop for CallGuard<'_, E> {
    fn drop(&mut self) {
        let idle = {
            let mut st = self.inner.lock();
            st.calls_in_flight -= 1;
            st.calls_in_flight == 0
        };
        if idle {
            self.inner.idle.notify_waiters();
        }
    }
}

/// Gives back an unsettled half-open trial slot on drop.
struct AdmissionGuard<'a, E> {
    inner: &'a PoolInner<E>,
    admission: Option<Admission>,
}

impl<E> AdmissionGuard<'_, E> {
    fn is_trial(&self) -> bool {
        self.admission.is_some_and(Admission::is_trial)
    }

    /// Takes the admission for settling; the guard becomes inert.
    fn take(&mut self) -> Option<Admission> {
        self.admission.take()
    }
}

impl<E> Drop for AdmissionGuard<'_, E> {
    fn drop(&mut self) {
        if let Some(admission) = self.admission.take().filter(|a| a.is_trial()) {
            self.inner.lock().breaker.abandon_trial(admission);
        }
    }
}

/// Leaves the wait queue on drop, passing on a grant that already arrived.
struct QueueWait<'a, E> {
    inner: &'a PoolInner<E>,
    id: WaiterId,
    rx: oneshot::Receiver<Lease>,
    granted: bool,
}

impl<E> Drop for QueueWait<'_, E> {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        let removed = self.inner.lock().queue.remove(self.id);
        if !removed {
            if let Ok(lease) = self.rx.try_recv() {
                self.inner.finish_lease(lease.id, false);
            }
        }
    }
}

/// Releases its lease exactly once: explicitly, or on drop.
struct LeaseGuard<'a, E> {
    inner: &'a PoolInner<E>,
    lease: Option<Lease>,
}

impl<'a, E> LeaseGuard<'a, E> {
    fn new(inner: &'a PoolInner<E>, lease: Lease) -> Self {
        Self {
            inner,
            lease: Some(lease),
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.lease.as_ref().and_then(|lease| lease.deadline)
    }

    fn release(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.inner.finish_lease(lease.id, false);
        }
    }

    fn revoke(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.inner.finish_lease(lease.id, true);
        }
    }
}

impl<E> Drop for LeaseGuard<'_, E> {
    fn drop(&mut self) {
        self.release();
    }
}
