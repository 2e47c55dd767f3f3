//! Periodic heartbeat probing.

use crate::pool::{PoolInner, ResourcePool};

use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A lightweight check run through the pool on every heartbeat.
///
/// Probes go through the same circuit gating, queueing and lease timeout as
/// real calls, so a silently failing resource trips the breaker before a
/// caller hits it.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use leasepool::health::Probe;
/// use std::io;
///
/// struct PingProbe;
///
/// #[async_trait]
/// impl Probe<io::Error> for PingProbe {
///     async fn probe(&self) -> Result<(), io::Error> {
///         // e.g. open a connection and send a ping
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Probe<E>: Send + Sync {
    /// Runs one check against the protected resource.
    async fn probe(&self) -> Result<(), E>;
}

/// A probe that does nothing and always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProbe;

#[async_trait]
impl<E: Send + 'static> Probe<E> for NoopProbe {
    async fn probe(&self) -> Result<(), E> {
        Ok(())
    }
}

#[async_trait]
impl<E, P> Probe<E> for Arc<P>
where
    P: Probe<E> + ?Sized,
    E: Send + 'static,
{
    async fn probe(&self) -> Result<(), E> {
        (**self).probe().await
    }
}

/// Spawns the heartbeat loop for a pool.
///
/// The task keeps only a weak reference and stops when `stop` fires or the
/// pool is gone. The first probe runs one `interval` after spawning.
pub(crate) fn spawn<E>(
    runtime: &Handle,
    pool: Weak<PoolInner<E>>,
    interval: Duration,
    stop: CancellationToken,
) -> JoinHandle<()>
where
    E: fmt::Display + Send + 'static,
{
    runtime.spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(inner) = pool.upgrade() else {
                break;
            };
            let handle = ResourcePool::from_inner(inner);

            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = handle.heartbeat() => {}
            }
        }

        tracing::debug!(interval_ms = interval.as_millis() as u64, "Health monitor stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[tokio::test]
    async fn test_noop_probe_succeeds() {
        let probe = NoopProbe;
        let result: Result<(), io::Error> = probe.probe().await;
        assert!(result.is_ok());
    }
}
