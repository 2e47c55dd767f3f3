//! Health telemetry: heartbeat probing and point-in-time snapshots.
//!
//! A pool with a non-zero `heartbeat_interval` runs a background task that
//! sends a [`Probe`] through the pool on every tick. Probe outcomes and
//! latencies feed the same counters as real calls, and
//! [`ResourcePool::health`](crate::ResourcePool::health) returns them as a
//! [`HealthSnapshot`].

pub(crate) mod monitor;
mod snapshot;

pub use monitor::{NoopProbe, Probe};
pub(crate) use snapshot::PoolStats;
pub use snapshot::HealthSnapshot;
