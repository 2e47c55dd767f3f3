//! # Leasepool
//!
//! A bounded-concurrency resource pool with FIFO leasing, retries with
//! jittered exponential backoff, circuit breaking and health telemetry.
//!
//! ## Overview
//!
//! Leasepool guards one protected resource (a database, a converter
//! subprocess, a remote API) behind a fixed number of slots, allowing you to:
//!
//! - Run operations under exclusive, time-bounded leases
//! - Queue excess demand in strict arrival order
//! - Retry transient failures with exponential backoff and jitter
//! - Fast-fail calls while the resource is down, with circuit breakers
//! - Observe the pool through health snapshots and lifecycle events
//! - Shut down gracefully, draining in-flight work
//!
//! ## Quick Start
//!
//! ```rust
//! use leasepool::{DefaultClassifier, ResourcePool, ResourcePoolConfig};
//! use std::io;
//! use std::time::Duration;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ResourcePoolConfig::new("storage")
//!         .with_max_concurrent(4)
//!         .with_lease_timeout(Duration::from_secs(5));
//!
//!     let pool: ResourcePool<io::Error> = ResourcePool::new(config, DefaultClassifier)?;
//!
//!     let bytes = pool
//!         .execute("read-manifest", || async { Ok::<_, io::Error>(b"manifest".len()) })
//!         .await?;
//!     assert_eq!(bytes, 8);
//!
//!     let health = pool.health();
//!     assert_eq!(health.successful_attempts, 1);
//!
//!     pool.shutdown(Duration::from_secs(1)).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several layers:
//!
//! - **Core**: Errors, leases and per-call options
//! - **Retry**: Error classification and backoff
//! - **Circuit Breaker**: Fast-failing a resource that keeps failing
//! - **Lease**: Active lease registry and the FIFO wait queue
//! - **Pool**: Orchestration of the above around caller operations
//! - **Health**: Heartbeat probing and snapshots
//! - **Events**: Structured lifecycle events for logs and subscribers

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod circuit_breaker;
pub mod core;
pub mod events;
pub mod health;
pub mod lease;
pub mod mock;
pub mod pool;
pub mod retry;

// Re-export commonly used types at the crate root
pub use crate::core::{
    CancelReason, ConfigError, ExecuteOptions, Lease, LeaseId, PoolError, PoolResult,
    TimeoutPhase,
};

pub use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
pub use crate::events::{PoolEvent, PoolEventKind};
pub use crate::health::{HealthSnapshot, NoopProbe, Probe};
pub use crate::pool::{ResourcePool, ResourcePoolBuilder, ResourcePoolConfig, ShutdownReport};
pub use crate::retry::{
    AlwaysRetry, BackoffPolicy, Classify, DefaultClassifier, ErrorClass, ErrorClassifier,
    FailureKind, FnClassifier, RetryConfig,
};

/// Token for cancelling individual calls, see [`ExecuteOptions`].
pub use tokio_util::sync::CancellationToken;

/// Prelude module for convenient imports.
///
/// ```rust
/// use leasepool::prelude::*;
/// ```
pub mod prelude {
    pub use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    pub use crate::core::{
        CancelReason, ConfigError, ExecuteOptions, PoolError, PoolResult, TimeoutPhase,
    };
    pub use crate::health::{HealthSnapshot, Probe};
    pub use crate::pool::{ResourcePool, ResourcePoolConfig, ShutdownReport};
    pub use crate::retry::{
        Classify, DefaultClassifier, ErrorClass, ErrorClassifier, FailureKind, FnClassifier,
        RetryConfig,
    };
    pub use tokio_util::sync::CancellationToken;
}
