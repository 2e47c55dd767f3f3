//! Circuit breaker for protecting a failing resource.
//!
//! The circuit breaker pattern prevents cascading failures by temporarily
//! stopping traffic to a failing resource and probing it with a single
//! trial request to detect recovery.
//!
//! ## States
//!
//! - **Closed**: Normal operation; requests pass through.
//! - **Open**: Resource is failing; requests are rejected immediately.
//! - **Half-Open**: One trial request tests whether the resource recovered.
//!
//! ## Usage
//!
//! ```rust
//! use leasepool::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let config = CircuitBreakerConfig::default()
//!     .with_failure_threshold(5)
//!     .with_reset_timeout(Duration::from_secs(30));
//!
//! let breaker = CircuitBreaker::new(config);
//! assert!(breaker.state().is_closed());
//! ```

mod breaker;
mod config;
mod state;

pub use breaker::{Admission, CircuitBreaker, Rejection};
pub use config::CircuitBreakerConfig;
pub use state::{BreakerMetrics, BreakerState, CircuitState, Transition};
