//! Core types for the leasepool library.
//!
//! - [`error`] - `PoolError`, `ConfigError` and their supporting enums
//! - [`types`] - `Lease`, `LeaseId` and per-call `ExecuteOptions`

pub(crate) mod duration_ms;
pub mod error;
pub mod types;

pub use error::{CancelReason, ConfigError, PoolError, PoolResult, TimeoutPhase};
pub use types::{ExecuteOptions, Lease, LeaseId};
