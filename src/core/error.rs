//! Error types for the leasepool library.
//!
//! Every failure a caller can observe is a [`PoolError`]. Failures produced by
//! the caller's own operation are carried inside it unchanged, together with
//! the number of attempts that were made.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The error returned by [`ResourcePool::execute`](crate::ResourcePool::execute).
///
/// `E` is the error type of the caller's operation.
#[derive(Debug, Error)]
pub enum PoolError<E> {
    /// The operation failed with an error classified as non-retryable.
    #[error("operation '{label}' failed permanently after {attempts} attempt(s): {source}")]
    Fatal {
        /// Label of the call.
        label: String,
        /// Number of times the operation was invoked.
        attempts: u32,
        /// The operation's error.
        #[source]
        source: E,
    },

    /// The operation kept failing with retryable errors until the retry
    /// budget ran out.
    #[error("operation '{label}' failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        /// Label of the call.
        label: String,
        /// Number of times the operation was invoked.
        attempts: u32,
        /// The error of the last attempt.
        #[source]
        source: E,
    },

    /// A lease or queue-wait bound was exceeded.
    #[error("operation '{label}' timed out after {elapsed:?} ({phase})")]
    Timeout {
        /// Label of the call.
        label: String,
        /// Which bound was exceeded.
        phase: TimeoutPhase,
        /// How long the timed-out phase ran.
        elapsed: Duration,
        /// Number of times the operation was invoked.
        attempts: u32,
    },

    /// The circuit breaker rejected the call; the operation was not invoked.
    #[error("circuit open for '{label}'")]
    CircuitOpen {
        /// Label of the call.
        label: String,
        /// Time until the breaker will admit a trial, if known.
        retry_in: Option<Duration>,
    },

    /// The call was withdrawn before it completed.
    #[error("operation '{label}' was cancelled ({reason})")]
    Cancelled {
        /// Label of the call.
        label: String,
        /// Who withdrew the call.
        reason: CancelReason,
    },

    /// The pool has begun shutting down and accepts no new work.
    #[error("pool is shutting down; '{label}' was not accepted")]
    ShuttingDown {
        /// Label of the call.
        label: String,
    },
}

impl<E> PoolError<E> {
    /// Returns the label of the call that failed.
    pub fn label(&self) -> &str {
        match self {
            Self::Fatal { label, .. }
            | Self::RetriesExhausted { label, .. }
            | Self::Timeout { label, .. }
            | Self::CircuitOpen { label, .. }
            | Self::Cancelled { label, .. }
            | Self::ShuttingDown { label } => label,
        }
    }

    /// Returns the number of operation invocations behind this error.
    ///
    /// Circuit rejections, shutdown rejections and cancellations before the
    /// first attempt report zero.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Fatal { attempts, .. }
            | Self::RetriesExhausted { attempts, .. }
            | Self::Timeout { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// Returns `true` for failures of a kind the pool would retry:
    /// exhausted retries and timeouts.
    pub fn is_retryable_kind(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. } | Self::Timeout { .. })
    }

    /// Returns `true` if the circuit breaker rejected the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Returns `true` if the call was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns `true` if a lease or queue-wait bound was exceeded.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns the operation's own error, if there is one.
    pub fn source_error(&self) -> Option<&E> {
        match self {
            Self::Fatal { source, .. } | Self::RetriesExhausted { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Consumes the error and returns the operation's own error, if there is one.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Fatal { source, .. } | Self::RetriesExhausted { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Which bound a [`PoolError::Timeout`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPhase {
    /// A granted lease ran past its deadline and was reclaimed.
    Lease,
    /// The caller's queue-wait bound elapsed before a slot freed.
    QueueWait,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lease => write!(f, "lease timeout"),
            Self::QueueWait => write!(f, "queue wait timeout"),
        }
    }
}

/// Why a call was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The caller's cancellation token fired.
    Caller,
    /// The pool was shut down before the call could finish.
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Caller => write!(f, "cancelled by caller"),
            Self::Shutdown => write!(f, "cancelled by pool shutdown"),
        }
    }
}

/// Error type for building a pool or loading its configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration field holds an unusable value.
    #[error("invalid value for '{field}': {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML for this schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A heartbeat was requested but no tokio runtime is running.
    #[error("heartbeat requires a running tokio runtime")]
    NoRuntime,
}

impl ConfigError {
    /// Creates an `Invalid` error.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// A specialized `Result` type for pool calls.
pub type PoolResult<T, E> = Result<T, PoolError<E>>;
