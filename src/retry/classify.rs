//! Classify operation errors into retry decisions.
//!
//! The pool holds no domain knowledge about errors. Each pool is given an
//! [`ErrorClassifier`] at construction; the classifier alone decides whether
//! a failure is worth another attempt.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Whether a failed attempt may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transient failure; retry per policy.
    Retryable,
    /// Permanent failure; surface immediately.
    Fatal,
}

/// Decides the [`ErrorClass`] of an operation error.
pub trait ErrorClassifier<E>: Send + Sync {
    /// Classifies `error`.
    fn classify(&self, error: &E) -> ErrorClass;
}

/// High-level kind of a failure, independent of the resource behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed input or otherwise invalid request.
    Validation,
    /// A constraint on the resource was violated (duplicate key, conflict).
    Constraint,
    /// The caller is not allowed to perform the operation.
    Permission,
    /// The resource could not be reached or the connection dropped.
    Connectivity,
    /// The resource did not answer in time.
    Timeout,
    /// The resource is out of capacity (connections, memory, handles).
    ResourceExhausted,
    /// Anything else.
    Unknown,
}

impl FailureKind {
    /// Returns the class the default policy assigns to this kind.
    pub fn default_class(self) -> ErrorClass {
        match self {
            Self::Connectivity | Self::Timeout | Self::ResourceExhausted => ErrorClass::Retryable,
            Self::Validation | Self::Constraint | Self::Permission | Self::Unknown => {
                ErrorClass::Fatal
            }
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Constraint => "constraint",
            Self::Permission => "permission",
            Self::Connectivity => "connectivity",
            Self::Timeout => "timeout",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Errors that can describe their own [`FailureKind`].
pub trait Classify {
    /// Returns the kind of this failure.
    fn failure_kind(&self) -> FailureKind;
}

impl Classify for io::Error {
    fn failure_kind(&self) -> FailureKind {
        match self.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => FailureKind::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::Interrupted => FailureKind::Connectivity,
            io::ErrorKind::OutOfMemory => FailureKind::ResourceExhausted,
            io::ErrorKind::PermissionDenied => FailureKind::Permission,
            io::ErrorKind::AlreadyExists => FailureKind::Constraint,
            io::ErrorKind::InvalidInput
            | io::ErrorKind::InvalidData
            | io::ErrorKind::NotFound
            | io::ErrorKind::Unsupported => FailureKind::Validation,
            _ => FailureKind::Unknown,
        }
    }
}

/// Classifier for any error implementing [`Classify`].
///
/// Connectivity, timeout and resource-exhaustion failures are retryable;
/// validation, constraint, permission and unknown failures are fatal.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl<E: Classify> ErrorClassifier<E> for DefaultClassifier {
    fn classify(&self, error: &E) -> ErrorClass {
        error.failure_kind().default_class()
    }
}

/// Classifier that retries every error.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl<E> ErrorClassifier<E> for AlwaysRetry {
    fn classify(&self, _error: &E) -> ErrorClass {
        ErrorClass::Retryable
    }
}

/// Classifier backed by a closure.
///
/// ```rust
/// use leasepool::retry::{ErrorClass, ErrorClassifier, FnClassifier};
///
/// let classifier = FnClassifier::new(|e: &String| {
///     if e.starts_with("busy") { ErrorClass::Retryable } else { ErrorClass::Fatal }
/// });
/// assert_eq!(classifier.classify(&"busy: try later".to_string()), ErrorClass::Retryable);
/// ```
pub struct FnClassifier<F>(F);

impl<F> FnClassifier<F> {
    /// Wraps `f` as a classifier.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> fmt::Debug for FnClassifier<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnClassifier").finish_non_exhaustive()
    }
}

impl<E, F> ErrorClassifier<E> for FnClassifier<F>
where
    F: Fn(&E) -> ErrorClass + Send + Sync,
{
    fn classify(&self, error: &E) -> ErrorClass {
        (self.0)(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds_retryable() {
        for kind in [
            FailureKind::Connectivity,
            FailureKind::Timeout,
            FailureKind::ResourceExhausted,
        ] {
            assert_eq!(kind.default_class(), ErrorClass::Retryable, "{kind}");
        }
    }

    #[test]
    fn test_structural_kinds_fatal() {
        for kind in [
            FailureKind::Validation,
            FailureKind::Constraint,
            FailureKind::Permission,
            FailureKind::Unknown,
        ] {
            assert_eq!(kind.default_class(), ErrorClass::Fatal, "{kind}");
        }
    }

    #[test]
    fn test_io_errors() {
        let classifier = DefaultClassifier;
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "slow");
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let bad_input = io::Error::new(io::ErrorKind::InvalidInput, "bad");

        assert_eq!(classifier.classify(&reset), ErrorClass::Retryable);
        assert_eq!(classifier.classify(&timed_out), ErrorClass::Retryable);
        assert_eq!(classifier.classify(&denied), ErrorClass::Fatal);
        assert_eq!(classifier.classify(&bad_input), ErrorClass::Fatal);
    }

    #[test]
    fn test_fn_classifier() {
        let classifier = FnClassifier::new(|code: &u16| {
            if *code >= 500 {
                ErrorClass::Retryable
            } else {
                ErrorClass::Fatal
            }
        });

        assert_eq!(classifier.classify(&503), ErrorClass::Retryable);
        assert_eq!(classifier.classify(&404), ErrorClass::Fatal);
    }

    #[test]
    fn test_always_retry() {
        assert_eq!(
            ErrorClassifier::<io::Error>::classify(
                &AlwaysRetry,
                &io::Error::new(io::ErrorKind::PermissionDenied, "denied")
            ),
            ErrorClass::Retryable
        );
    }
}
