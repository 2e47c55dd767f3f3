//! Retry policy: error classification and exponential backoff.
//!
//! Classification and backoff are pure. The pool consults them after each
//! failed attempt; this module never sleeps or runs anything itself.

mod backoff;
mod classify;

pub use backoff::{BackoffPolicy, RetryConfig};
pub use classify::{
    AlwaysRetry, Classify, DefaultClassifier, ErrorClass, ErrorClassifier, FailureKind,
    FnClassifier,
};
