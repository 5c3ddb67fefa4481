//! Errors in the library.
use thiserror::Error;

/// Errors in the library.
///
/// There is deliberately no transient or retryable class: every failure
/// indicates either a misconfiguration or a caller contract violation.
#[derive(Error, Debug)]
pub enum VantageError {
    /// Invalid, missing or conflicting configuration, detected at
    /// construction time. The process should not start.
    #[error("configuration error: {0}")]
    Config(String),

    /// A malformed call at a public boundary, e.g. a bad experience batch.
    /// The caller is responsible; the call is not retried internally.
    #[error("precondition violation: {0}")]
    Precondition(String),

    /// An inconsistency discovered after construction, e.g. policy and
    /// baseline disagreeing on their past horizon at optimization time.
    /// Treated as a fatal bug.
    #[error("internal consistency error: {0}")]
    Inconsistency(String),
}
