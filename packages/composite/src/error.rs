//! Error types for the composite query engine.

use thiserror::Error;

/// Result type for composite engine operations.
pub type Result<T> = std::result::Result<T, CompositeError>;

/// Composite engine errors.
///
/// Only caller mistakes and internal invariant violations are errors.
/// Per-subquery soft failures (upstream 5xx, unparseable bodies, failed
/// secondary lookups) are accumulated as warnings on the composite response
/// and never abort the request.
#[derive(Debug, Error)]
pub enum CompositeError {
    /// Malformed or conflicting request parameters (maps to HTTP 400).
    #[error("{0}")]
    BadRequest(String),

    /// Invariant violation inside the engine (maps to HTTP 500).
    #[error("internal error: {0}")]
    Internal(String),
}

impl CompositeError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        CompositeError::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CompositeError::Internal(msg.into())
    }
}
