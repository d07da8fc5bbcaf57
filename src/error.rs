//! Error kinds surfaced by the engine.
//!
//! Every mutating operation either succeeds with the new record state or
//! fails with exactly one of these kinds. Batch operations (`bulk_approve`,
//! `lock_month`) aggregate per-item failures into their result structures
//! and only raise for structural problems.

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// Malformed input: empty required string, negative or non-finite
    /// hours, inverted month span, duplicate cell coordinates.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown id, or an id owned by another tenant. Tenant mismatch is
    /// reported as not-found so existence does not leak across tenants.
    #[error("not found: {0}")]
    NotFound(String),

    /// The cell's current status does not permit the requested transition.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Mutation attempted on a locked forecast.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Lost an optimistic-concurrency race after the retry budget.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Storage(#[from] sled::Error),

    #[error("codec failure: {0}")]
    Codec(String),
}

impl From<minicbor::decode::Error> for EngineError {
    fn from(err: minicbor::decode::Error) -> Self {
        EngineError::Codec(err.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for EngineError {
    fn from(err: minicbor::encode::Error<E>) -> Self {
        EngineError::Codec(err.to_string())
    }
}
