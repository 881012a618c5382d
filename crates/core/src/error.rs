//! Shared error taxonomy for the operations core.

use thiserror::Error;

/// Errors surfaced by every component of the engine.
#[derive(Debug, Error)]
pub enum OpsError {
    /// A referenced entity does not exist for the tenant.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The caller supplied data the operation cannot accept.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A concurrent writer held the store; retrying may succeed.
    #[error("write conflict: {0}")]
    Conflict(String),

    /// The durable store failed or returned corrupt data.
    #[error("storage error: {0}")]
    Storage(String),
}

impl OpsError {
    /// Whether retrying the failed operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OpsError::Conflict(_) | OpsError::Storage(_))
    }
}

pub type OpsResult<T> = Result<T, OpsError>;

/// Shorthand for the common not-found case.
pub fn not_found(kind: &'static str, id: &str) -> OpsError {
    OpsError::NotFound {
        kind,
        id: id.to_string(),
    }
}
