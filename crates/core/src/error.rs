//! Store error model.

use thiserror::Error;

use crate::id::JobId;
use crate::job::JobStatus;

/// Result type used across the store surface.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the job store.
///
/// Transition and lookup failures are deterministic and must reach the caller
/// unchanged: the job status is the single source of truth for downstream
/// polling, so the API layer needs to distinguish them from outages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No job exists with the given id.
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// No session exists with the given key.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The requested status change violates the lifecycle state machine.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Malformed input (params shape, session key, negative timings).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The underlying persistence layer failed.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn invalid_transition(from: JobStatus, to: JobStatus) -> Self {
        Self::InvalidTransition { from, to }
    }
}
