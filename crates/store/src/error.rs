//! Store error taxonomy.

/// Errors produced by piece stores and their collaborators.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unknown upload id on a read. Non-fatal; the caller decides.
    #[error("unknown upload id: {0}")]
    NotFound(String),

    /// The distributed lock could not be acquired within the retry budget.
    #[error("lock acquisition timed out for key: {0}")]
    LockTimeout(String),

    /// The backend is unreachable.
    #[error("store connection error: {0}")]
    Connection(String),

    /// Backend-specific failure (malformed stored value, client error).
    #[error("store backend error: {0}")]
    Backend(String),
}
