use thiserror::Error;

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// User-provided input is invalid (URL, size, type). Surfaced to the
    /// caller; not logged as an error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource absent, or present but not owned by the caller. Ownership
    /// mismatches deliberately collapse into this to prevent enumeration.
    #[error("Not found")]
    NotFound,

    /// Operation not valid in the current state (e.g. re-enqueuing a
    /// running task).
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Object-store read-back verification mismatch. Fatal for the current
    /// operation; never retried by the retry executor.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Timeout or 5xx from a backend. Retried per the operation's policy.
    #[error("Transient backend error: {0}")]
    Transient(String),

    /// All extraction strategies failed for a document.
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// Explicit cancel or deadline expiry.
    #[error("Cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IngestError {
    /// Whether the retry executor may re-attempt the failed operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, IngestError::Transient(_))
    }
}
