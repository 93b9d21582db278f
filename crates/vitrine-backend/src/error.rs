use std::io;

use crate::collection::Collection;

/// Errors from backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend cannot be opened or has become unusable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A write would exceed the backend's storage quota.
    #[error("quota exceeded writing to {collection}: {requested} bytes requested, {remaining} remaining")]
    QuotaExceeded {
        collection: Collection,
        requested: u64,
        remaining: u64,
    },

    /// I/O error from the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Stored data cannot be interpreted.
    #[error("corrupt entry {collection}/{key}: {reason}")]
    Corrupt {
        collection: Collection,
        key: String,
        reason: String,
    },
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
