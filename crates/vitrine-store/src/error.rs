use vitrine_backend::{BackendError, Collection};
use vitrine_types::{ProjectId, ValidationError};

/// Errors surfaced by [`ContentStore`](crate::ContentStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be opened.
    #[error("storage unavailable ({backend}): {source}")]
    StorageUnavailable {
        backend: String,
        #[source]
        source: BackendError,
    },

    /// The backend rejected a write or delete.
    #[error("write to {collection}/{key} failed: {source}")]
    StorageWriteFailed {
        collection: Collection,
        key: String,
        #[source]
        source: BackendError,
    },

    /// The backend failed a read, or returned a record that cannot be decoded.
    #[error("read from {collection}/{key} failed: {source}")]
    StorageReadFailed {
        collection: Collection,
        key: String,
        #[source]
        source: BackendError,
    },

    /// Caller-supplied data violates a record invariant. Raised before any
    /// state is touched.
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ValidationError),

    /// No project with this id exists.
    #[error("project not found: {0}")]
    NotFound(ProjectId),
}

impl StoreError {
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
