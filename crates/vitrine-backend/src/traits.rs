use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::collection::Collection;
use crate::error::BackendResult;

/// Persistent key-value storage with three named collections.
///
/// Implementations must satisfy these invariants:
/// - Each `put` and `delete` is atomic for its key: readers see the old
///   value or the new one, never a mix.
/// - Collections are independent key spaces.
/// - There is no cross-key transaction. Read-modify-write sequences built
///   on top of a backend can lose updates under concurrent writers.
/// - All I/O errors are propagated.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read a value. Returns `Ok(None)` if the key does not exist.
    async fn get(&self, collection: Collection, key: &str) -> BackendResult<Option<Bytes>>;

    /// Create or overwrite a value.
    async fn put(&self, collection: Collection, key: &str, value: Bytes) -> BackendResult<()>;

    /// Delete a value. Returns `true` if the key existed.
    async fn delete(&self, collection: Collection, key: &str) -> BackendResult<bool>;

    /// All keys in a collection, sorted.
    async fn keys(&self, collection: Collection) -> BackendResult<Vec<String>>;

    /// All entries in a collection, sorted by key.
    ///
    /// Default implementation reads each key in turn. A key deleted between
    /// the listing and its read is skipped.
    async fn entries(&self, collection: Collection) -> BackendResult<Vec<(String, Bytes)>> {
        let mut out = Vec::new();
        for key in self.keys(collection).await? {
            if let Some(value) = self.get(collection, &key).await? {
                out.push((key, value));
            }
        }
        Ok(out)
    }
}

/// Opens (and on first use provisions) a [`Backend`].
///
/// A connector is called at most once per successful open; the store keeps
/// the returned handle for the rest of the process.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> BackendResult<Arc<dyn Backend>>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}
