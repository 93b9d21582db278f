use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;

use crate::collection::Collection;
use crate::error::{BackendError, BackendResult};
use crate::traits::{Backend, Connector};

type Tables = HashMap<Collection, BTreeMap<String, Bytes>>;

/// In-memory backend for tests and embedding.
///
/// All collections live in one map behind a `RwLock`. An optional quota caps
/// the total stored bytes across collections; a write that would exceed it
/// fails with [`BackendError::QuotaExceeded`] and leaves the old value.
pub struct InMemoryBackend {
    tables: RwLock<Tables>,
    quota_bytes: Option<u64>,
}

impl InMemoryBackend {
    /// Create an empty backend with all collections provisioned.
    pub fn new() -> Self {
        let tables = Collection::ALL
            .into_iter()
            .map(|c| (c, BTreeMap::new()))
            .collect();
        Self {
            tables: RwLock::new(tables),
            quota_bytes: None,
        }
    }

    /// Create an empty backend that refuses writes beyond `quota_bytes`.
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::new()
        }
    }

    /// Number of entries in a collection.
    pub fn len(&self, collection: Collection) -> usize {
        self.read_tables()
            .map(|t| t.get(&collection).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Total bytes across all stored values.
    pub fn total_bytes(&self) -> u64 {
        self.read_tables()
            .map(|t| total_bytes(&t))
            .unwrap_or(0)
    }

    fn read_tables(&self) -> BackendResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|e| BackendError::Unavailable(format!("lock poisoned: {e}")))
    }

    fn write_tables(&self) -> BackendResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|e| BackendError::Unavailable(format!("lock poisoned: {e}")))
    }
}

fn total_bytes(tables: &Tables) -> u64 {
    tables
        .values()
        .flat_map(BTreeMap::values)
        .map(|v| v.len() as u64)
        .sum()
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn get(&self, collection: Collection, key: &str) -> BackendResult<Option<Bytes>> {
        let tables = self.read_tables()?;
        Ok(tables.get(&collection).and_then(|t| t.get(key)).cloned())
    }

    async fn put(&self, collection: Collection, key: &str, value: Bytes) -> BackendResult<()> {
        let mut tables = self.write_tables()?;
        if let Some(quota) = self.quota_bytes {
            let replaced = tables
                .get(&collection)
                .and_then(|t| t.get(key))
                .map_or(0, |v| v.len() as u64);
            let used = total_bytes(&tables) - replaced;
            let remaining = quota.saturating_sub(used);
            let requested = value.len() as u64;
            if requested > remaining {
                return Err(BackendError::QuotaExceeded {
                    collection,
                    requested,
                    remaining,
                });
            }
        }
        tables
            .entry(collection)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, collection: Collection, key: &str) -> BackendResult<bool> {
        let mut tables = self.write_tables()?;
        Ok(tables
            .get_mut(&collection)
            .is_some_and(|t| t.remove(key).is_some()))
    }

    async fn keys(&self, collection: Collection) -> BackendResult<Vec<String>> {
        let tables = self.read_tables()?;
        Ok(tables
            .get(&collection)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn entries(&self, collection: Collection) -> BackendResult<Vec<(String, Bytes)>> {
        let tables = self.read_tables()?;
        Ok(tables
            .get(&collection)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("images", &self.len(Collection::Images))
            .field("projects", &self.len(Collection::Projects))
            .field("quota_bytes", &self.quota_bytes)
            .finish()
    }
}

/// Connector that hands out one shared [`InMemoryBackend`].
#[derive(Debug, Clone)]
pub struct InMemoryConnector {
    backend: Arc<InMemoryBackend>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::with_backend(Arc::new(InMemoryBackend::new()))
    }

    /// Share an existing backend, e.g. one pre-seeded by a test.
    pub fn with_backend(backend: Arc<InMemoryBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> Arc<InMemoryBackend> {
        Arc::clone(&self.backend)
    }
}

impl Default for InMemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self) -> BackendResult<Arc<dyn Backend>> {
        Ok(self.backend.clone() as Arc<dyn Backend>)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
