//! Filesystem backend: one directory per collection, one file per key.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/VERSION            schema version marker ("1")
//! <root>/settings/<hex key>
//! <root>/images/<hex key>
//! <root>/projects/<hex key>
//! ```
//!
//! File names are the hex encoding of the key, so any key string is safe on
//! disk. Writes go to a temp file in the same directory and are renamed into
//! place, which makes each `put` atomic for its key.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::collection::Collection;
use crate::error::{BackendError, BackendResult};
use crate::traits::{Backend, Connector};

/// Schema version written to `VERSION` on first creation.
pub const SCHEMA_VERSION: u32 = 1;

const VERSION_FILE: &str = "VERSION";

/// Directory-backed [`Backend`].
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Open a root that has already been provisioned.
    ///
    /// Use [`FsConnector`] to create or upgrade the layout.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, collection: Collection) -> PathBuf {
        self.root.join(collection.name())
    }

    fn path(&self, collection: Collection, key: &str) -> PathBuf {
        self.dir(collection).join(hex::encode(key.as_bytes()))
    }
}

#[async_trait]
impl Backend for FsBackend {
    async fn get(&self, collection: Collection, key: &str) -> BackendResult<Option<Bytes>> {
        match tokio::fs::read(self.path(collection, key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, collection: Collection, key: &str, value: Bytes) -> BackendResult<()> {
        let dir = self.dir(collection);
        let path = self.path(collection, key);
        let len = value.len();
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(&value)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| BackendError::Io(io::Error::other(e)))??;
        debug!(%collection, key, len, "fs put");
        Ok(())
    }

    async fn delete(&self, collection: Collection, key: &str) -> BackendResult<bool> {
        match tokio::fs::remove_file(self.path(collection, key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self, collection: Collection) -> BackendResult<Vec<String>> {
        let mut dir = tokio::fs::read_dir(self.dir(collection)).await?;
        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            // Temp files from in-flight writes are not hex and are skipped.
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Ok(raw) = hex::decode(&name) else {
                continue;
            };
            match String::from_utf8(raw) {
                Ok(key) => keys.push(key),
                Err(e) => {
                    return Err(BackendError::Corrupt {
                        collection,
                        key: name,
                        reason: e.to_string(),
                    })
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Opens an [`FsBackend`], provisioning the layout on first use.
///
/// Missing collection directories are created (so a root written by an
/// older build with fewer collections is upgraded in place). A root whose
/// `VERSION` names a newer schema is refused.
#[derive(Debug, Clone)]
pub struct FsConnector {
    root: PathBuf,
}

impl FsConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Connector for FsConnector {
    async fn connect(&self) -> BackendResult<Arc<dyn Backend>> {
        let root = self.root.clone();
        let created = tokio::task::spawn_blocking(move || provision(&root))
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))??;
        info!(root = %self.root.display(), created, "filesystem backend opened");
        Ok(Arc::new(FsBackend::new(self.root.clone())))
    }

    fn describe(&self) -> String {
        format!("filesystem:{}", self.root.display())
    }
}

/// Create or upgrade the on-disk layout. Returns `true` on first creation.
fn provision(root: &Path) -> BackendResult<bool> {
    let unavailable =
        |what: &str, e: io::Error| BackendError::Unavailable(format!("{what} {}: {e}", root.display()));

    std::fs::create_dir_all(root).map_err(|e| unavailable("cannot create", e))?;

    let version_path = root.join(VERSION_FILE);
    let created = match std::fs::read_to_string(&version_path) {
        Ok(text) => {
            let version: u32 = text.trim().parse().map_err(|_| {
                BackendError::Unavailable(format!(
                    "unreadable schema version {:?} in {}",
                    text.trim(),
                    version_path.display()
                ))
            })?;
            if version > SCHEMA_VERSION {
                return Err(BackendError::Unavailable(format!(
                    "schema version {version} is newer than supported version {SCHEMA_VERSION}"
                )));
            }
            false
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => return Err(unavailable("cannot read", e)),
    };

    for collection in Collection::ALL {
        std::fs::create_dir_all(root.join(collection.name()))
            .map_err(|e| unavailable("cannot provision", e))?;
    }

    if created {
        std::fs::write(&version_path, format!("{SCHEMA_VERSION}\n"))
            .map_err(|e| unavailable("cannot write", e))?;
    }
    Ok(created)
}
