use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use vitrine_backend::{Connector, FsConnector, InMemoryBackend, InMemoryConnector};

/// Which backend the store opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Filesystem,
}

/// Store configuration, usually read from `vitrine.toml`.
///
/// ```toml
/// backend = "filesystem"
/// data_dir = "/var/lib/vitrine"
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub backend: BackendKind,
    /// Root directory of the filesystem backend.
    pub data_dir: PathBuf,
    /// Byte quota for the memory backend. Unlimited when absent.
    pub memory_quota_bytes: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Filesystem,
            data_dir: PathBuf::from("vitrine-data"),
            memory_quota_bytes: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl StoreConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// A connector for the configured backend.
    pub fn connector(&self) -> Arc<dyn Connector> {
        match self.backend {
            BackendKind::Memory => {
                let backend = match self.memory_quota_bytes {
                    Some(quota) => InMemoryBackend::with_quota(quota),
                    None => InMemoryBackend::new(),
                };
                Arc::new(InMemoryConnector::with_backend(Arc::new(backend)))
            }
            BackendKind::Filesystem => Arc::new(FsConnector::new(self.data_dir.clone())),
        }
    }
}
