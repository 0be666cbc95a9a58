//! Key-value persistence backends for the history store

use crate::error::{TxManagerError, TxManagerResult};

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;
use tracing::debug;

/// Blob storage keyed by string
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> TxManagerResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>) -> TxManagerResult<()>;
}

/// Process-local store; contents are lost on restart
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> TxManagerResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> TxManagerResult<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// One file per key under a directory
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub async fn new(root: impl Into<PathBuf>) -> TxManagerResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| persistence_error(&root.display().to_string(), e))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("{}.json", file_name))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> TxManagerResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(persistence_error(key, e)),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> TxManagerResult<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");

        // Write-then-rename so a crash never leaves a torn file
        tokio::fs::write(&tmp, &value)
            .await
            .map_err(|e| persistence_error(key, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| persistence_error(key, e))?;

        debug!("Persisted {} bytes to {}", value.len(), path.display());
        Ok(())
    }
}

fn persistence_error(key: &str, e: std::io::Error) -> TxManagerError {
    TxManagerError::Persistence {
        key: key.to_string(),
        message: e.to_string(),
    }
}
