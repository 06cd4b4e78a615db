//! Local filesystem object store.
//!
//! Mirrors the S3 store's key layout on a directory tree. Unlike the S3
//! backend it consumes the spooled stream while the background copy is
//! still running, reading up to the spool's current tail and waiting for
//! more.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::{ObjectStore, StoreError};
use crate::spool::SpooledStream;

pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|err| {
            StoreError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                root.display(),
                err
            ))
        })?;
        Ok(Self { root })
    }

    /// Map a storage key onto the root directory, rejecting traversal.
    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() || key.starts_with('/') || key.split('/').any(|part| part == "..") {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, key: &str, mut source: SpooledStream) -> Result<u64, StoreError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&path).await?;
        let bytes = match tokio::io::copy(&mut source, &mut file).await {
            Ok(bytes) => bytes,
            Err(err) => {
                // Do not leave a short object behind.
                let _ = fs::remove_file(&path).await;
                return Err(StoreError::IoError(err));
            }
        };
        file.flush().await?;

        debug!(key = %key, bytes, path = %path.display(), "stored object");
        Ok(bytes)
    }

    async fn get(
        &self,
        key: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, StoreError> {
        let path = self.resolve(key)?;
        let mut file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()))
            }
            Err(err) => return Err(StoreError::IoError(err)),
        };
        let bytes = tokio::io::copy(&mut file, sink).await?;
        Ok(bytes)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(err) => Err(StoreError::IoError(err)),
        }
    }

    fn endpoint(&self) -> String {
        self.root.display().to_string()
    }

    fn download_url_prefix(&self) -> String {
        format!("file://{}", self.root.display())
    }
}
