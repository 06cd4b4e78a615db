//! Object storage backends
//!
//! [`ObjectStore`] is the capability the upload pipeline hands its spooled
//! stream to. Backends are selected from configuration: S3-compatible
//! storage for production, the local filesystem for development and tests.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWrite;

use crate::config::{Config, StorageBackend};
use crate::spool::SpooledStream;

mod local;
mod s3;

pub use local::LocalStore;
pub use s3::S3Store;

/// Storage operation errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Storage capability consumed by the upload orchestrator.
///
/// The spooled stream handed to `put` is seekable and re-readable, so a
/// backend may rewind it (request signing, length probing) without touching
/// the origin of the bytes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write the spooled stream under `key`; returns the bytes written.
    async fn put(&self, key: &str, source: SpooledStream) -> Result<u64, StoreError>;

    /// Stream the object at `key` into `sink`; returns the bytes read.
    async fn get(
        &self,
        key: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, StoreError>;

    /// Remove the object at `key`.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Base endpoint this store talks to.
    fn endpoint(&self) -> String;

    /// Public prefix under which stored keys can be fetched.
    fn download_url_prefix(&self) -> String;
}

/// Build the configured storage backend.
pub async fn from_config(config: &Config) -> Result<Arc<dyn ObjectStore>, StoreError> {
    match config.storage.backend {
        StorageBackend::S3 => {
            let s3 = config.storage.s3.as_ref().ok_or_else(|| {
                StoreError::ConfigError("storage.backend is 's3' but the s3 section is missing".into())
            })?;
            Ok(Arc::new(S3Store::new(s3).await?))
        }
        StorageBackend::Local => {
            let local = config.storage.local.as_ref().ok_or_else(|| {
                StoreError::ConfigError(
                    "storage.backend is 'local' but the local section is missing".into(),
                )
            })?;
            Ok(Arc::new(LocalStore::new(local.root.clone()).await?))
        }
    }
}
