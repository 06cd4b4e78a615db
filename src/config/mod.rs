//! Configuration module
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation, plus an atomically
//! swappable snapshot handle so the configuration can be reloaded at
//! runtime without restarting the gateway.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Hard cap applied to a request body before multipart parsing: the
    /// largest size any group or the default policy may accept.
    pub fn max_body_size(&self) -> u64 {
        self.upload
            .groups
            .iter()
            .map(|group| group.max_upload_size)
            .chain(std::iter::once(self.upload.defaults.max_upload_size))
            .max()
            .unwrap_or(0)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_http_url(&self.upload.base_url) {
            return Err(ConfigError::ValidationError(
                "upload.base_url must start with http:// or https://".into(),
            ));
        }
        if self.upload.groups.is_empty() && !self.upload.defaults.allow_any_mime_type {
            return Err(ConfigError::ValidationError(
                "at least one upload group must be configured unless the default policy allows any mime type".into(),
            ));
        }
        for group in &self.upload.groups {
            if group.mime_types.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Group '{}' has empty mime_types",
                    group.name
                )));
            }
            if group.folder.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Group '{}' has empty folder",
                    group.name
                )));
            }
            if group.max_upload_size == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Group '{}' has zero max_upload_size",
                    group.name
                )));
            }
        }
        if self.upload.defaults.allow_any_mime_type {
            if self.upload.defaults.folder.is_empty() {
                return Err(ConfigError::ValidationError(
                    "default policy has empty folder".into(),
                ));
            }
            if self.upload.defaults.max_upload_size == 0 {
                return Err(ConfigError::ValidationError(
                    "default policy has zero max_upload_size".into(),
                ));
            }
        }
        match self.storage.backend {
            StorageBackend::S3 if self.storage.s3.is_none() => {
                return Err(ConfigError::ValidationError(
                    "storage.backend is 's3' but the s3 section is missing".into(),
                ));
            }
            StorageBackend::Local if self.storage.local.is_none() => {
                return Err(ConfigError::ValidationError(
                    "storage.backend is 'local' but the local section is missing".into(),
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
}

/// Upload policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Public download prefix returned in upload responses.
    pub base_url: String,
    /// In-memory buffering threshold for non-file multipart fields.
    #[serde(default = "default_max_memory_size")]
    pub max_memory_size: u64,
    /// Ordered upload groups; declaration order breaks ties.
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    #[serde(default)]
    pub defaults: DefaultPolicyConfig,
}

fn default_max_memory_size() -> u64 {
    1048576 // 1MB
}

/// One upload group: accepted MIME types, size ceiling, destination folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub mime_types: Vec<String>,
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    pub folder: String,
}

/// Fallback policy for uploads no group accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultPolicyConfig {
    #[serde(default)]
    pub allow_any_mime_type: bool,
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    #[serde(default)]
    pub folder: String,
}

impl Default for DefaultPolicyConfig {
    fn default() -> Self {
        Self {
            allow_any_mime_type: false,
            max_upload_size: default_max_upload_size(),
            folder: String::new(),
        }
    }
}

fn default_max_upload_size() -> u64 {
    33554432 // 32MB
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub s3: Option<S3Config>,
    #[serde(default)]
    pub local: Option<LocalConfig>,
}

/// Which object store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    S3,
    Local,
}

/// S3 backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub acl: Option<String>,
}

/// Local filesystem backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    pub root: PathBuf,
}

/// Atomically swappable configuration snapshot.
///
/// `current` hands out the active snapshot as one unit; `replace` installs
/// a new one. In-flight requests keep the snapshot they started with, so a
/// reload never exposes a partially updated configuration.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// The active configuration snapshot.
    pub fn current(&self) -> Arc<Config> {
        Arc::clone(&self.inner.read())
    }

    /// Install a new snapshot.
    pub fn replace(&self, config: Config) {
        *self.inner.write() = Arc::new(config);
    }

    /// Re-load from `path` and swap the snapshot. On failure the previous
    /// snapshot stays in place.
    pub fn reload_from<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let config = Config::load(path)?;
        self.replace(config);
        Ok(())
    }
}

/// Reload the configuration on SIGHUP, for restart-free config changes.
#[cfg(unix)]
pub fn spawn_reload_on_sighup(handle: ConfigHandle, path: PathBuf) -> tokio::task::JoinHandle<()> {
    use tracing::{error, info};

    tokio::spawn(async move {
        let mut hangup =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                Ok(signal) => signal,
                Err(err) => {
                    error!(error = %err, "Failed to install SIGHUP handler");
                    return;
                }
            };
        while hangup.recv().await.is_some() {
            match handle.reload_from(&path) {
                Ok(()) => info!(path = %path.display(), "Configuration reloaded"),
                Err(err) => {
                    error!(error = %err, "Configuration reload failed, keeping previous snapshot")
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            server: ServerConfig {
                address: "127.0.0.1:0".into(),
            },
            upload: UploadConfig {
                base_url: "http://localhost:8080/files".into(),
                max_memory_size: 1024,
                groups: vec![GroupConfig {
                    name: "images".into(),
                    mime_types: vec!["image/png".into()],
                    max_upload_size: 1048576,
                    folder: "images".into(),
                }],
                defaults: DefaultPolicyConfig::default(),
            },
            storage: StorageConfig {
                backend: StorageBackend::Local,
                s3: None,
                local: Some(LocalConfig {
                    root: PathBuf::from("/tmp/spoolgate"),
                }),
            },
        }
    }

    #[test]
    fn max_body_size_covers_largest_policy() {
        let mut config = test_config();
        config.upload.groups.push(GroupConfig {
            name: "videos".into(),
            mime_types: vec!["video/mp4".into()],
            max_upload_size: 8388608,
            folder: "videos".into(),
        });
        config.upload.defaults.max_upload_size = 2048;
        assert_eq!(config.max_body_size(), 8388608);

        config.upload.defaults.max_upload_size = 16777216;
        assert_eq!(config.max_body_size(), 16777216);
    }

    #[test]
    fn validation_rejects_bad_base_url() {
        let mut config = test_config();
        config.upload.base_url = "ftp://example.com".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_empty_groups_without_default() {
        let mut config = test_config();
        config.upload.groups.clear();
        assert!(config.validate().is_err());

        config.upload.defaults.allow_any_mime_type = true;
        config.upload.defaults.folder = "other".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_requires_backend_section() {
        let mut config = test_config();
        config.storage.local = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn handle_swaps_whole_snapshots() {
        let handle = ConfigHandle::new(test_config());
        let before = handle.current();

        let mut updated = test_config();
        updated.upload.base_url = "http://cdn.example.com/files".into();
        handle.replace(updated);

        // The earlier snapshot is untouched; new readers see the new one.
        assert_eq!(before.upload.base_url, "http://localhost:8080/files");
        assert_eq!(
            handle.current().upload.base_url,
            "http://cdn.example.com/files"
        );
    }
}
