//! Configuration
//!
//! `ProvenanceConfig` selects the storage backend and tunes the
//! orchestrator and the remote sync. It can be built in code (all fields
//! have defaults), read from a JSON file, or overridden from `TRAILGRAPH_*`
//! environment variables:
//!
//! | variable                      | field                              |
//! |-------------------------------|------------------------------------|
//! | `TRAILGRAPH_APPLICATION`      | `application`                      |
//! | `TRAILGRAPH_USER`             | `user`                             |
//! | `TRAILGRAPH_BACKEND`          | `backend` (`memory`/`local`/`remote`) |
//! | `TRAILGRAPH_STORAGE_DIR`      | local backend directory            |
//! | `TRAILGRAPH_PREFIX`           | local backend key prefix           |
//! | `TRAILGRAPH_REMOTE_URL`       | remote backend endpoint            |
//! | `TRAILGRAPH_BATCH_SIZE`       | `remote_sync.batch_size`           |
//! | `TRAILGRAPH_EARLY_FLUSH_MS`   | `remote_sync.early_flush_delay_ms` |
//! | `TRAILGRAPH_FULL_FLUSH_MS`    | `remote_sync.full_flush_delay_ms`  |
//! | `TRAILGRAPH_DEDUP_WINDOW_MS`  | `execute_current_action_within_ms` |

use crate::db::{FileStorage, GraphError, KeyValueStorage, MemoryStorage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_APPLICATION: &str = "trailgraph";
pub const DEFAULT_PREFIX: &str = "tg";
pub const DEFAULT_DATASET_CACHE_CAPACITY: usize = 16;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {var}")]
    InvalidValue { var: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to open storage: {0}")]
    Storage(#[from] GraphError),
}

impl ConfigError {
    pub fn invalid_value(var: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            var: var.into(),
            value: value.into(),
        }
    }
}

/// Batching tunables of the remote backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSyncConfig {
    /// Flush as soon as this many mutations are queued
    pub batch_size: usize,
    /// Flush after this long without a new mutation
    pub early_flush_delay_ms: u64,
    /// Never let a mutation wait longer than this
    pub full_flush_delay_ms: u64,
}

impl Default for RemoteSyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            early_flush_delay_ms: 100,
            full_flush_delay_ms: 2000,
        }
    }
}

impl RemoteSyncConfig {
    pub fn early_flush_delay(&self) -> Duration {
        Duration::from_millis(self.early_flush_delay_ms)
    }

    pub fn full_flush_delay(&self) -> Duration {
        Duration::from_millis(self.full_flush_delay_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".to_string());
        }
        if self.early_flush_delay_ms > self.full_flush_delay_ms {
            return Err(format!(
                "early_flush_delay_ms ({}) cannot exceed full_flush_delay_ms ({})",
                self.early_flush_delay_ms, self.full_flush_delay_ms
            ));
        }
        Ok(())
    }
}

/// Key-value storage used by the local backend
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-process, lost on exit
    #[default]
    Session,
    /// One file per key; `None` resolves to `~/.trailgraph/storage`
    Directory {
        #[serde(default)]
        path: Option<PathBuf>,
    },
}

impl StorageConfig {
    pub fn resolve_path(&self) -> Result<Option<PathBuf>, std::io::Error> {
        match self {
            StorageConfig::Session => Ok(None),
            StorageConfig::Directory { path: Some(path) } => Ok(Some(path.clone())),
            StorageConfig::Directory { path: None } => {
                let home_dir = dirs::home_dir().ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "Cannot determine home directory",
                    )
                })?;
                Ok(Some(home_dir.join(".trailgraph").join("storage")))
            }
        }
    }

    pub fn open(&self) -> Result<Arc<dyn KeyValueStorage>, ConfigError> {
        match self.resolve_path() {
            Ok(None) => Ok(Arc::new(MemoryStorage::new())),
            Ok(Some(path)) => {
                tracing::info!("Using file storage at {}", path.display());
                Ok(Arc::new(FileStorage::open(path)?))
            }
            Err(source) => Err(ConfigError::Io {
                path: PathBuf::from("~/.trailgraph/storage"),
                source,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Memory,
    Local {
        #[serde(default)]
        storage: StorageConfig,
        #[serde(default = "default_prefix")]
        prefix: String,
    },
    Remote {
        endpoint: String,
    },
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Local {
            storage: StorageConfig::default(),
            prefix: default_prefix(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvenanceConfig {
    /// Application name stored in graph descriptions (`attrs.of`)
    pub application: String,
    /// Recorded as creator of graphs and user of actions
    pub user: String,
    /// Idempotence window for repeated pushes, also the commands' time budget
    pub execute_current_action_within_ms: Option<u64>,
    pub backend: BackendConfig,
    pub remote_sync: RemoteSyncConfig,
    pub dataset_cache_capacity: usize,
}

impl Default for ProvenanceConfig {
    fn default() -> Self {
        Self {
            application: DEFAULT_APPLICATION.to_string(),
            user: "anonymous".to_string(),
            execute_current_action_within_ms: None,
            backend: BackendConfig::default(),
            remote_sync: RemoteSyncConfig::default(),
            dataset_cache_capacity: DEFAULT_DATASET_CACHE_CAPACITY,
        }
    }
}

impl ProvenanceConfig {
    pub fn execute_current_action_within(&self) -> Option<Duration> {
        self.execute_current_action_within_ms
            .map(Duration::from_millis)
    }

    /// Reads a JSON config file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Defaults overridden by `TRAILGRAPH_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|var| std::env::var(var).ok())
    }

    /// Applies overrides from a variable lookup
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(application) = lookup("TRAILGRAPH_APPLICATION") {
            self.application = application;
        }
        if let Some(user) = lookup("TRAILGRAPH_USER") {
            self.user = user;
        }
        if let Some(window) = lookup("TRAILGRAPH_DEDUP_WINDOW_MS") {
            self.execute_current_action_within_ms =
                Some(parse_var("TRAILGRAPH_DEDUP_WINDOW_MS", &window)?);
        }

        if let Some(kind) = lookup("TRAILGRAPH_BACKEND") {
            self.backend = match kind.to_ascii_lowercase().as_str() {
                "memory" => BackendConfig::Memory,
                "local" => BackendConfig::default(),
                "remote" => BackendConfig::Remote {
                    endpoint: String::new(),
                },
                _ => return Err(ConfigError::invalid_value("TRAILGRAPH_BACKEND", kind)),
            };
        }
        match &mut self.backend {
            BackendConfig::Local { storage, prefix } => {
                if let Some(dir) = lookup("TRAILGRAPH_STORAGE_DIR") {
                    *storage = StorageConfig::Directory {
                        path: Some(PathBuf::from(dir)),
                    };
                }
                if let Some(p) = lookup("TRAILGRAPH_PREFIX") {
                    *prefix = p;
                }
            }
            BackendConfig::Remote { endpoint } => {
                if let Some(url) = lookup("TRAILGRAPH_REMOTE_URL") {
                    *endpoint = url;
                }
            }
            BackendConfig::Memory => {}
        }

        if let Some(v) = lookup("TRAILGRAPH_BATCH_SIZE") {
            self.remote_sync.batch_size = parse_var("TRAILGRAPH_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("TRAILGRAPH_EARLY_FLUSH_MS") {
            self.remote_sync.early_flush_delay_ms = parse_var("TRAILGRAPH_EARLY_FLUSH_MS", &v)?;
        }
        if let Some(v) = lookup("TRAILGRAPH_FULL_FLUSH_MS") {
            self.remote_sync.full_flush_delay_ms = parse_var("TRAILGRAPH_FULL_FLUSH_MS", &v)?;
        }

        self.validate().map_err(ConfigError::Invalid)?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.application.is_empty() {
            return Err("application cannot be empty".to_string());
        }
        if self.dataset_cache_capacity == 0 {
            return Err("dataset_cache_capacity must be greater than 0".to_string());
        }
        match &self.backend {
            BackendConfig::Local { prefix, .. } if prefix.is_empty() => {
                return Err("local backend prefix cannot be empty".to_string());
            }
            BackendConfig::Remote { endpoint } if endpoint.is_empty() => {
                return Err("remote backend requires an endpoint".to_string());
            }
            _ => {}
        }
        self.remote_sync.validate()
    }
}

fn parse_var<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid_value(var, value))
}
