//! File system configuration.

use crate::error::FsError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming a JSON configuration file.
pub const CONFIG_ENV: &str = "STREAMFS_CONFIG";

/// What closing a write stream that never received a byte does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyWrite {
    /// Nothing is stored.
    #[default]
    Skip,
    /// A zero-length object is stored.
    Create,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSystemConfig {
    /// Bound on every network call, in seconds.
    pub io_timeout_secs: u64,
    /// Lifetime of pre-signed URLs, in seconds.
    pub presign_ttl_secs: u64,
    /// Keys requested per listing page.
    pub list_limit: usize,
    /// Chunks buffered between a writer and its upload before writes block.
    pub pipe_capacity: usize,
    pub empty_write: EmptyWrite,
}

impl Default for FileSystemConfig {
    fn default() -> Self {
        Self {
            io_timeout_secs: 120,
            presign_ttl_secs: 300,
            list_limit: 1000,
            pipe_capacity: 16,
            empty_write: EmptyWrite::Skip,
        }
    }
}

impl FileSystemConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FsError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            FsError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            FsError::Configuration(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<(), FsError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| FsError::Configuration(e.to_string()))?;
        fs::write(path, content).map_err(|e| FsError::Configuration(e.to_string()))
    }

    pub fn from_env_or_default() -> Result<Self, FsError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_path(path),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), FsError> {
        if self.io_timeout_secs == 0 {
            return Err(FsError::Configuration("io_timeout_secs must be positive".into()));
        }
        if self.list_limit == 0 {
            return Err(FsError::Configuration("list_limit must be positive".into()));
        }
        if self.pipe_capacity == 0 {
            return Err(FsError::Configuration("pipe_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.presign_ttl_secs)
    }
}
