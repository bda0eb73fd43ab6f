// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TOML configuration
//!
//! ```toml
//! key_prefix = "tether"
//!
//! [lock]
//! ttl = "30s"
//! retry_count = 10
//! retry_delay = "100ms"
//!
//! [queue]
//! visibility_timeout = "5m"
//! max_retries = 3
//! poll_interval = "100ms"
//! max_backoff = "1h"
//!
//! [sync]
//! ttl = "7d"
//! poll_interval = "100ms"
//! auto_start = true
//!
//! [maintenance]
//! interval = "30s"
//! completed_retention = "1day"
//! ```
//!
//! Every section and field is optional.

use crate::lock::{lock_key_prefix, LockConfig, LockManager};
use crate::maintenance::MaintenanceConfig;
use crate::queue::{QueueConfig, TaskQueue};
use crate::store::CoordinationStore;
use crate::sync::{StateSyncManager, SyncConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for all coordination primitives
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Namespace prepended to every store key
    pub key_prefix: String,
    pub lock: LockConfig,
    pub queue: QueueConfig,
    pub sync: SyncConfig,
    pub maintenance: MaintenanceConfig,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            key_prefix: "tether".to_string(),
            lock: LockConfig::default(),
            queue: QueueConfig::default(),
            sync: SyncConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

impl TetherConfig {
    /// Parse and validate a TOML document
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Reject settings the primitives cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_prefix.is_empty() {
            return Err(ConfigError::Invalid("key_prefix must not be empty".into()));
        }
        let positive = [
            ("lock.ttl", self.lock.ttl),
            ("queue.poll_interval", self.queue.poll_interval),
            ("sync.poll_interval", self.sync.poll_interval),
            ("maintenance.interval", self.maintenance.interval),
        ];
        for (name, value) in positive {
            if value == Duration::ZERO {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        if self.queue.visibility_timeout < Duration::from_secs(1) {
            return Err(ConfigError::Invalid(
                "queue.visibility_timeout must be at least 1s".into(),
            ));
        }
        if self.lock.retry_count == 0 {
            return Err(ConfigError::Invalid(
                "lock.retry_count must be at least 1".into(),
            ));
        }
        if let Some(prefix) = &self.maintenance.lock_prefix {
            let lock_prefix = lock_key_prefix(&self.key_prefix);
            if !prefix.starts_with(&lock_prefix) {
                return Err(ConfigError::Invalid(format!(
                    "maintenance.lock_prefix must start with {:?}",
                    lock_prefix
                )));
            }
        }
        Ok(())
    }

    pub fn lock_manager<S: CoordinationStore>(&self, store: S) -> LockManager<S> {
        LockManager::new(store, self.key_prefix.clone(), self.lock.clone())
    }

    pub fn task_queue<S: CoordinationStore>(&self, store: S, name: &str) -> TaskQueue<S> {
        TaskQueue::new(store, &self.key_prefix, name, self.queue.clone())
    }

    pub fn sync_manager<S: CoordinationStore>(&self, store: S) -> StateSyncManager<S> {
        StateSyncManager::new(store, self.key_prefix.clone(), self.sync.clone())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
