// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: configuration, startup, shutdown.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tether_adapters::{RedisStore, TracedStore};
use tether_core::store::{CoordinationStore, StoreError};
use tether_core::{ConfigError, MaintenanceReport, MaintenanceTask, TetherConfig};
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

/// Store used by the daemon: Redis with per-call tracing
pub type DaemonStore = TracedStore<RedisStore>;

/// `[daemon]` section of the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    /// Redis connection URL
    pub redis_url: String,
    /// Queues swept for stale and old completed tasks
    pub queues: Vec<String>,
    /// Log file; logs go to stderr when unset
    pub log_path: Option<PathBuf>,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            queues: Vec::new(),
            log_path: None,
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub tether: TetherConfig,
    #[serde(default)]
    pub daemon: DaemonSection,
}

impl Config {
    /// Parse and validate a TOML document
    pub fn parse(content: &str) -> Result<Self, LifecycleError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::from)?;
        config.tether.validate()?;
        if config.daemon.redis_url.is_empty() {
            return Err(ConfigError::Invalid("daemon.redis_url must not be empty".into()).into());
        }
        if let Some(dup) = first_duplicate(&config.daemon.queues) {
            return Err(ConfigError::Invalid(format!("queue {} listed twice", dup)).into());
        }
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, LifecycleError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Render the effective configuration, defaults filled in
    pub fn render(&self) -> Result<String, LifecycleError> {
        toml::to_string_pretty(self).map_err(|e| LifecycleError::Render(e.to_string()))
    }
}

fn first_duplicate(names: &[String]) -> Option<&str> {
    names
        .iter()
        .enumerate()
        .find(|&(i, name)| names[..i].contains(name))
        .map(|(_, name)| name.as_str())
}

/// Daemon state during operation
pub struct Daemon {
    pub maintenance: MaintenanceTask<DaemonStore>,
    /// When daemon started
    pub start_time: Instant,
}

impl Daemon {
    /// Sweep until `shutdown` turns true
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> MaintenanceReport {
        self.maintenance.run(shutdown).await
    }

    pub fn shutdown(&self, total: &MaintenanceReport) {
        info!(
            uptime_secs = self.start_time.elapsed().as_secs(),
            recovered = total.recovered,
            purged = total.purged,
            locks_cleaned = total.locks_cleaned,
            "daemon shutdown complete"
        );
    }
}

/// Connect to the store and assemble the maintenance sweep
pub async fn startup(config: &Config) -> Result<Daemon, LifecycleError> {
    let store = TracedStore::new(RedisStore::connect(&config.daemon.redis_url).await?);
    store.ping().await?;

    let queues = config
        .daemon
        .queues
        .iter()
        .map(|name| config.tether.task_queue(store.clone(), name))
        .collect();
    let locks = config.tether.lock_manager(store);
    let maintenance = MaintenanceTask::new(config.tether.maintenance.clone(), queues, locks);

    info!(
        key_prefix = %config.tether.key_prefix,
        queues = ?maintenance.queue_names(),
        interval = ?maintenance.interval(),
        "maintenance configured"
    );

    Ok(Daemon {
        maintenance,
        start_time: Instant::now(),
    })
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("Could not determine log directory for {}", .0.display())]
    NoLogDir(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to render configuration: {0}")]
    Render(String),
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
