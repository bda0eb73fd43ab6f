// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replicated key-value state over pub/sub
//!
//! Each namespace lives in two store hashes (values as JSON, per-key version
//! counters) and one channel. Every local write bumps the key's version
//! atomically in the store and publishes a [`StateUpdate`]; replicas apply an
//! update only if its version is newer than what they hold, so duplicated
//! or reordered delivery converges to the same state.

mod manager;
mod state_sync;
mod update;

pub use manager::StateSyncManager;
pub use state_sync::StateSync;
pub use update::{HandlerError, StateUpdate, UpdateHandler};

use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors from state operations that report them
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// State sync configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Expiry applied to a namespace's hashes after every write
    #[serde(with = "humantime_serde")]
    pub ttl: Option<Duration>,
    /// Upper bound on how long the listener waits before rechecking for stop
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Start namespaces as soon as the manager creates them
    pub auto_start: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ttl: None,
            poll_interval: Duration::from_millis(100),
            auto_start: true,
        }
    }
}

impl SyncConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }
}

/// Store keys and channel of one namespace
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncKeys {
    pub values: String,
    pub versions: String,
    pub channel: String,
}

impl SyncKeys {
    pub fn new(key_prefix: &str, namespace: &str) -> Self {
        let values = format!("{}:state:{}", key_prefix, namespace);
        Self {
            versions: format!("{}:versions", values),
            channel: format!("{}:updates", values),
            values,
        }
    }
}
