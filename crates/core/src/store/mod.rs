// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordination store port
//!
//! Every primitive in this crate talks to the shared store through
//! [`CoordinationStore`]. Operations that must be atomic across processes
//! (compare-and-act, versioned writes) are single trait methods so that an
//! implementation can back them with one server-side call.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Errors from coordination store operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("wrong type for key {0}")]
    WrongType(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    Missing,
    /// Key exists and never expires
    Persistent,
    Expires(Duration),
}

/// A live subscription to one channel
///
/// Dropping the subscription unsubscribes; for network stores the
/// forwarding task is aborted.
pub struct Subscription {
    channel: String,
    rx: mpsc::UnboundedReceiver<String>,
    forwarder: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            channel: channel.into(),
            rx,
            forwarder: None,
        }
    }

    /// Subscription fed by a background task that is aborted on drop
    pub fn with_forwarder(
        channel: impl Into<String>,
        rx: mpsc::UnboundedReceiver<String>,
        forwarder: JoinHandle<()>,
    ) -> Self {
        Self {
            channel: channel.into(),
            rx,
            forwarder: Some(forwarder),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait at most `timeout` for the next message.
    ///
    /// `Ok(None)` means the timeout elapsed; an error means the channel was
    /// closed by the store.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<String>, StoreError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(StoreError::Unavailable(format!(
                "subscription to {} closed",
                self.channel
            ))),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handle) = self.forwarder.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// Shared key-value store with TTLs, hashes, sorted sets and pub/sub
#[async_trait]
pub trait CoordinationStore: Clone + Send + Sync + 'static {
    /// Round trip to check the store is reachable
    async fn ping(&self) -> Result<(), StoreError>;

    /// Set `key` to `value` with an expiry, only if the key is absent
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Delete `key` only if it currently holds `expected`
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Reset the expiry of `key` only if it currently holds `expected`
    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// All keys starting with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    /// Write `field` in `values` and bump its counter in `versions`, atomically.
    /// Returns the new version.
    async fn hset_versioned(
        &self,
        values: &str,
        versions: &str,
        field: &str,
        value: &str,
    ) -> Result<u64, StoreError>;

    /// Increment `field` in `values` and bump its version, atomically.
    /// Returns `(new value, new version)`.
    async fn hincr_versioned(
        &self,
        values: &str,
        versions: &str,
        field: &str,
        delta: i64,
    ) -> Result<(i64, u64), StoreError>;

    /// Remove `field` from `values` and bump its version, atomically.
    /// Returns the tombstone version.
    async fn hdel_versioned(&self, values: &str, versions: &str, field: &str)
        -> Result<u64, StoreError>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;

    /// Remove and return the member with the highest score
    async fn zpop_max(&self, key: &str) -> Result<Option<(String, f64)>, StoreError>;

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn zcard(&self, key: &str) -> Result<usize, StoreError>;

    /// Members with `min <= score <= max`, lowest score first
    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>, StoreError>;

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError>;

    /// Publish to a channel; returns the number of receivers
    async fn publish(&self, channel: &str, message: &str) -> Result<usize, StoreError>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError>;
}
