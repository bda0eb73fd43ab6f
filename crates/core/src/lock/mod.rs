// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mutual exclusion over named resources
//!
//! A lock is a single key in the coordination store holding the random token
//! of its current holder. Ownership is proven by that token: release and
//! extend are compare-and-act calls, so a holder whose lock expired and was
//! taken over by someone else can never remove or prolong the new lock.

mod distributed;
mod manager;

pub use distributed::{DistributedLock, LockGuard, LockInfo, LockOwner};
pub use manager::LockManager;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors from scoped lock use
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("could not acquire lock {0}")]
    NotAcquired(String),
}

/// Lock configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Expiry of the lock key; the safety net against a crashed holder
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Attempts made by a blocking acquire
    pub retry_count: u32,
    /// Pause between blocking attempts
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            retry_count: 10,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl LockConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

/// Store key for a named lock
pub fn lock_key(key_prefix: &str, name: &str) -> String {
    format!("{}{}", lock_key_prefix(key_prefix), name)
}

/// Prefix shared by every lock key
pub fn lock_key_prefix(key_prefix: &str) -> String {
    format!("{}:lock:", key_prefix)
}
