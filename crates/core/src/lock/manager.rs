// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry of named locks for one process

use super::{DistributedLock, LockConfig, LockInfo};
use crate::clock::{Clock, SystemClock};
use crate::id::{IdGen, UuidIdGen};
use crate::store::{CoordinationStore, KeyTtl};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Hands out one [`DistributedLock`] per name
///
/// Asking twice for the same name returns handles to the same lock, so a
/// process never holds two independent views of one resource.
pub struct LockManager<S, C = SystemClock, I = UuidIdGen> {
    store: S,
    clock: C,
    id_gen: I,
    key_prefix: String,
    config: LockConfig,
    locks: Arc<Mutex<HashMap<String, DistributedLock<S, C, I>>>>,
}

impl<S: Clone, C: Clone, I: Clone> Clone for LockManager<S, C, I> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
            id_gen: self.id_gen.clone(),
            key_prefix: self.key_prefix.clone(),
            config: self.config.clone(),
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<S: CoordinationStore> LockManager<S> {
    pub fn new(store: S, key_prefix: impl Into<String>, config: LockConfig) -> Self {
        Self::with_deps(store, SystemClock, UuidIdGen, key_prefix, config)
    }
}

impl<S: CoordinationStore, C: Clock, I: IdGen> LockManager<S, C, I> {
    pub fn with_deps(
        store: S,
        clock: C,
        id_gen: I,
        key_prefix: impl Into<String>,
        config: LockConfig,
    ) -> Self {
        Self {
            store,
            clock,
            id_gen,
            key_prefix: key_prefix.into(),
            config,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn locks(&self) -> std::sync::MutexGuard<'_, HashMap<String, DistributedLock<S, C, I>>> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get or create the lock for `name` with the manager's default config
    pub fn get(&self, name: &str) -> DistributedLock<S, C, I> {
        self.get_with_config(name, self.config.clone())
    }

    /// Get or create the lock for `name`; `config` only applies on creation
    pub fn get_with_config(&self, name: &str, config: LockConfig) -> DistributedLock<S, C, I> {
        self.locks()
            .entry(name.to_string())
            .or_insert_with(|| {
                DistributedLock::with_deps(
                    self.store.clone(),
                    self.clock.clone(),
                    self.id_gen.clone(),
                    &self.key_prefix,
                    name,
                    config,
                )
            })
            .clone()
    }

    /// Forget a cached lock. A held lock stays held until released or expired.
    pub fn remove(&self, name: &str) -> bool {
        self.locks().remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.locks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks().is_empty()
    }

    /// Prefix of every lock key this manager writes
    pub fn key_prefix(&self) -> String {
        super::lock_key_prefix(&self.key_prefix)
    }

    fn snapshot(&self) -> Vec<DistributedLock<S, C, I>> {
        self.locks().values().cloned().collect()
    }

    /// Release every lock this process holds; returns how many were released
    pub async fn release_all(&self) -> usize {
        let mut released = 0;
        for lock in self.snapshot() {
            if lock.is_locked() && lock.release().await {
                released += 1;
            }
        }
        tracing::debug!(released, "released all locks");
        released
    }

    /// Store view of every cached lock that currently has a holder
    pub async fn all_locks_info(&self) -> BTreeMap<String, LockInfo> {
        let mut infos = BTreeMap::new();
        for lock in self.snapshot() {
            if let Some(info) = lock.lock_info().await {
                infos.insert(lock.name().to_string(), info);
            }
        }
        infos
    }

    /// Delete keys under `prefix` that have no expiry.
    ///
    /// Lock keys are always written with a TTL, so a persistent one was left
    /// by a broken writer. Best effort: a key rewritten between the TTL
    /// check and the delete can be lost.
    pub async fn cleanup_expired_locks(&self, prefix: &str) -> usize {
        let keys = match self.store.scan_prefix(prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(prefix, error = %e, "lock cleanup scan failed");
                return 0;
            }
        };

        let mut cleaned = 0;
        for key in keys {
            match self.store.ttl(&key).await {
                Ok(KeyTtl::Persistent) => match self.store.delete(&key).await {
                    Ok(true) => {
                        tracing::info!(key = %key, "removed lock without expiry");
                        cleaned += 1;
                    }
                    Ok(false) => {}
                    Err(e) => tracing::warn!(key = %key, error = %e, "lock cleanup delete failed"),
                },
                Ok(_) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "lock cleanup ttl failed"),
            }
        }
        cleaned
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
