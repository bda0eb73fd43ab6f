// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry of replicated namespaces for one process

use super::{StateSync, SyncConfig};
use crate::clock::{Clock, SystemClock};
use crate::id::{IdGen, UuidIdGen};
use crate::store::CoordinationStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Hands out one [`StateSync`] per namespace, optionally started
pub struct StateSyncManager<S, C = SystemClock, I = UuidIdGen> {
    store: S,
    clock: C,
    id_gen: I,
    key_prefix: String,
    config: SyncConfig,
    // Held across `start` so two callers never race to create a namespace
    syncs: Arc<Mutex<HashMap<String, StateSync<S, C, I>>>>,
}

impl<S: Clone, C: Clone, I: Clone> Clone for StateSyncManager<S, C, I> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
            id_gen: self.id_gen.clone(),
            key_prefix: self.key_prefix.clone(),
            config: self.config.clone(),
            syncs: Arc::clone(&self.syncs),
        }
    }
}

impl<S: CoordinationStore> StateSyncManager<S> {
    pub fn new(store: S, key_prefix: impl Into<String>, config: SyncConfig) -> Self {
        Self::with_deps(store, SystemClock, UuidIdGen, key_prefix, config)
    }
}

impl<S: CoordinationStore, C: Clock, I: IdGen> StateSyncManager<S, C, I> {
    pub fn with_deps(
        store: S,
        clock: C,
        id_gen: I,
        key_prefix: impl Into<String>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            clock,
            id_gen,
            key_prefix: key_prefix.into(),
            config,
            syncs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get or create the namespace; new ones are started when `auto_start`
    /// is set
    pub async fn get(&self, namespace: &str) -> StateSync<S, C, I> {
        let mut syncs = self.syncs.lock().await;
        if let Some(sync) = syncs.get(namespace) {
            return sync.clone();
        }

        let sync = StateSync::with_deps(
            self.store.clone(),
            self.clock.clone(),
            self.id_gen.clone(),
            &self.key_prefix,
            namespace,
            self.config.clone(),
        );
        if self.config.auto_start && !sync.start().await {
            tracing::warn!(namespace, "namespace created without listener");
        }
        syncs.insert(namespace.to_string(), sync.clone());
        sync
    }

    /// Namespaces created so far, sorted
    pub async fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.syncs.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop and forget one namespace
    pub async fn remove(&self, namespace: &str) -> bool {
        let removed = self.syncs.lock().await.remove(namespace);
        match removed {
            Some(sync) => {
                sync.stop().await;
                true
            }
            None => false,
        }
    }

    /// Stop every namespace's listener
    pub async fn stop_all(&self) {
        let syncs: Vec<StateSync<S, C, I>> = self.syncs.lock().await.values().cloned().collect();
        for sync in syncs {
            sync.stop().await;
        }
        tracing::debug!("stopped all state syncs");
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
