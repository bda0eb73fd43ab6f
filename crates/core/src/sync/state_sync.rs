// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One replicated namespace

use super::{StateUpdate, SyncConfig, SyncError, SyncKeys, UpdateHandler};
use crate::clock::{Clock, SystemClock};
use crate::id::{IdGen, UuidIdGen};
use crate::store::{CoordinationStore, Subscription};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

#[derive(Default)]
struct Cache {
    values: HashMap<String, Value>,
    /// Survives deletes, so a tombstone's version is remembered
    versions: HashMap<String, u64>,
}

impl Cache {
    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    /// Record `value` at `version` unless we already hold something newer.
    /// `None` records a deletion.
    fn remember(&mut self, key: &str, value: Option<Value>, version: u64) -> bool {
        if version < self.version(key) {
            return false;
        }
        self.versions.insert(key.to_string(), version);
        match value {
            Some(value) => self.values.insert(key.to_string(), value),
            None => self.values.remove(key),
        };
        true
    }
}

struct Listener {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner<S, C, I> {
    store: S,
    clock: C,
    id_gen: I,
    namespace: String,
    instance_id: String,
    keys: SyncKeys,
    config: SyncConfig,
    cache: RwLock<Cache>,
    handlers: RwLock<Vec<Arc<dyn UpdateHandler>>>,
    listener: Mutex<Option<Listener>>,
    running: AtomicBool,
}

impl<S, C, I> Inner<S, C, I> {
    fn cache(&self) -> std::sync::RwLockReadGuard<'_, Cache> {
        self.cache.read().unwrap_or_else(|e| e.into_inner())
    }

    fn cache_mut(&self) -> std::sync::RwLockWriteGuard<'_, Cache> {
        self.cache.write().unwrap_or_else(|e| e.into_inner())
    }

    fn apply(&self, update: &StateUpdate) -> bool {
        if update.origin_instance_id == self.instance_id {
            return false;
        }

        {
            let mut cache = self.cache_mut();
            let local = cache.version(&update.key);
            if update.version <= local {
                tracing::trace!(
                    namespace = %self.namespace,
                    key = %update.key,
                    version = update.version,
                    local,
                    "discarding stale update"
                );
                return false;
            }
            let value = (!update.is_tombstone()).then(|| update.value.clone());
            cache.remember(&update.key, value, update.version);
        }

        let handlers: Vec<Arc<dyn UpdateHandler>> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for (index, handler) in handlers.iter().enumerate() {
            match std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(update))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    namespace = %self.namespace,
                    key = %update.key,
                    handler = index,
                    error = %e,
                    "update handler failed"
                ),
                Err(_) => tracing::warn!(
                    namespace = %self.namespace,
                    key = %update.key,
                    handler = index,
                    "update handler panicked"
                ),
            }
        }
        true
    }
}

impl<S: CoordinationStore, C, I> Inner<S, C, I> {
    async fn load_snapshot(&self) -> Result<(), SyncError> {
        let versions = self.store.hgetall(&self.keys.versions).await?;
        let mut values = self.store.hgetall(&self.keys.values).await?;

        let mut cache = self.cache_mut();
        for (key, raw_version) in versions {
            let Ok(version) = raw_version.parse::<u64>() else {
                tracing::warn!(namespace = %self.namespace, key = %key, "bad version in snapshot");
                continue;
            };
            let value = match values.remove(&key) {
                Some(raw) => Some(serde_json::from_str(&raw)?),
                None => None,
            };
            if version > cache.version(&key) {
                cache.remember(&key, value, version);
            }
        }
        // Values written without a version counter
        for (key, raw) in values {
            if !cache.values.contains_key(&key) && cache.version(&key) == 0 {
                cache.values.insert(key, serde_json::from_str(&raw)?);
            }
        }
        tracing::debug!(
            namespace = %self.namespace,
            keys = cache.values.len(),
            "state snapshot loaded"
        );
        Ok(())
    }
}

/// Longest pause between attempts to re-establish a lost subscription
const RESUBSCRIBE_MAX_DELAY: Duration = Duration::from_secs(5);

async fn listen<S: CoordinationStore, C, I>(
    inner: Weak<Inner<S, C, I>>,
    mut subscription: Subscription,
    mut shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown.changed() => break,
            message = subscription.recv_timeout(poll_interval) => message,
        };
        match message {
            Ok(Some(raw)) => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                match serde_json::from_str::<StateUpdate>(&raw) {
                    Ok(update) => {
                        inner.apply(&update);
                    }
                    Err(e) => tracing::warn!(
                        namespace = %inner.namespace,
                        error = %e,
                        "malformed state update"
                    ),
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(channel = %subscription.channel(), error = %e, "state subscription lost");
                if let Some(inner) = inner.upgrade() {
                    inner.running.store(false, Ordering::SeqCst);
                }
                match resubscribe(&inner, &mut shutdown, poll_interval).await {
                    Some(fresh) => subscription = fresh,
                    None => break,
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }
    }
    if let Some(inner) = inner.upgrade() {
        inner.running.store(false, Ordering::SeqCst);
    }
}

/// Subscribe again with growing pauses, then reload the snapshot so writes
/// published while disconnected are not lost. `None` on shutdown.
async fn resubscribe<S: CoordinationStore, C, I>(
    inner: &Weak<Inner<S, C, I>>,
    shutdown: &mut watch::Receiver<bool>,
    poll_interval: Duration,
) -> Option<Subscription> {
    let mut delay = poll_interval;
    loop {
        tokio::select! {
            _ = shutdown.changed() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
        if *shutdown.borrow() {
            return None;
        }

        let inner = inner.upgrade()?;
        match inner.store.subscribe(&inner.keys.channel).await {
            Ok(subscription) => {
                if let Err(e) = inner.load_snapshot().await {
                    tracing::warn!(namespace = %inner.namespace, error = %e, "snapshot reload failed");
                }
                inner.running.store(true, Ordering::SeqCst);
                tracing::info!(namespace = %inner.namespace, "state subscription restored");
                return Some(subscription);
            }
            Err(e) => {
                tracing::warn!(namespace = %inner.namespace, error = %e, "resubscribe failed");
                delay = (delay * 2).min(RESUBSCRIBE_MAX_DELAY);
            }
        }
    }
}

/// Handle to a replicated namespace
///
/// Clones share the cache, handlers and listener.
pub struct StateSync<S, C = SystemClock, I = UuidIdGen> {
    inner: Arc<Inner<S, C, I>>,
}

impl<S, C, I> Clone for StateSync<S, C, I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: CoordinationStore> StateSync<S> {
    pub fn new(store: S, key_prefix: &str, namespace: impl Into<String>, config: SyncConfig) -> Self {
        Self::with_deps(store, SystemClock, UuidIdGen, key_prefix, namespace, config)
    }
}

impl<S: CoordinationStore, C: Clock, I: IdGen> StateSync<S, C, I> {
    /// The instance id is drawn from `id_gen`
    pub fn with_deps(
        store: S,
        clock: C,
        id_gen: I,
        key_prefix: &str,
        namespace: impl Into<String>,
        config: SyncConfig,
    ) -> Self {
        let namespace = namespace.into();
        let instance_id = id_gen.next();
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                id_gen,
                keys: SyncKeys::new(key_prefix, &namespace),
                namespace,
                instance_id,
                config,
                cache: RwLock::new(Cache::default()),
                handlers: RwLock::new(Vec::new()),
                listener: Mutex::new(None),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    pub fn keys(&self) -> &SyncKeys {
        &self.inner.keys
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Locally held version of `key`; 0 if never seen
    pub fn version(&self, key: &str) -> u64 {
        self.inner.cache().version(key)
    }

    /// Load the namespace snapshot and start listening for remote updates.
    ///
    /// Subscribes before loading so nothing published in between is missed;
    /// the version check makes the overlap harmless. Returns whether the
    /// listener is running.
    pub async fn start(&self) -> bool {
        let mut listener = self.inner.listener.lock().await;
        if let Some(current) = listener.as_ref() {
            if !current.handle.is_finished() {
                return true;
            }
            tracing::warn!(namespace = %self.inner.namespace, "restarting ended state listener");
        }

        let subscription = match self.inner.store.subscribe(&self.inner.keys.channel).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(namespace = %self.inner.namespace, error = %e, "subscribe failed");
                return false;
            }
        };
        if let Err(e) = self.inner.load_snapshot().await {
            tracing::warn!(namespace = %self.inner.namespace, error = %e, "snapshot load failed");
            return false;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(listen(
            Arc::downgrade(&self.inner),
            subscription,
            shutdown_rx,
            self.inner.config.poll_interval,
        ));
        *listener = Some(Listener { shutdown, handle });
        self.inner.running.store(true, Ordering::SeqCst);

        tracing::info!(
            namespace = %self.inner.namespace,
            instance_id = %self.inner.instance_id,
            "state sync started"
        );
        true
    }

    /// Stop the listener and wait for it to finish; no handler runs after
    /// this returns
    pub async fn stop(&self) {
        let mut listener = self.inner.listener.lock().await;
        let Some(Listener { shutdown, handle }) = listener.take() else {
            return;
        };
        let _ = shutdown.send(true);
        if let Err(e) = handle.await {
            tracing::warn!(namespace = %self.inner.namespace, error = %e, "state listener ended abnormally");
        }
        self.inner.running.store(false, Ordering::SeqCst);
        tracing::info!(namespace = %self.inner.namespace, "state sync stopped");
    }

    async fn publish(&self, key: &str, value: Value, version: u64, metadata: Map<String, Value>) {
        let update = StateUpdate {
            update_id: self.inner.id_gen.next(),
            origin_instance_id: self.inner.instance_id.clone(),
            key: key.to_string(),
            value,
            version,
            timestamp: self.inner.clock.now_millis() as f64 / 1000.0,
            metadata,
        };
        let result = match serde_json::to_string(&update) {
            Ok(payload) => self
                .inner
                .store
                .publish(&self.inner.keys.channel, &payload)
                .await
                .map_err(SyncError::from),
            Err(e) => Err(SyncError::from(e)),
        };
        match result {
            Ok(receivers) => tracing::debug!(
                namespace = %self.inner.namespace,
                key,
                version,
                receivers,
                "state update published"
            ),
            Err(e) => tracing::warn!(
                namespace = %self.inner.namespace,
                key,
                error = %e,
                "state update publish failed"
            ),
        }
    }

    async fn refresh_ttl(&self) {
        let Some(ttl) = self.inner.config.ttl else {
            return;
        };
        for key in [&self.inner.keys.values, &self.inner.keys.versions] {
            if let Err(e) = self.inner.store.expire(key, ttl).await {
                tracing::warn!(namespace = %self.inner.namespace, error = %e, "ttl refresh failed");
            }
        }
    }

    /// Write `key` at the next version and broadcast it
    pub async fn set(&self, key: &str, value: Value, metadata: Option<Map<String, Value>>) -> bool {
        let raw = match serde_json::to_string(&value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(namespace = %self.inner.namespace, key, error = %e, "state encode failed");
                return false;
            }
        };
        let version = match self
            .inner
            .store
            .hset_versioned(&self.inner.keys.values, &self.inner.keys.versions, key, &raw)
            .await
        {
            Ok(version) => version,
            Err(e) => {
                tracing::warn!(namespace = %self.inner.namespace, key, error = %e, "state set failed");
                return false;
            }
        };

        self.inner
            .cache_mut()
            .remember(key, Some(value.clone()), version);
        self.publish(key, value, version, metadata.unwrap_or_default())
            .await;
        self.refresh_ttl().await;
        true
    }

    /// Value of `key`, from the cache when allowed, else from the store.
    /// `default` when absent or unreadable.
    pub async fn get(&self, key: &str, default: Value, use_cache: bool) -> Value {
        if use_cache {
            if let Some(value) = self.inner.cache().values.get(key) {
                return value.clone();
            }
        }

        let read = async {
            let version = self
                .inner
                .store
                .hget(&self.inner.keys.versions, key)
                .await?;
            let raw = self.inner.store.hget(&self.inner.keys.values, key).await?;
            let value = match raw {
                Some(raw) => Some(serde_json::from_str::<Value>(&raw)?),
                None => None,
            };
            Ok::<_, SyncError>((value, version))
        };
        match read.await {
            Ok((Some(value), version)) => {
                let version = version.and_then(|v| v.parse().ok()).unwrap_or(0);
                self.inner
                    .cache_mut()
                    .remember(key, Some(value.clone()), version);
                value
            }
            Ok((None, _)) => default,
            Err(e) => {
                tracing::warn!(namespace = %self.inner.namespace, key, error = %e, "state get failed");
                default
            }
        }
    }

    /// Remove `key` and broadcast a tombstone. Deleting an absent key
    /// succeeds.
    pub async fn delete(&self, key: &str) -> bool {
        let version = match self
            .inner
            .store
            .hdel_versioned(&self.inner.keys.values, &self.inner.keys.versions, key)
            .await
        {
            Ok(version) => version,
            Err(e) => {
                tracing::warn!(namespace = %self.inner.namespace, key, error = %e, "state delete failed");
                return false;
            }
        };

        {
            let mut cache = self.inner.cache_mut();
            cache.remember(key, None, version);
            // Drop any stale entry even if a newer version is known
            cache.values.remove(key);
        }
        self.publish(key, Value::Null, version, StateUpdate::tombstone_metadata())
            .await;
        self.refresh_ttl().await;
        true
    }

    /// Every key and value, from the cache or from the store
    pub async fn get_all(&self, use_cache: bool) -> HashMap<String, Value> {
        if use_cache {
            return self.inner.cache().values.clone();
        }

        let read = async {
            let raw = self.inner.store.hgetall(&self.inner.keys.values).await?;
            raw.into_iter()
                .map(|(key, raw)| Ok((key, serde_json::from_str::<Value>(&raw)?)))
                .collect::<Result<HashMap<_, _>, SyncError>>()
        };
        match read.await {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!(namespace = %self.inner.namespace, error = %e, "state get_all failed");
                HashMap::new()
            }
        }
    }

    /// Atomically add `amount` to a numeric key and broadcast the result
    pub async fn increment(&self, key: &str, amount: i64) -> Result<i64, SyncError> {
        let (value, version) = self
            .inner
            .store
            .hincr_versioned(&self.inner.keys.values, &self.inner.keys.versions, key, amount)
            .await?;

        self.inner
            .cache_mut()
            .remember(key, Some(Value::from(value)), version);
        self.publish(key, Value::from(value), version, Map::new())
            .await;
        self.refresh_ttl().await;
        Ok(value)
    }

    /// Register a handler for accepted remote updates; handlers run in
    /// registration order
    pub fn on_update(&self, handler: impl UpdateHandler) {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(handler));
    }

    /// Apply an update received from another instance.
    ///
    /// Returns whether it was accepted: own updates and updates not newer
    /// than the local version are dropped.
    pub fn apply_update(&self, update: &StateUpdate) -> bool {
        self.inner.apply(update)
    }
}

impl<S, C, I> std::fmt::Debug for StateSync<S, C, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSync")
            .field("namespace", &self.inner.namespace)
            .field("instance_id", &self.inner.instance_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "state_sync_tests.rs"]
mod tests;
