// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-store distributed lock

use super::{lock_key, LockConfig, LockError};
use crate::clock::{Clock, SystemClock};
use crate::id::{IdGen, UuidIdGen};
use crate::store::{CoordinationStore, KeyTtl};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Who holds a lock, relative to the caller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockOwner {
    #[serde(rename = "self")]
    Mine,
    #[serde(rename = "other")]
    Other,
}

/// Snapshot of a lock as seen in the store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub name: String,
    pub key: String,
    /// Token of the current holder
    pub holder_id: String,
    /// Remaining lifetime; `None` if the key has no expiry
    #[serde(with = "humantime_serde")]
    pub ttl: Option<Duration>,
    pub owner: LockOwner,
    /// Local acquisition time, known only for our own locks
    pub acquired_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Held {
    lock_id: Option<String>,
    acquired_at: Option<DateTime<Utc>>,
}

struct Inner<S, C, I> {
    store: S,
    clock: C,
    id_gen: I,
    name: String,
    key: String,
    config: LockConfig,
    held: Mutex<Held>,
}

/// Handle to a named lock
///
/// Clones share local state: a lock acquired through one clone can be
/// released through another.
pub struct DistributedLock<S, C = SystemClock, I = UuidIdGen> {
    inner: Arc<Inner<S, C, I>>,
}

impl<S, C, I> Clone for DistributedLock<S, C, I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: CoordinationStore> DistributedLock<S> {
    pub fn new(store: S, key_prefix: &str, name: impl Into<String>, config: LockConfig) -> Self {
        Self::with_deps(store, SystemClock, UuidIdGen, key_prefix, name, config)
    }
}

impl<S: CoordinationStore, C: Clock, I: IdGen> DistributedLock<S, C, I> {
    pub fn with_deps(
        store: S,
        clock: C,
        id_gen: I,
        key_prefix: &str,
        name: impl Into<String>,
        config: LockConfig,
    ) -> Self {
        let name = name.into();
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                id_gen,
                key: lock_key(key_prefix, &name),
                name,
                config,
                held: Mutex::new(Held::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn ttl(&self) -> Duration {
        self.inner.config.ttl
    }

    /// Local view: true between a successful acquire and the next release
    pub fn is_locked(&self) -> bool {
        self.held().lock_id.is_some()
    }

    pub fn acquired_at(&self) -> Option<DateTime<Utc>> {
        self.held().acquired_at
    }

    fn held(&self) -> std::sync::MutexGuard<'_, Held> {
        self.inner.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_lock_id(&self) -> Option<String> {
        self.held().lock_id.clone()
    }

    /// Clear local state if it still belongs to `lock_id`
    fn forget(&self, lock_id: &str) {
        let mut held = self.held();
        if held.lock_id.as_deref() == Some(lock_id) {
            *held = Held::default();
        }
    }

    /// Try to take the lock.
    ///
    /// Non-blocking callers get one attempt. Blocking callers get up to
    /// `retry_count` attempts with `retry_delay` between them. Store errors
    /// count as failure.
    pub async fn acquire(&self, blocking: bool) -> bool {
        let lock_id = self.inner.id_gen.next();
        let attempts = if blocking {
            self.inner.config.retry_count.max(1)
        } else {
            1
        };

        for attempt in 1..=attempts {
            match self
                .inner
                .store
                .set_if_absent(&self.inner.key, &lock_id, self.inner.config.ttl)
                .await
            {
                Ok(true) => {
                    let mut held = self.held();
                    held.lock_id = Some(lock_id);
                    held.acquired_at = Some(self.inner.clock.now());
                    tracing::info!(lock = %self.inner.name, attempt, "lock acquired");
                    return true;
                }
                Ok(false) => {
                    tracing::debug!(lock = %self.inner.name, attempt, "lock busy");
                }
                Err(e) => {
                    tracing::warn!(lock = %self.inner.name, error = %e, "lock acquire failed");
                    return false;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.inner.config.retry_delay).await;
            }
        }
        false
    }

    /// Release the lock if we still own it.
    ///
    /// Local state is cleared whatever the outcome; a failed release is
    /// terminal and the key's TTL takes care of the rest.
    pub async fn release(&self) -> bool {
        let Some(lock_id) = self.current_lock_id() else {
            return false;
        };
        let result = self
            .inner
            .store
            .compare_and_delete(&self.inner.key, &lock_id)
            .await;
        self.forget(&lock_id);

        match result {
            Ok(true) => {
                tracing::info!(lock = %self.inner.name, "lock released");
                true
            }
            Ok(false) => {
                tracing::warn!(lock = %self.inner.name, "lock no longer owned at release");
                false
            }
            Err(e) => {
                tracing::warn!(lock = %self.inner.name, error = %e, "lock release failed");
                false
            }
        }
    }

    /// Reset the lock's expiry to `additional` if we still own it
    pub async fn extend(&self, additional: Duration) -> bool {
        let Some(lock_id) = self.current_lock_id() else {
            return false;
        };
        match self
            .inner
            .store
            .compare_and_expire(&self.inner.key, &lock_id, additional)
            .await
        {
            Ok(extended) => {
                tracing::debug!(lock = %self.inner.name, extended, ?additional, "lock extend");
                extended
            }
            Err(e) => {
                tracing::warn!(lock = %self.inner.name, error = %e, "lock extend failed");
                false
            }
        }
    }

    /// Check the store: does the lock key still hold our token?
    pub async fn is_locked_by_me(&self) -> bool {
        let Some(lock_id) = self.current_lock_id() else {
            return false;
        };
        match self.inner.store.get(&self.inner.key).await {
            Ok(value) => value.as_deref() == Some(lock_id.as_str()),
            Err(e) => {
                tracing::warn!(lock = %self.inner.name, error = %e, "lock ownership check failed");
                false
            }
        }
    }

    /// Current holder and remaining TTL, or `None` if the lock is free
    pub async fn lock_info(&self) -> Option<LockInfo> {
        let store = &self.inner.store;
        let read = async {
            let holder = store.get(&self.inner.key).await?;
            let ttl = store.ttl(&self.inner.key).await?;
            Ok::<_, crate::store::StoreError>((holder, ttl))
        };
        let (holder_id, ttl) = match read.await {
            Ok((Some(holder), ttl)) if ttl != KeyTtl::Missing => (holder, ttl),
            // Free, or expired between the two reads
            Ok(_) => return None,
            Err(e) => {
                tracing::warn!(lock = %self.inner.name, error = %e, "lock info failed");
                return None;
            }
        };

        let held = self.held();
        let mine = held.lock_id.as_deref() == Some(holder_id.as_str());
        Some(LockInfo {
            name: self.inner.name.clone(),
            key: self.inner.key.clone(),
            holder_id,
            ttl: match ttl {
                KeyTtl::Expires(remaining) => Some(remaining),
                _ => None,
            },
            owner: if mine { LockOwner::Mine } else { LockOwner::Other },
            acquired_at: if mine { held.acquired_at } else { None },
        })
    }

    /// Acquire (blocking) or fail with [`LockError::NotAcquired`]
    pub async fn guard(&self) -> Result<LockGuard<S, C, I>, LockError> {
        if self.acquire(true).await {
            Ok(LockGuard {
                lock: Some(self.clone()),
            })
        } else {
            Err(LockError::NotAcquired(self.inner.name.clone()))
        }
    }

    /// Run `work` while holding the lock, releasing it on every exit path
    pub async fn run_locked<F, T>(&self, work: F) -> Result<T, LockError>
    where
        F: Future<Output = T>,
    {
        let guard = self.guard().await?;
        let output = work.await;
        guard.release().await;
        Ok(output)
    }
}

impl<S, C, I> std::fmt::Debug for DistributedLock<S, C, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("name", &self.inner.name)
            .field("key", &self.inner.key)
            .finish_non_exhaustive()
    }
}

/// Scoped ownership of a lock
///
/// Call [`LockGuard::release`] to release and observe the outcome. A guard
/// dropped without release (early return, panic, cancelled future) releases
/// in a background task when a tokio runtime is available; otherwise the
/// lock lapses with its TTL.
pub struct LockGuard<S: CoordinationStore, C: Clock = SystemClock, I: IdGen = UuidIdGen> {
    lock: Option<DistributedLock<S, C, I>>,
}

impl<S: CoordinationStore, C: Clock, I: IdGen> LockGuard<S, C, I> {
    pub fn lock(&self) -> Option<&DistributedLock<S, C, I>> {
        self.lock.as_ref()
    }

    pub async fn release(mut self) -> bool {
        match self.lock.take() {
            Some(lock) => lock.release().await,
            None => false,
        }
    }
}

impl<S: CoordinationStore, C: Clock, I: IdGen> Drop for LockGuard<S, C, I> {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    lock.release().await;
                });
            }
            Err(_) => {
                tracing::warn!(lock = %lock.name(), "lock guard dropped outside runtime");
            }
        }
    }
}

#[cfg(test)]
#[path = "distributed_tests.rs"]
mod tests;
