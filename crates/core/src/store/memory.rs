// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process coordination store
//!
//! Single keyspace shared by strings, hashes and sorted sets, with lazy TTL
//! expiry driven by a [`Clock`]. Every operation runs under one mutex, which
//! makes the compare-and-act and versioned methods atomic the same way a
//! server-side script is. Useful for tests and single-process deployments.

use super::{CoordinationStore, KeyTtl, StoreError, Subscription};
use crate::clock::{Clock, SystemClock};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    ZSet(HashMap<String, f64>),
}

impl Value {
    fn is_empty(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::Hash(h) => h.is_empty(),
            Value::ZSet(z) => z.is_empty(),
        }
    }
}

struct Entry {
    value: Value,
    /// Unix millis after which the key no longer exists
    expires_at: Option<i64>,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    channels: HashMap<String, Vec<mpsc::UnboundedSender<String>>>,
}

impl State {
    fn purge_expired(&mut self, now: i64) {
        self.entries
            .retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
    }

    fn string(&self, key: &str) -> Result<Option<&String>, StoreError> {
        match self.entries.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn hash(&self, key: &str) -> Result<Option<&HashMap<String, String>>, StoreError> {
        match self.entries.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Hash(h)) => Ok(Some(h)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut HashMap<String, String>, StoreError> {
        let entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Hash(h) => Ok(h),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn zset(&self, key: &str) -> Result<Option<&HashMap<String, f64>>, StoreError> {
        match self.entries.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::ZSet(z)) => Ok(Some(z)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn zset_mut(&mut self, key: &str) -> Result<&mut HashMap<String, f64>, StoreError> {
        let entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::ZSet(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::ZSet(z) => Ok(z),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    /// Containers disappear once their last field or member is removed
    fn drop_if_empty(&mut self, key: &str) {
        if self.entries.get(key).is_some_and(|e| e.value.is_empty()) {
            self.entries.remove(key);
        }
    }

    fn incr_field(&mut self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let current = match self.hash(key)?.and_then(|h| h.get(field)) {
            None => 0,
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                StoreError::InvalidValue(format!("{}.{} is not an integer", key, field))
            })?,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::InvalidValue(format!("{}.{} overflow", key, field)))?;
        self.hash_mut(key)?
            .insert(field.to_string(), next.to_string());
        Ok(next)
    }
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

fn sorted_members(zset: &HashMap<String, f64>) -> Vec<(String, f64)> {
    let mut members: Vec<(String, f64)> = zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    members
}

struct Inner<C> {
    clock: C,
    state: Mutex<State>,
    offline: AtomicBool,
}

/// Coordination store living inside the current process
#[derive(Clone)]
pub struct MemoryStore<C: Clock = SystemClock> {
    inner: Arc<Inner<C>>,
}

impl MemoryStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryStore<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                state: Mutex::new(State::default()),
                offline: AtomicBool::new(false),
            }),
        }
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`]
    #[cfg(any(test, feature = "test-support"))]
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Close every subscription to `channel`, as a dropped connection would;
    /// returns how many were closed
    #[cfg(any(test, feature = "test-support"))]
    pub fn close_subscriptions(&self, channel: &str) -> usize {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.channels.remove(channel).map_or(0, |senders| senders.len())
    }

    /// Number of live (unexpired) keys
    pub fn key_count(&self) -> usize {
        let now = self.inner.clock.now_millis();
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.purge_expired(now);
        state.entries.len()
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut State, i64) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        let now = self.inner.clock.now_millis();
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.purge_expired(now);
        f(&mut state, now)
    }
}

impl<C: Clock> std::fmt::Debug for MemoryStore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("offline", &self.inner.offline.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<C: Clock> CoordinationStore for MemoryStore<C> {
    async fn ping(&self) -> Result<(), StoreError> {
        self.with_state(|_, _| Ok(()))
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.with_state(|state, now| {
            if state.entries.contains_key(key) {
                return Ok(false);
            }
            state.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: Some(now.saturating_add(ttl_millis(ttl))),
                },
            );
            Ok(true)
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_state(|state, _| Ok(state.string(key)?.cloned()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.with_state(|state, _| Ok(state.entries.remove(key).is_some()))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        self.with_state(|state, _| {
            if state.string(key)?.map(String::as_str) != Some(expected) {
                return Ok(false);
            }
            state.entries.remove(key);
            Ok(true)
        })
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.with_state(|state, now| {
            if state.string(key)?.map(String::as_str) != Some(expected) {
                return Ok(false);
            }
            if let Some(entry) = state.entries.get_mut(key) {
                entry.expires_at = Some(now.saturating_add(ttl_millis(ttl)));
            }
            Ok(true)
        })
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        self.with_state(|state, now| {
            Ok(match state.entries.get(key) {
                None => KeyTtl::Missing,
                Some(Entry {
                    expires_at: None, ..
                }) => KeyTtl::Persistent,
                Some(Entry {
                    expires_at: Some(at),
                    ..
                }) => KeyTtl::Expires(Duration::from_millis(
                    u64::try_from(at - now).unwrap_or(0),
                )),
            })
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.with_state(|state, now| match state.entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(now.saturating_add(ttl_millis(ttl)));
                Ok(true)
            }
            None => Ok(false),
        })
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.with_state(|state, _| {
            let mut keys: Vec<String> = state
                .entries
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            keys.sort();
            Ok(keys)
        })
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.with_state(|state, _| {
            state
                .hash_mut(key)?
                .insert(field.to_string(), value.to_string());
            Ok(())
        })
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.with_state(|state, _| Ok(state.hash(key)?.and_then(|h| h.get(field).cloned())))
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        self.with_state(|state, _| {
            if state.hash(key)?.is_none() {
                return Ok(false);
            }
            let removed = state.hash_mut(key)?.remove(field).is_some();
            state.drop_if_empty(key);
            Ok(removed)
        })
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.with_state(|state, _| Ok(state.hash(key)?.cloned().unwrap_or_default()))
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        self.with_state(|state, _| state.incr_field(key, field, delta))
    }

    async fn hset_versioned(
        &self,
        values: &str,
        versions: &str,
        field: &str,
        value: &str,
    ) -> Result<u64, StoreError> {
        self.with_state(|state, _| {
            // Type-check both keys before mutating either
            state.hash(values)?;
            let version = state.incr_field(versions, field, 1)?;
            state
                .hash_mut(values)?
                .insert(field.to_string(), value.to_string());
            Ok(version.unsigned_abs())
        })
    }

    async fn hincr_versioned(
        &self,
        values: &str,
        versions: &str,
        field: &str,
        delta: i64,
    ) -> Result<(i64, u64), StoreError> {
        self.with_state(|state, _| {
            state.hash(versions)?;
            let value = state.incr_field(values, field, delta)?;
            let version = state.incr_field(versions, field, 1)?;
            Ok((value, version.unsigned_abs()))
        })
    }

    async fn hdel_versioned(
        &self,
        values: &str,
        versions: &str,
        field: &str,
    ) -> Result<u64, StoreError> {
        self.with_state(|state, _| {
            if state.hash(values)?.is_some() {
                state.hash_mut(values)?.remove(field);
                state.drop_if_empty(values);
            }
            let version = state.incr_field(versions, field, 1)?;
            Ok(version.unsigned_abs())
        })
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        self.with_state(|state, _| {
            state.zset_mut(key)?.insert(member.to_string(), score);
            Ok(())
        })
    }

    async fn zpop_max(&self, key: &str) -> Result<Option<(String, f64)>, StoreError> {
        self.with_state(|state, _| {
            let Some(zset) = state.zset(key)? else {
                return Ok(None);
            };
            let top = sorted_members(zset).pop();
            if let Some((member, _)) = &top {
                state.zset_mut(key)?.remove(member);
                state.drop_if_empty(key);
            }
            Ok(top)
        })
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.with_state(|state, _| {
            if state.zset(key)?.is_none() {
                return Ok(false);
            }
            let removed = state.zset_mut(key)?.remove(member).is_some();
            state.drop_if_empty(key);
            Ok(removed)
        })
    }

    async fn zcard(&self, key: &str) -> Result<usize, StoreError> {
        self.with_state(|state, _| Ok(state.zset(key)?.map_or(0, HashMap::len)))
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        self.with_state(|state, _| {
            Ok(state
                .zset(key)?
                .map(sorted_members)
                .unwrap_or_default()
                .into_iter()
                .filter(|(_, score)| *score >= min && *score <= max)
                .collect())
        })
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        self.with_state(|state, _| Ok(state.zset(key)?.and_then(|z| z.get(member).copied())))
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<usize, StoreError> {
        self.with_state(|state, _| {
            let Some(senders) = state.channels.get_mut(channel) else {
                return Ok(0);
            };
            // Dropped subscriptions are pruned here
            senders.retain(|tx| tx.send(message.to_string()).is_ok());
            Ok(senders.len())
        })
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        self.with_state(|state, _| {
            let (tx, rx) = mpsc::unbounded_channel();
            state.channels.entry(channel.to_string()).or_default().push(tx);
            Ok(Subscription::new(channel, rx))
        })
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
