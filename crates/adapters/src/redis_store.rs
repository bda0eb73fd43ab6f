// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Redis-backed coordination store

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tether_core::store::{CoordinationStore, KeyTtl, StoreError, Subscription};
use tokio::sync::mpsc;

const COMPARE_AND_DELETE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

const COMPARE_AND_EXPIRE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
";

const HSET_VERSIONED: &str = r"
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
return redis.call('HINCRBY', KEYS[2], ARGV[1], 1)
";

const HINCR_VERSIONED: &str = r"
local value = redis.call('HINCRBY', KEYS[1], ARGV[1], ARGV[2])
local version = redis.call('HINCRBY', KEYS[2], ARGV[1], 1)
return {value, version}
";

const HDEL_VERSIONED: &str = r"
redis.call('HDEL', KEYS[1], ARGV[1])
return redis.call('HINCRBY', KEYS[2], ARGV[1], 1)
";

const SCAN_BATCH: usize = 100;

struct Scripts {
    compare_and_delete: Script,
    compare_and_expire: Script,
    hset_versioned: Script,
    hincr_versioned: Script,
    hdel_versioned: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            compare_and_expire: Script::new(COMPARE_AND_EXPIRE),
            hset_versioned: Script::new(HSET_VERSIONED),
            hincr_versioned: Script::new(HINCR_VERSIONED),
            hdel_versioned: Script::new(HDEL_VERSIONED),
        }
    }
}

/// [`CoordinationStore`] over a Redis server
///
/// Commands share one auto-reconnecting connection. Each subscription opens
/// its own pub/sub connection.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    conn: ConnectionManager,
    scripts: Arc<Scripts>,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`)
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let unavailable = |e: RedisError| StoreError::Unavailable(format!("{}: {}", redact(url), e));
        let client = Client::open(url).map_err(unavailable)?;

        // Ping once; the connection manager retries with backoff
        let mut ping = client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        let _: String = redis::cmd("PING")
            .query_async(&mut ping)
            .await
            .map_err(unavailable)?;

        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(unavailable)?;
        tracing::info!(url = %redact(url), "connected to redis");
        Ok(Self {
            client,
            conn,
            scripts: Arc::new(Scripts::load()),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

/// Map a Redis error onto the store error kinds
fn classify(e: RedisError, key: &str) -> StoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
    {
        return StoreError::Unavailable(e.to_string());
    }
    if e.code() == Some("WRONGTYPE") {
        return StoreError::WrongType(key.to_string());
    }
    if e.kind() == redis::ErrorKind::TypeError || e.to_string().contains("not an integer") {
        return StoreError::InvalidValue(format!("{}: {}", key, e));
    }
    StoreError::Command(e.to_string())
}

/// Interpret a `PTTL` reply
fn ttl_from_pttl(millis: i64) -> KeyTtl {
    match millis {
        -2 => KeyTtl::Missing,
        -1 => KeyTtl::Persistent,
        ms => KeyTtl::Expires(Duration::from_millis(ms.max(0) as u64)),
    }
}

/// Escape glob metacharacters so a prefix matches literally in `SCAN MATCH`
fn glob_escape(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('*');
    out
}

/// Drop credentials from a connection URL before logging it
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            format!("{}://***@{}", &url[..scheme], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

fn millis(duration: Duration) -> u64 {
    // PX/PEXPIRE reject 0
    (duration.as_millis() as u64).max(1)
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let _: String = redis::cmd("PING")
            .query_async(&mut self.conn())
            .await
            .map_err(|e| classify(e, ""))?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut self.conn())
            .await
            .map_err(|e| classify(e, key))?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.conn().get(key).await.map_err(|e| classify(e, key))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let removed: usize = self.conn().del(key).await.map_err(|e| classify(e, key))?;
        Ok(removed > 0)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let removed: i64 = self
            .scripts
            .compare_and_delete
            .key(key)
            .arg(expected)
            .invoke_async(&mut self.conn())
            .await
            .map_err(|e| classify(e, key))?;
        Ok(removed == 1)
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let updated: i64 = self
            .scripts
            .compare_and_expire
            .key(key)
            .arg(expected)
            .arg(millis(ttl))
            .invoke_async(&mut self.conn())
            .await
            .map_err(|e| classify(e, key))?;
        Ok(updated == 1)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        let millis: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| classify(e, key))?;
        Ok(ttl_from_pttl(millis))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let updated: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut self.conn())
            .await
            .map_err(|e| classify(e, key))?;
        Ok(updated == 1)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let pattern = glob_escape(prefix);
        let mut conn = self.conn();
        let mut keys = BTreeSet::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| classify(e, prefix))?;
            // SCAN may return a key more than once
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys.into_iter().collect())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let _: i64 = self
            .conn()
            .hset(key, field, value)
            .await
            .map_err(|e| classify(e, key))?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.conn()
            .hget(key, field)
            .await
            .map_err(|e| classify(e, key))
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let removed: usize = self
            .conn()
            .hdel(key, field)
            .await
            .map_err(|e| classify(e, key))?;
        Ok(removed > 0)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.conn()
            .hgetall(key)
            .await
            .map_err(|e| classify(e, key))
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        self.conn()
            .hincr(key, field, delta)
            .await
            .map_err(|e| classify(e, key))
    }

    async fn hset_versioned(
        &self,
        values: &str,
        versions: &str,
        field: &str,
        value: &str,
    ) -> Result<u64, StoreError> {
        self.scripts
            .hset_versioned
            .key(values)
            .key(versions)
            .arg(field)
            .arg(value)
            .invoke_async(&mut self.conn())
            .await
            .map_err(|e| classify(e, values))
    }

    async fn hincr_versioned(
        &self,
        values: &str,
        versions: &str,
        field: &str,
        delta: i64,
    ) -> Result<(i64, u64), StoreError> {
        self.scripts
            .hincr_versioned
            .key(values)
            .key(versions)
            .arg(field)
            .arg(delta)
            .invoke_async(&mut self.conn())
            .await
            .map_err(|e| classify(e, values))
    }

    async fn hdel_versioned(
        &self,
        values: &str,
        versions: &str,
        field: &str,
    ) -> Result<u64, StoreError> {
        self.scripts
            .hdel_versioned
            .key(values)
            .key(versions)
            .arg(field)
            .invoke_async(&mut self.conn())
            .await
            .map_err(|e| classify(e, values))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let _: i64 = self
            .conn()
            .zadd(key, member, score)
            .await
            .map_err(|e| classify(e, key))?;
        Ok(())
    }

    async fn zpop_max(&self, key: &str) -> Result<Option<(String, f64)>, StoreError> {
        let popped: Vec<(String, f64)> = redis::cmd("ZPOPMAX")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| classify(e, key))?;
        Ok(popped.into_iter().next())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let removed: usize = self
            .conn()
            .zrem(key, member)
            .await
            .map_err(|e| classify(e, key))?;
        Ok(removed > 0)
    }

    async fn zcard(&self, key: &str) -> Result<usize, StoreError> {
        self.conn().zcard(key).await.map_err(|e| classify(e, key))
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(min)
            .arg(max)
            .arg("WITHSCORES")
            .query_async(&mut self.conn())
            .await
            .map_err(|e| classify(e, key))
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        self.conn()
            .zscore(key, member)
            .await
            .map_err(|e| classify(e, key))
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<usize, StoreError> {
        self.conn()
            .publish(channel, message)
            .await
            .map_err(|e| classify(e, channel))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| classify(e, channel))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| classify(e, channel))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let name = channel.to_string();
        let forwarder = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(channel = %name, error = %e, "dropping undecodable message");
                        continue;
                    }
                };
                if tx.send(payload).is_err() {
                    break;
                }
            }
            tracing::debug!(channel = %name, "subscription ended");
        });
        Ok(Subscription::with_forwarder(channel, rx, forwarder))
    }
}

#[cfg(test)]
#[path = "redis_store_tests.rs"]
mod tests;
