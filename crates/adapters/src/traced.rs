// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced store wrapper for consistent observability

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tether_core::store::{CoordinationStore, KeyTtl, StoreError, Subscription};
use tracing::Instrument;

/// Wrapper that adds a span, timing and outcome logging to every call of
/// any [`CoordinationStore`]
#[derive(Clone)]
pub struct TracedStore<S> {
    inner: S,
    slow_threshold: Duration,
}

impl<S> TracedStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            slow_threshold: Duration::from_millis(100),
        }
    }

    /// Calls slower than this are logged at info
    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn observe<T, F>(&self, op: &'static str, key: &str, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let span = tracing::debug_span!("store", op, key);
        let slow_threshold = self.slow_threshold;
        async move {
            let start = Instant::now();
            let result = call.await;
            let elapsed = start.elapsed();
            let elapsed_ms = elapsed.as_millis() as u64;

            match &result {
                Ok(_) if elapsed >= slow_threshold => tracing::info!(elapsed_ms, "slow call"),
                Ok(_) => tracing::trace!(elapsed_ms, "ok"),
                Err(e @ StoreError::Unavailable(_)) => {
                    tracing::error!(elapsed_ms, error = %e, "store unreachable")
                }
                Err(e) => tracing::warn!(elapsed_ms, error = %e, "failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl<S: CoordinationStore> CoordinationStore for TracedStore<S> {
    async fn ping(&self) -> Result<(), StoreError> {
        self.observe("ping", "", self.inner.ping()).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let result = self
            .observe("set_if_absent", key, self.inner.set_if_absent(key, value, ttl))
            .await;
        if let Ok(written) = &result {
            tracing::debug!(key, written, ttl_ms = ttl.as_millis() as u64, "set_if_absent");
        }
        result
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.observe("get", key, self.inner.get(key)).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.observe("delete", key, self.inner.delete(key)).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let result = self
            .observe(
                "compare_and_delete",
                key,
                self.inner.compare_and_delete(key, expected),
            )
            .await;
        if let Ok(false) = result {
            // Usually a lock that expired and was taken by someone else
            tracing::debug!(key, "compare_and_delete did not match");
        }
        result
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.observe(
            "compare_and_expire",
            key,
            self.inner.compare_and_expire(key, expected, ttl),
        )
        .await
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        self.observe("ttl", key, self.inner.ttl(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.observe("expire", key, self.inner.expire(key, ttl)).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let result = self
            .observe("scan_prefix", prefix, self.inner.scan_prefix(prefix))
            .await;
        tracing::trace!(
            prefix,
            count = result.as_ref().map(|keys| keys.len()).ok(),
            "scanned"
        );
        result
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.observe("hset", key, self.inner.hset(key, field, value))
            .await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.observe("hget", key, self.inner.hget(key, field)).await
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        self.observe("hdel", key, self.inner.hdel(key, field)).await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.observe("hgetall", key, self.inner.hgetall(key)).await
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        self.observe("hincr_by", key, self.inner.hincr_by(key, field, delta))
            .await
    }

    async fn hset_versioned(
        &self,
        values: &str,
        versions: &str,
        field: &str,
        value: &str,
    ) -> Result<u64, StoreError> {
        self.observe(
            "hset_versioned",
            values,
            self.inner.hset_versioned(values, versions, field, value),
        )
        .await
    }

    async fn hincr_versioned(
        &self,
        values: &str,
        versions: &str,
        field: &str,
        delta: i64,
    ) -> Result<(i64, u64), StoreError> {
        self.observe(
            "hincr_versioned",
            values,
            self.inner.hincr_versioned(values, versions, field, delta),
        )
        .await
    }

    async fn hdel_versioned(
        &self,
        values: &str,
        versions: &str,
        field: &str,
    ) -> Result<u64, StoreError> {
        self.observe(
            "hdel_versioned",
            values,
            self.inner.hdel_versioned(values, versions, field),
        )
        .await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        self.observe("zadd", key, self.inner.zadd(key, member, score))
            .await
    }

    async fn zpop_max(&self, key: &str) -> Result<Option<(String, f64)>, StoreError> {
        self.observe("zpop_max", key, self.inner.zpop_max(key)).await
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.observe("zrem", key, self.inner.zrem(key, member)).await
    }

    async fn zcard(&self, key: &str) -> Result<usize, StoreError> {
        self.observe("zcard", key, self.inner.zcard(key)).await
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        self.observe(
            "zrange_by_score",
            key,
            self.inner.zrange_by_score(key, min, max),
        )
        .await
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        self.observe("zscore", key, self.inner.zscore(key, member))
            .await
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<usize, StoreError> {
        let result = self
            .observe("publish", channel, self.inner.publish(channel, message))
            .await;
        if let Ok(receivers) = &result {
            tracing::debug!(channel, receivers, bytes = message.len(), "published");
        }
        result
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let result = self
            .observe("subscribe", channel, self.inner.subscribe(channel))
            .await;
        if result.is_ok() {
            tracing::info!(channel, "subscribed");
        }
        result
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
