// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Tests against a live Redis server
//!
//! Set `TETHER_TEST_REDIS_URL` (e.g. `redis://127.0.0.1:6379/15`) to run
//! them; without it every test returns early. Each test works under its own
//! key prefix and deletes it afterwards.

use serde_json::json;
use std::time::Duration;
use tether_adapters::RedisStore;
use tether_core::{
    default_worker_id, CoordinationStore, DistributedLock, KeyTtl, LockConfig, NewTask,
    QueueConfig, StateSync, SyncConfig, TaskPriority, TaskQueue,
};

async fn connect(test: &str) -> Option<(RedisStore, String)> {
    let url = std::env::var("TETHER_TEST_REDIS_URL").ok()?;
    let store = RedisStore::connect(&url).await.unwrap();
    let prefix = format!("tether-test:{}:{}", test, default_worker_id());
    Some((store, prefix))
}

async fn cleanup(store: &RedisStore, prefix: &str) {
    for key in store.scan_prefix(prefix).await.unwrap() {
        store.delete(&key).await.unwrap();
    }
}

#[tokio::test]
async fn primitive_commands() {
    let Some((store, prefix)) = connect("commands").await else {
        return;
    };
    store.ping().await.unwrap();
    let key = format!("{}:k", prefix);

    assert!(store
        .set_if_absent(&key, "a", Duration::from_secs(10))
        .await
        .unwrap());
    assert!(!store
        .set_if_absent(&key, "b", Duration::from_secs(10))
        .await
        .unwrap());
    assert!(matches!(store.ttl(&key).await.unwrap(), KeyTtl::Expires(_)));
    assert!(!store.compare_and_delete(&key, "b").await.unwrap());
    assert!(store
        .compare_and_expire(&key, "a", Duration::from_secs(60))
        .await
        .unwrap());
    assert!(store.compare_and_delete(&key, "a").await.unwrap());
    assert_eq!(store.ttl(&key).await.unwrap(), KeyTtl::Missing);

    let values = format!("{}:values", prefix);
    let versions = format!("{}:versions", prefix);
    assert_eq!(
        store.hset_versioned(&values, &versions, "f", "1").await.unwrap(),
        1
    );
    assert_eq!(
        store
            .hincr_versioned(&values, &versions, "f", 4)
            .await
            .unwrap(),
        (5, 2)
    );
    assert_eq!(
        store.hdel_versioned(&values, &versions, "f").await.unwrap(),
        3
    );
    assert_eq!(store.hget(&values, "f").await.unwrap(), None);

    let zset = format!("{}:z", prefix);
    store.zadd(&zset, "low", 1.0).await.unwrap();
    store.zadd(&zset, "high", 2e13).await.unwrap();
    assert_eq!(
        store.zrange_by_score(&zset, f64::NEG_INFINITY, 10.0).await.unwrap(),
        vec![("low".to_string(), 1.0)]
    );
    assert_eq!(
        store.zpop_max(&zset).await.unwrap(),
        Some(("high".to_string(), 2e13))
    );

    let mut sub = store.subscribe(&format!("{}:chan", prefix)).await.unwrap();
    assert_eq!(
        store
            .publish(&format!("{}:chan", prefix), "hi")
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        sub.recv_timeout(Duration::from_secs(2)).await.unwrap().as_deref(),
        Some("hi")
    );

    cleanup(&store, &prefix).await;
}

#[tokio::test]
async fn lock_queue_and_sync() {
    let Some((store, prefix)) = connect("primitives").await else {
        return;
    };

    let config = LockConfig::default().with_retry_count(1);
    let ours = DistributedLock::new(store.clone(), &prefix, "job", config.clone());
    let theirs = DistributedLock::new(store.clone(), &prefix, "job", config);
    assert!(ours.acquire(false).await);
    assert!(!theirs.acquire(false).await);
    assert!(ours.release().await);

    let queue = TaskQueue::new(store.clone(), &prefix, "jobs", QueueConfig::default());
    queue.enqueue(NewTask::new("low", json!({}))).await.unwrap();
    let urgent = queue
        .enqueue(NewTask::new("urgent", json!({})).with_priority(TaskPriority::Critical))
        .await
        .unwrap();
    let task = queue.dequeue(None).await.unwrap();
    assert_eq!(task.task_id, urgent);
    assert!(queue.complete(&urgent).await);

    let sync_config = SyncConfig::default().with_poll_interval(Duration::from_millis(10));
    let a = StateSync::new(store.clone(), &prefix, "flags", sync_config.clone());
    let b = StateSync::new(store.clone(), &prefix, "flags", sync_config);
    assert!(b.start().await);
    assert!(a.set("on", json!(true), None).await);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while b.get("on", json!(null), true).await != json!(true) {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    b.stop().await;

    cleanup(&store, &prefix).await;
}
