// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Integration tests across processes sharing one store
//!
//! Each "process" is a separate handle built from a clone of the same
//! [`MemoryStore`]; nothing is shared between handles except the store.

use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use tether_core::{
    CoordinationStore, DistributedLock, FakeClock, LockConfig, LockManager, MaintenanceConfig,
    MaintenanceTask, MemoryStore, NewTask, QueueConfig, SequentialIdGen, StateSync, SyncConfig,
    TaskPriority, TaskQueue, TaskStatus,
};

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// =============================================================================
// Locks
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lock_serializes_read_modify_write() {
    let store = MemoryStore::new();
    let config = LockConfig::default()
        .with_retry_count(500)
        .with_retry_delay(Duration::from_millis(2));

    let mut workers = Vec::new();
    for _ in 0..5 {
        let lock = DistributedLock::new(store.clone(), "app", "counter", config.clone());
        let store = store.clone();
        workers.push(tokio::spawn(async move {
            lock.run_locked(async {
                let current: i64 = store
                    .hget("app:counter", "value")
                    .await
                    .unwrap()
                    .map(|v| v.parse().unwrap())
                    .unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(3)).await;
                store
                    .hset("app:counter", "value", &(current + 1).to_string())
                    .await
                    .unwrap();
            })
            .await
        }));
    }
    for worker in workers {
        worker.await.unwrap().unwrap();
    }

    assert_eq!(
        store.hget("app:counter", "value").await.unwrap().as_deref(),
        Some("5")
    );
    assert!(store.get("app:lock:counter").await.unwrap().is_none());
}

#[tokio::test]
async fn managers_in_different_processes_see_each_other() {
    let store = MemoryStore::new();
    let config = LockConfig::default().with_retry_count(1);
    let ours = LockManager::new(store.clone(), "app", config.clone());
    let theirs = LockManager::new(store, "app", config);

    assert!(ours.get("deploy").acquire(false).await);
    assert!(!theirs.get("deploy").acquire(false).await);

    let info = theirs.get("deploy").lock_info().await.unwrap();
    assert_eq!(info.owner, tether_core::LockOwner::Other);

    assert_eq!(ours.release_all().await, 1);
    assert!(theirs.get("deploy").acquire(false).await);
}

// =============================================================================
// Queues
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_workers_process_each_task_once() {
    let store = MemoryStore::new();
    let producer = TaskQueue::new(store.clone(), "app", "jobs", QueueConfig::default());
    for n in 0..20 {
        producer
            .enqueue(NewTask::new("work", json!({ "n": n })))
            .await
            .unwrap();
    }

    let mut workers = Vec::new();
    for w in 0..4 {
        let queue = TaskQueue::new(store.clone(), "app", "jobs", QueueConfig::default())
            .with_worker_id(format!("worker-{}", w));
        workers.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(task) = queue.dequeue(Some(Duration::from_millis(50))).await {
                assert_eq!(task.worker_id.as_deref(), Some(queue.worker_id()));
                assert!(queue.complete(&task.task_id).await);
                seen.push(task.task_id);
            }
            seen
        }));
    }

    let mut all = Vec::new();
    for worker in workers {
        all.extend(worker.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(all.len(), 20);
    assert_eq!(unique.len(), 20);

    let stats = producer.stats().await;
    assert_eq!(stats.completed, 20);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.processing, 0);
}

#[tokio::test]
async fn crashed_worker_task_is_recovered_by_maintenance() {
    let clock = FakeClock::new();
    let store = MemoryStore::with_clock(clock.clone());
    let ids = SequentialIdGen::new("t");
    let config = QueueConfig::default().with_visibility_timeout(Duration::from_secs(30));
    let queue = |worker: &str| {
        TaskQueue::with_deps(
            store.clone(),
            clock.clone(),
            ids.clone(),
            "app",
            "jobs",
            config.clone(),
        )
        .with_worker_id(worker)
    };

    let crashed = queue("crashed");
    let survivor = queue("survivor");
    let id = crashed
        .enqueue(NewTask::new("report", json!({})).with_priority(TaskPriority::High))
        .await
        .unwrap();
    assert_eq!(crashed.dequeue(None).await.unwrap().task_id, id);
    assert!(survivor.dequeue(None).await.is_none());

    let maintenance = MaintenanceTask::new(
        MaintenanceConfig::default(),
        vec![survivor.clone()],
        LockManager::with_deps(
            store.clone(),
            clock.clone(),
            ids.clone(),
            "app",
            LockConfig::default(),
        ),
    );
    clock.advance(Duration::from_secs(31));
    assert_eq!(maintenance.tick().await.recovered, 1);

    let task = survivor.dequeue(None).await.unwrap();
    assert_eq!(task.task_id, id);
    assert_eq!(task.worker_id.as_deref(), Some("survivor"));
    assert!(!crashed.complete(&id).await);
    assert!(survivor.complete(&id).await);
    assert_eq!(
        survivor.get_task(&id).await.unwrap().status,
        TaskStatus::Completed
    );
}

// =============================================================================
// State sync
// =============================================================================

fn sync_config() -> SyncConfig {
    SyncConfig::default().with_poll_interval(Duration::from_millis(5))
}

#[tokio::test]
async fn writes_replicate_between_instances() {
    let store = MemoryStore::new();
    let a = StateSync::new(store.clone(), "app", "flags", sync_config());
    let b = StateSync::new(store, "app", "flags", sync_config());
    assert_ne!(a.instance_id(), b.instance_id());
    assert!(a.start().await);
    assert!(b.start().await);

    assert!(a.set("beta", json!(true), None).await);
    eventually(|| async { b.get("beta", Value::Null, true).await == json!(true) }).await;
    assert_eq!(b.version("beta"), 1);

    assert!(b.set("beta", json!(false), None).await);
    eventually(|| async { a.get("beta", Value::Null, true).await == json!(false) }).await;
    assert_eq!(a.version("beta"), 2);

    assert!(a.delete("beta").await);
    eventually(|| async { b.get("beta", json!("gone"), true).await == json!("gone") }).await;
    assert!(b.get_all(true).await.is_empty());

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn late_joiner_loads_snapshot() {
    let store = MemoryStore::new();
    let early = StateSync::new(store.clone(), "app", "limits", sync_config());
    early.set("rps", json!(100), None).await;
    early.set("burst", json!(20), None).await;

    let late = StateSync::new(store, "app", "limits", sync_config());
    assert!(late.start().await);
    let all = late.get_all(true).await;
    assert_eq!(all.get("rps"), Some(&json!(100)));
    assert_eq!(all.get("burst"), Some(&json!(20)));
    assert_eq!(late.version("rps"), 1);
    late.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_increments_are_not_lost() {
    let store = MemoryStore::new();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let sync = StateSync::new(store.clone(), "app", "counters", sync_config());
        handles.push(tokio::spawn(async move {
            for _ in 0..10 {
                sync.increment("hits", 1).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let reader = StateSync::new(store, "app", "counters", sync_config());
    assert_eq!(reader.get("hits", json!(0), false).await, json!(40));
}
