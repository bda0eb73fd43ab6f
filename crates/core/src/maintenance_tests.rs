// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::FakeClock;
use crate::id::SequentialIdGen;
use crate::lock::LockConfig;
use crate::queue::{NewTask, QueueConfig, TaskStatus};
use crate::store::MemoryStore;
use serde_json::json;
use yare::parameterized;

type Store = MemoryStore<FakeClock>;

struct Fixture {
    task: MaintenanceTask<Store, FakeClock, SequentialIdGen>,
    queue: TaskQueue<Store, FakeClock, SequentialIdGen>,
    store: Store,
    clock: FakeClock,
}

fn fixture(config: MaintenanceConfig) -> Fixture {
    let clock = FakeClock::new();
    let store = MemoryStore::with_clock(clock.clone());
    let ids = SequentialIdGen::new("id");
    let queue = TaskQueue::with_deps(
        store.clone(),
        clock.clone(),
        ids.clone(),
        "app",
        "jobs",
        QueueConfig::default().with_visibility_timeout(Duration::from_secs(60)),
    );
    let locks = LockManager::with_deps(
        store.clone(),
        clock.clone(),
        ids,
        "app",
        LockConfig::default(),
    );
    Fixture {
        task: MaintenanceTask::new(config, vec![queue.clone()], locks),
        queue,
        store,
        clock,
    }
}

#[test]
fn maintenance_config_default() {
    let config = MaintenanceConfig::default();
    assert_eq!(config.interval, Duration::from_secs(30));
    assert_eq!(config.completed_retention, Duration::from_secs(86400));
    assert!(config.lock_prefix.is_none());
}

#[test]
fn maintenance_config_builder() {
    let config = MaintenanceConfig::default()
        .with_interval(Duration::from_secs(5))
        .with_completed_retention(Duration::from_secs(60))
        .with_lock_prefix("other:lock:");
    assert_eq!(config.interval, Duration::from_secs(5));
    assert_eq!(config.completed_retention, Duration::from_secs(60));
    assert_eq!(config.lock_prefix.as_deref(), Some("other:lock:"));
}

#[tokio::test]
async fn tick_on_clean_store_reports_nothing() {
    let f = fixture(MaintenanceConfig::default());
    assert!(f.task.tick().await.is_empty());
    assert_eq!(f.task.queue_names(), vec!["jobs"]);
}

#[tokio::test]
async fn tick_recovers_purges_and_cleans() {
    let f = fixture(MaintenanceConfig::default().with_completed_retention(Duration::from_secs(600)));

    let done = f.queue.enqueue(NewTask::new("a", json!({}))).await.unwrap();
    f.queue.dequeue(None).await.unwrap();
    f.queue.complete(&done).await;

    let stuck = f.queue.enqueue(NewTask::new("b", json!({}))).await.unwrap();
    f.queue.dequeue(None).await.unwrap();

    f.store.hset("app:lock:leaked", "f", "1").await.unwrap();

    f.clock.advance(Duration::from_secs(3600));
    let report = f.task.tick().await;
    assert_eq!(
        report,
        MaintenanceReport {
            recovered: 1,
            purged: 1,
            locks_cleaned: 1,
        }
    );
    assert_eq!(
        f.queue.get_task(&stuck).await.unwrap().status,
        TaskStatus::Pending
    );
    assert!(f.queue.get_task(&done).await.is_none());
}

#[tokio::test]
async fn configured_lock_prefix_narrows_cleanup() {
    let f = fixture(MaintenanceConfig::default().with_lock_prefix("app:lock:batch-"));
    f.store.hset("app:lock:batch-7", "f", "1").await.unwrap();
    f.store.hset("app:lock:y", "f", "1").await.unwrap();

    assert_eq!(f.task.tick().await.locks_cleaned, 1);
    assert_eq!(f.store.scan_prefix("").await.unwrap(), vec!["app:lock:y"]);
}

#[parameterized(
    whole_namespace = { "app:" },
    empty = { "" },
    lock_without_separator = { "app:lock" },
    other_namespace = { "legacy:" },
)]
#[test_macro(tokio::test)]
async fn prefix_outside_lock_namespace_is_not_swept(prefix: &str) {
    let f = fixture(MaintenanceConfig::default().with_lock_prefix(prefix));
    f.queue.enqueue(NewTask::new("a", json!({}))).await.unwrap();
    f.store.hset("app:lock:leaked", "f", "1").await.unwrap();

    assert_eq!(f.task.tick().await.locks_cleaned, 0);
    let stats = f.queue.stats().await;
    assert_eq!((stats.pending, stats.total), (1, 1));
    assert!(f.queue.get_task("id-1").await.is_some());
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let f = fixture(MaintenanceConfig::default().with_interval(Duration::from_millis(5)));
    f.store.hset("app:lock:leaked", "f", "1").await.unwrap();

    let (tx, rx) = watch::channel(false);
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
    });

    let total = f.task.run(rx).await;
    stopper.await.unwrap();
    assert_eq!(total.locks_cleaned, 1);
    assert_eq!(f.task.interval(), Duration::from_millis(5));
}
