// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic hygiene for queues and locks
//!
//! Nothing in the primitives pushes recovery: a crashed worker's tasks sit in
//! processing until someone sweeps them. This task is that someone.

use crate::clock::{Clock, SystemClock};
use crate::id::{IdGen, UuidIdGen};
use crate::lock::LockManager;
use crate::queue::TaskQueue;
use crate::store::CoordinationStore;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;

/// Configuration for the maintenance sweep
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// How often to sweep
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Completed tasks older than this are purged
    #[serde(with = "humantime_serde")]
    pub completed_retention: Duration,
    /// Key prefix scanned for locks without expiry; defaults to the lock
    /// manager's own prefix and must lie within it
    pub lock_prefix: Option<String>,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            completed_retention: Duration::from_secs(24 * 3600),
            lock_prefix: None,
        }
    }
}

impl MaintenanceConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_completed_retention(mut self, retention: Duration) -> Self {
        self.completed_retention = retention;
        self
    }

    pub fn with_lock_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.lock_prefix = Some(prefix.into());
        self
    }
}

/// Outcome of one sweep
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub recovered: usize,
    pub purged: usize,
    pub locks_cleaned: usize,
}

impl MaintenanceReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Sweeps a set of queues and a lock manager
pub struct MaintenanceTask<S, C = SystemClock, I = UuidIdGen> {
    config: MaintenanceConfig,
    queues: Vec<TaskQueue<S, C, I>>,
    locks: LockManager<S, C, I>,
}

impl<S: CoordinationStore, C: Clock, I: IdGen> MaintenanceTask<S, C, I> {
    pub fn new(
        config: MaintenanceConfig,
        queues: Vec<TaskQueue<S, C, I>>,
        locks: LockManager<S, C, I>,
    ) -> Self {
        Self {
            config,
            queues,
            locks,
        }
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    pub fn queue_names(&self) -> Vec<&str> {
        self.queues.iter().map(TaskQueue::name).collect()
    }

    /// Run a single sweep
    pub async fn tick(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        for queue in &self.queues {
            report.recovered += queue.recover_stale_tasks().await;
            report.purged += queue
                .purge_completed(self.config.completed_retention)
                .await;
        }

        let lock_prefix = self.locks.key_prefix();
        match self.config.lock_prefix.as_deref() {
            None => report.locks_cleaned = self.locks.cleanup_expired_locks(&lock_prefix).await,
            Some(prefix) if prefix.starts_with(&lock_prefix) => {
                report.locks_cleaned = self.locks.cleanup_expired_locks(prefix).await
            }
            // Queue and state keys carry no expiry either; never sweep them
            Some(prefix) => tracing::warn!(
                prefix,
                lock_prefix = %lock_prefix,
                "lock cleanup skipped: prefix is outside the lock namespace"
            ),
        }

        if report.is_empty() {
            tracing::debug!("maintenance sweep found nothing to do");
        } else {
            tracing::info!(
                recovered = report.recovered,
                purged = report.purged,
                locks_cleaned = report.locks_cleaned,
                "maintenance sweep"
            );
        }
        report
    }

    /// Sweep every `interval` until `shutdown` turns true; returns the
    /// accumulated report
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> MaintenanceReport {
        let mut total = MaintenanceReport::default();
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    total.recovered += report.recovered;
                    total.purged += report.purged;
                    total.locks_cleaned += report.locks_cleaned;
                }
            }
        }
        tracing::info!("maintenance stopped");
        total
    }
}

#[cfg(test)]
#[path = "maintenance_tests.rs"]
mod tests;
