// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Priority work queue with retries and dead-lettering
//!
//! Each queue keeps its task ids in four sorted sets (pending, processing,
//! completed, dead letter) plus a hash of JSON task records:
//!
//! ```text
//! {prefix}:queue:{name}:pending       score = priority band + inverted arrival
//! {prefix}:queue:{name}:processing    score = visibility deadline (unix ms)
//! {prefix}:queue:{name}:completed     score = completion time (unix ms)
//! {prefix}:queue:{name}:dead_letter   score = dead-letter time (unix ms)
//! {prefix}:queue:{name}:tasks         task_id -> JSON record
//! {prefix}:queue:{name}:arrivals:{ms} enqueue counter for one millisecond
//! ```
//!
//! The per-millisecond counter breaks ties between tasks of equal priority
//! arriving together, so pop order matches enqueue order across processes.
//!
//! Delivery is at-least-once: a task whose worker vanished is returned to
//! pending by [`TaskQueue::recover_stale_tasks`] once its deadline passes.

mod task;
mod task_queue;

pub use task::{
    pending_score, retry_backoff, NewTask, QueueStats, Task, TaskPriority, TaskStatus,
    ARRIVAL_EPOCH_MS, ARRIVAL_RANKS, PRIORITY_BAND,
};
pub use task_queue::TaskQueue;

use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by queue operations that report them
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("bad task record: {0}")]
    Record(#[from] serde_json::Error),
    #[error("invalid task: {0}")]
    Invalid(String),
}

/// Queue defaults
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Default visibility timeout for tasks that do not set one
    #[serde(with = "humantime_serde")]
    pub visibility_timeout: Duration,
    /// Default retry budget for tasks that do not set one
    pub max_retries: u32,
    /// Pause between polls of an empty queue while waiting in dequeue
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Upper bound of the exponential retry delay
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(300),
            max_retries: 3,
            poll_interval: Duration::from_millis(100),
            max_backoff: Duration::from_secs(3600),
        }
    }
}

impl QueueConfig {
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }
}

/// Store keys of one queue
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueKeys {
    pub pending: String,
    pub processing: String,
    pub completed: String,
    pub failed: String,
    pub dead_letter: String,
    pub tasks: String,
    /// Prefix of the per-millisecond arrival counters
    pub arrivals: String,
}

impl QueueKeys {
    pub fn new(key_prefix: &str, name: &str) -> Self {
        let base = format!("{}:queue:{}", key_prefix, name);
        Self {
            pending: format!("{}:pending", base),
            processing: format!("{}:processing", base),
            completed: format!("{}:completed", base),
            failed: format!("{}:failed", base),
            dead_letter: format!("{}:dead_letter", base),
            tasks: format!("{}:tasks", base),
            arrivals: format!("{}:arrivals", base),
        }
    }
}
