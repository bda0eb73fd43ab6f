// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task records and scheduling arithmetic

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Origin of the arrival axis in pending scores: 2025-01-01T00:00:00Z
pub const ARRIVAL_EPOCH_MS: i64 = 1_735_689_600_000;

/// Width of one priority band in the pending score: 2^41 ms of arrival time,
/// about 69 years past the epoch.
///
/// Scores stay below 2^43, which leaves ten fractional bits of an f64 for the
/// arrival rank while every score remains exact.
pub const PRIORITY_BAND: f64 = 2_199_023_255_552.0;

/// Enqueues within one millisecond that keep distinct scores
pub const ARRIVAL_RANKS: u32 = 1024;

/// Task priority; serialized as its integer value
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TaskPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl TaskPriority {
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl From<TaskPriority> for u8 {
    fn from(priority: TaskPriority) -> Self {
        priority.value()
    }
}

impl TryFrom<u8> for TaskPriority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TaskPriority::Low),
            1 => Ok(TaskPriority::Normal),
            2 => Ok(TaskPriority::High),
            3 => Ok(TaskPriority::Critical),
            other => Err(format!("unknown task priority {}", other)),
        }
    }
}

/// Where a task is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    DeadLetter,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::DeadLetter => "dead_letter",
        };
        write!(f, "{}", s)
    }
}

/// A unit of work to submit to a queue
#[derive(Clone, Debug, PartialEq)]
pub struct NewTask {
    pub task_id: Option<String>,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub priority: TaskPriority,
    /// Queue default when unset
    pub max_retries: Option<u32>,
    /// Visibility timeout; queue default when unset
    pub timeout: Option<Duration>,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            task_id: None,
            task_type: task_type.into(),
            payload,
            priority: TaskPriority::Normal,
            max_retries: None,
            timeout: None,
        }
    }

    pub fn with_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Durable task record, stored as JSON in the queue's task hash
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub priority: TaskPriority,
    pub max_retries: u32,
    /// Visibility timeout; fractional seconds on the wire
    #[serde(with = "secs_f64")]
    pub timeout: Duration,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
}

impl Task {
    /// Whether a failure now would be retried rather than dead-lettered
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_retries
    }
}

/// Set sizes of one queue
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead_letter: usize,
    pub total: usize,
}

/// Pending-set score: priority band plus an arrival component that shrinks
/// as arrival time grows, so pop-max yields the oldest task of the highest
/// priority.
///
/// `rank` orders tasks arriving in the same millisecond (1 for the first);
/// ranks past [`ARRIVAL_RANKS`] share the last slot.
pub fn pending_score(priority: TaskPriority, arrival_ms: i64, rank: u32) -> f64 {
    let band = PRIORITY_BAND as i64;
    let offset = arrival_ms.saturating_sub(ARRIVAL_EPOCH_MS).clamp(0, band - 1);
    let rank = rank.clamp(1, ARRIVAL_RANKS);
    let fraction = f64::from(ARRIVAL_RANKS - rank) / f64::from(ARRIVAL_RANKS);
    f64::from(priority.value()) * PRIORITY_BAND + (band - 1 - offset) as f64 + fraction
}

/// Retry delay after the given number of attempts: `2^attempts` seconds,
/// capped at `max_backoff`
pub fn retry_backoff(attempts: u32, max_backoff: Duration) -> Duration {
    let secs = 2u64.checked_pow(attempts).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(max_backoff)
}

pub(crate) fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

mod secs_f64 {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
