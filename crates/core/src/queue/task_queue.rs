// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store-backed task queue

use super::task::{millis, pending_score, retry_backoff};
use super::{NewTask, QueueConfig, QueueError, QueueKeys, QueueStats, Task, TaskStatus};
use crate::clock::{Clock, SystemClock};
use crate::id::{default_worker_id, IdGen, UuidIdGen};
use crate::store::{CoordinationStore, StoreError};
use std::time::Duration;
use tokio::time::Instant;

const RECOVERY_ERROR: &str = "visibility timeout exceeded";

/// How long an arrival counter outlives its millisecond
const ARRIVAL_COUNTER_TTL: Duration = Duration::from_secs(60);

/// Handle to a named queue
///
/// Handles are cheap to clone; all state lives in the store.
#[derive(Clone)]
pub struct TaskQueue<S, C = SystemClock, I = UuidIdGen> {
    store: S,
    clock: C,
    id_gen: I,
    name: String,
    keys: QueueKeys,
    config: QueueConfig,
    worker_id: String,
}

impl<S: CoordinationStore> TaskQueue<S> {
    pub fn new(store: S, key_prefix: &str, name: impl Into<String>, config: QueueConfig) -> Self {
        Self::with_deps(store, SystemClock, UuidIdGen, key_prefix, name, config)
    }
}

impl<S: CoordinationStore, C: Clock, I: IdGen> TaskQueue<S, C, I> {
    pub fn with_deps(
        store: S,
        clock: C,
        id_gen: I,
        key_prefix: &str,
        name: impl Into<String>,
        config: QueueConfig,
    ) -> Self {
        let name = name.into();
        Self {
            store,
            clock,
            id_gen,
            keys: QueueKeys::new(key_prefix, &name),
            name,
            config,
            worker_id: default_worker_id(),
        }
    }

    /// Identity recorded on tasks this handle dequeues
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn load(&self, task_id: &str) -> Result<Option<Task>, QueueError> {
        match self.store.hget(&self.keys.tasks, task_id).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, task: &Task) -> Result<(), QueueError> {
        let record = serde_json::to_string(task)?;
        self.store
            .hset(&self.keys.tasks, &task.task_id, &record)
            .await?;
        Ok(())
    }

    /// Rank of a new arrival among those scored at `arrival_ms`, counted in
    /// the store so every process sees the same order
    async fn arrival_rank(&self, arrival_ms: i64) -> Result<u32, StoreError> {
        let key = format!("{}:{}", self.keys.arrivals, arrival_ms);
        let rank = self.store.hincr_by(&key, "rank", 1).await?;
        let ahead = arrival_ms.saturating_sub(self.clock.now_millis()).max(0);
        let ttl = Duration::from_millis(ahead.unsigned_abs()) + ARRIVAL_COUNTER_TTL;
        self.store.expire(&key, ttl).await?;
        Ok(u32::try_from(rank).unwrap_or(u32::MAX))
    }

    async fn push_pending(&self, task: &Task, arrival_ms: i64) -> Result<(), StoreError> {
        let rank = self.arrival_rank(arrival_ms).await?;
        self.store
            .zadd(
                &self.keys.pending,
                &task.task_id,
                pending_score(task.priority, arrival_ms, rank),
            )
            .await
    }

    /// Submit a task; returns its id.
    ///
    /// Unlike the other operations, failures are returned: the caller must
    /// know when a task was not accepted.
    pub async fn enqueue(&self, new_task: NewTask) -> Result<String, QueueError> {
        let timeout = new_task.timeout.unwrap_or(self.config.visibility_timeout);
        if timeout.is_zero() {
            return Err(QueueError::Invalid("visibility timeout must be positive".into()));
        }

        let now = self.clock.now();
        let task = Task {
            task_id: new_task.task_id.unwrap_or_else(|| self.id_gen.next()),
            task_type: new_task.task_type,
            payload: new_task.payload,
            priority: new_task.priority,
            max_retries: new_task.max_retries.unwrap_or(self.config.max_retries),
            timeout,
            attempts: 0,
            last_error: None,
            worker_id: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            status: TaskStatus::Pending,
        };

        self.save(&task).await?;
        self.push_pending(&task, now.timestamp_millis()).await?;

        tracing::debug!(
            queue = %self.name,
            task_id = %task.task_id,
            task_type = %task.task_type,
            priority = task.priority.value(),
            "task enqueued"
        );
        Ok(task.task_id)
    }

    /// Take the highest-priority pending task.
    ///
    /// Without a timeout an empty queue yields `None` at once; with one, the
    /// queue is polled every `poll_interval` until the timeout elapses.
    pub async fn dequeue(&self, timeout: Option<Duration>) -> Option<Task> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            match self.try_dequeue().await {
                Ok(Some(task)) => return Some(task),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(queue = %self.name, error = %e, "dequeue failed");
                    return None;
                }
            }

            let deadline = deadline?;
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    async fn try_dequeue(&self) -> Result<Option<Task>, QueueError> {
        loop {
            let Some((task_id, score)) = self.store.zpop_max(&self.keys.pending).await? else {
                return Ok(None);
            };
            match self.claim(&task_id).await {
                Ok(Some(task)) => return Ok(Some(task)),
                Ok(None) => {
                    tracing::warn!(queue = %self.name, task_id = %task_id, "skipping orphaned task id");
                }
                Err(QueueError::Record(e)) => {
                    tracing::warn!(queue = %self.name, task_id = %task_id, error = %e, "dead-lettering unreadable task");
                    let now_ms = self.clock.now_millis() as f64;
                    if let Err(e) = self.store.zadd(&self.keys.dead_letter, &task_id, now_ms).await {
                        self.restore_pending(&task_id, score).await;
                        return Err(e.into());
                    }
                }
                Err(e) => {
                    self.restore_pending(&task_id, score).await;
                    return Err(e);
                }
            }
        }
    }

    /// Mark a popped task as processing by this worker
    async fn claim(&self, task_id: &str) -> Result<Option<Task>, QueueError> {
        let Some(mut task) = self.load(task_id).await? else {
            return Ok(None);
        };

        let now = self.clock.now();
        task.status = TaskStatus::Processing;
        task.started_at = Some(now);
        task.worker_id = Some(self.worker_id.clone());
        task.attempts += 1;
        self.save(&task).await?;

        let deadline = now.timestamp_millis().saturating_add(millis(task.timeout));
        self.store
            .zadd(&self.keys.processing, &task.task_id, deadline as f64)
            .await?;

        tracing::debug!(
            queue = %self.name,
            task_id = %task.task_id,
            attempt = task.attempts,
            "task dequeued"
        );
        Ok(Some(task))
    }

    /// Put a popped id back where it was after a failed claim
    async fn restore_pending(&self, task_id: &str, score: f64) {
        if let Err(e) = self.store.zadd(&self.keys.pending, task_id, score).await {
            tracing::error!(queue = %self.name, task_id, error = %e, "popped task could not be restored");
        }
    }

    /// Load a task that is currently in PROCESSING
    async fn load_processing(&self, task_id: &str) -> Result<Option<Task>, QueueError> {
        Ok(self.load(task_id).await?.filter(|task| {
            let processing = task.status == TaskStatus::Processing;
            if !processing {
                tracing::debug!(
                    queue = %self.name,
                    task_id,
                    status = %task.status,
                    "task is not processing"
                );
            }
            processing
        }))
    }

    /// Mark a processing task as done
    pub async fn complete(&self, task_id: &str) -> bool {
        match self.try_complete(task_id).await {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(queue = %self.name, task_id, error = %e, "complete failed");
                false
            }
        }
    }

    async fn try_complete(&self, task_id: &str) -> Result<bool, QueueError> {
        let Some(mut task) = self.load_processing(task_id).await? else {
            return Ok(false);
        };

        self.store.zrem(&self.keys.processing, task_id).await?;
        let now = self.clock.now();
        task.status = TaskStatus::Completed;
        task.completed_at = Some(now);
        self.save(&task).await?;
        self.store
            .zadd(&self.keys.completed, task_id, now.timestamp_millis() as f64)
            .await?;

        tracing::debug!(queue = %self.name, task_id, "task completed");
        Ok(true)
    }

    /// Record a failure of a processing task.
    ///
    /// With `retry` and budget left the task goes back to pending behind a
    /// `2^attempts` second backoff; otherwise it is dead-lettered.
    pub async fn fail(&self, task_id: &str, error: &str, retry: bool) -> bool {
        match self.try_fail(task_id, error, retry).await {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(queue = %self.name, task_id, error = %e, "recording failure failed");
                false
            }
        }
    }

    async fn try_fail(&self, task_id: &str, error: &str, retry: bool) -> Result<bool, QueueError> {
        let Some(mut task) = self.load_processing(task_id).await? else {
            return Ok(false);
        };

        self.store.zrem(&self.keys.processing, task_id).await?;
        task.last_error = Some(error.to_string());
        let now = self.clock.now();

        if retry && task.can_retry() {
            let delay = retry_backoff(task.attempts, self.config.max_backoff);
            let arrival = now.timestamp_millis().saturating_add(millis(delay));
            task.status = TaskStatus::Pending;
            self.save(&task).await?;
            self.push_pending(&task, arrival).await?;
            tracing::info!(
                queue = %self.name,
                task_id,
                attempt = task.attempts,
                ?delay,
                error,
                "task rescheduled"
            );
        } else {
            task.status = TaskStatus::DeadLetter;
            task.completed_at = Some(now);
            self.save(&task).await?;
            self.store
                .zadd(&self.keys.dead_letter, task_id, now.timestamp_millis() as f64)
                .await?;
            tracing::info!(
                queue = %self.name,
                task_id,
                attempts = task.attempts,
                error,
                "task dead-lettered"
            );
        }
        Ok(true)
    }

    /// Send tasks whose visibility deadline has passed back through `fail`
    /// with retry; returns how many were recovered
    pub async fn recover_stale_tasks(&self) -> usize {
        let now_ms = self.clock.now_millis() as f64;
        let expired = match self
            .store
            .zrange_by_score(&self.keys.processing, f64::NEG_INFINITY, now_ms)
            .await
        {
            Ok(expired) => expired,
            Err(e) => {
                tracing::warn!(queue = %self.name, error = %e, "stale task scan failed");
                return 0;
            }
        };

        let mut recovered = 0;
        for (task_id, _) in expired {
            match self.load_processing(&task_id).await {
                Ok(Some(_)) => {
                    if self.fail(&task_id, RECOVERY_ERROR, true).await {
                        recovered += 1;
                    }
                }
                Ok(None) => {
                    // Orphan or stray id: drop it from processing
                    tracing::warn!(queue = %self.name, task_id = %task_id, "removing stray processing id");
                    if let Err(e) = self.store.zrem(&self.keys.processing, &task_id).await {
                        tracing::warn!(queue = %self.name, task_id = %task_id, error = %e, "stray removal failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(queue = %self.name, task_id = %task_id, error = %e, "stale task load failed");
                }
            }
        }

        if recovered > 0 {
            tracing::info!(queue = %self.name, recovered, "recovered stale tasks");
        }
        recovered
    }

    /// Delete completed tasks finished more than `older_than` ago
    pub async fn purge_completed(&self, older_than: Duration) -> usize {
        let cutoff = self.clock.now_millis().saturating_sub(millis(older_than)) as f64;
        let old = match self
            .store
            .zrange_by_score(&self.keys.completed, f64::NEG_INFINITY, cutoff)
            .await
        {
            Ok(old) => old,
            Err(e) => {
                tracing::warn!(queue = %self.name, error = %e, "purge scan failed");
                return 0;
            }
        };

        let mut purged = 0;
        for (task_id, _) in old {
            let result = async {
                self.store.hdel(&self.keys.tasks, &task_id).await?;
                self.store.zrem(&self.keys.completed, &task_id).await
            };
            match result.await {
                Ok(_) => purged += 1,
                Err(e) => {
                    tracing::warn!(queue = %self.name, task_id = %task_id, error = %e, "purge failed")
                }
            }
        }

        if purged > 0 {
            tracing::info!(queue = %self.name, purged, "purged completed tasks");
        }
        purged
    }

    /// Set sizes; all zero if the store cannot be reached
    pub async fn stats(&self) -> QueueStats {
        let read = async {
            let mut stats = QueueStats {
                pending: self.store.zcard(&self.keys.pending).await?,
                processing: self.store.zcard(&self.keys.processing).await?,
                completed: self.store.zcard(&self.keys.completed).await?,
                failed: self.store.zcard(&self.keys.failed).await?,
                dead_letter: self.store.zcard(&self.keys.dead_letter).await?,
                total: 0,
            };
            stats.total = stats.pending
                + stats.processing
                + stats.completed
                + stats.failed
                + stats.dead_letter;
            Ok::<_, crate::store::StoreError>(stats)
        };
        match read.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(queue = %self.name, error = %e, "stats failed");
                QueueStats::default()
            }
        }
    }

    /// Current record of a task
    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        match self.load(task_id).await {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(queue = %self.name, task_id, error = %e, "task lookup failed");
                None
            }
        }
    }

    /// Dead-lettered tasks, most recent first
    pub async fn dead_letters(&self, limit: usize) -> Vec<Task> {
        let members = match self
            .store
            .zrange_by_score(&self.keys.dead_letter, f64::NEG_INFINITY, f64::INFINITY)
            .await
        {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(queue = %self.name, error = %e, "dead letter scan failed");
                return Vec::new();
            }
        };

        let mut tasks = Vec::new();
        for (task_id, _) in members.into_iter().rev().take(limit) {
            if let Some(task) = self.get_task(&task_id).await {
                tasks.push(task);
            }
        }
        tasks
    }

    /// Move a dead-lettered task back to pending with a fresh retry budget
    pub async fn requeue_dead_letter(&self, task_id: &str) -> bool {
        match self.try_requeue(task_id).await {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(queue = %self.name, task_id, error = %e, "requeue failed");
                false
            }
        }
    }

    async fn try_requeue(&self, task_id: &str) -> Result<bool, QueueError> {
        let Some(mut task) = self.load(task_id).await? else {
            return Ok(false);
        };
        if task.status != TaskStatus::DeadLetter {
            return Ok(false);
        }

        self.store.zrem(&self.keys.dead_letter, task_id).await?;
        task.status = TaskStatus::Pending;
        task.attempts = 0;
        task.completed_at = None;
        self.save(&task).await?;
        self.push_pending(&task, self.clock.now_millis()).await?;

        tracing::info!(queue = %self.name, task_id, "dead letter requeued");
        Ok(true)
    }
}

impl<S, C, I> std::fmt::Debug for TaskQueue<S, C, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.name)
            .field("worker_id", &self.worker_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "task_queue_tests.rs"]
mod tests;
