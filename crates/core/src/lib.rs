// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! tether-core: distributed coordination primitives
//!
//! This crate provides:
//! - [`DistributedLock`] and [`LockManager`]: leased mutual exclusion
//! - [`TaskQueue`]: priority work queue with retries and a dead-letter set
//! - [`StateSync`] and [`StateSyncManager`]: versioned replicated maps
//! - [`MaintenanceTask`]: periodic recovery and cleanup
//!
//! All of them run against a [`CoordinationStore`]. [`MemoryStore`] is an
//! in-process implementation for tests and single-node use.

pub mod clock;
pub mod config;
pub mod id;
pub mod lock;
pub mod maintenance;
pub mod queue;
pub mod store;
pub mod sync;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{ConfigError, TetherConfig};
pub use id::{default_worker_id, IdGen, SequentialIdGen, UuidIdGen};
pub use lock::{DistributedLock, LockConfig, LockError, LockGuard, LockInfo, LockManager, LockOwner};
pub use maintenance::{MaintenanceConfig, MaintenanceReport, MaintenanceTask};
pub use queue::{
    NewTask, QueueConfig, QueueError, QueueStats, Task, TaskPriority, TaskQueue, TaskStatus,
};
pub use store::{CoordinationStore, KeyTtl, MemoryStore, StoreError, Subscription};
pub use sync::{
    HandlerError, StateSync, StateSyncManager, StateUpdate, SyncConfig, SyncError, UpdateHandler,
};
