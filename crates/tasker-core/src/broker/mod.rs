//! Broker: durable, at-least-once task store.
//!
//! Design intent:
//! - The broker owns task state transitions (Pending -> Leased -> ...).
//! - Workers execute side effects and report the result with the lease token.
//! - A lease that is neither acked nor nacked expires and the task becomes
//!   visible again, so a crashed worker never loses a task.

mod memory;
mod record;
mod retry;
mod sqlite;

pub use memory::InMemoryBroker;
pub use record::{LeaseHold, TaskRecord};
pub use retry::RetryPolicy;
pub use sqlite::SqliteBroker;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{LeaseToken, QueueName, Task, TaskId, TaskState};
use crate::error::TaskerError;

/// A task claimed by one worker.
#[derive(Debug, Clone)]
pub struct Lease {
    pub task: Task,
    pub token: LeaseToken,
    pub expires_at: DateTime<Utc>,
}

/// Snapshot of a task for introspection.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInfo {
    pub task: Task,
    pub state: TaskState,
    pub last_error: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub leased: usize,
    pub done: usize,
    pub dead_lettered: usize,
}

impl QueueCounts {
    pub fn add(&mut self, state: TaskState) {
        match state {
            TaskState::Pending => self.pending += 1,
            TaskState::Leased => self.leased += 1,
            TaskState::Done => self.done += 1,
            TaskState::DeadLettered => self.dead_lettered += 1,
        }
    }
}

/// Broker port.
///
/// Implementations must be safe for any number of concurrent producers and
/// consumers without caller-side locking, and `lease` must be atomic: one
/// visible task goes to exactly one caller.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Store a new task. Durable once this returns `Ok`.
    async fn enqueue(&self, task: Task) -> Result<TaskId, TaskerError>;

    /// Claim one visible task, trying `queues` in the given order.
    ///
    /// Returns `None` when every listed queue is empty (or only holds tasks
    /// that are still backing off).
    async fn lease(
        &self,
        queues: &[QueueName],
        lease_timeout: Duration,
    ) -> Result<Option<Lease>, TaskerError>;

    /// Mark success.
    async fn ack(&self, id: TaskId, token: LeaseToken) -> Result<(), TaskerError>;

    /// Record a failed attempt and make the task visible again after `retry_delay`.
    async fn nack(
        &self,
        id: TaskId,
        token: LeaseToken,
        retry_delay: Duration,
        error: &str,
    ) -> Result<(), TaskerError>;

    /// Terminal failure; the task is never leased again.
    async fn dead_letter(
        &self,
        id: TaskId,
        token: LeaseToken,
        reason: &str,
    ) -> Result<(), TaskerError>;

    async fn get(&self, id: TaskId) -> Result<Option<TaskInfo>, TaskerError>;

    async fn counts(&self) -> Result<QueueCounts, TaskerError>;

    /// Release connections. Subsequent calls fail with `TaskerError::Broker`.
    async fn close(&self) -> Result<(), TaskerError> {
        Ok(())
    }
}

pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}
