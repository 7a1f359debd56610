//! Task record: the broker's bookkeeping around a task.

use chrono::{DateTime, Utc};

use crate::domain::{LeaseToken, Task, TaskState};

/// Current lease on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseHold {
    pub token: LeaseToken,
    pub expires_at: DateTime<Utc>,
}

/// Metadata + task for one entry in the broker.
///
/// Design:
/// - This is the single source of truth for task state.
/// - Queue indexes hold `TaskId` only.
/// - All state transitions happen here.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task: Task,
    pub state: TaskState,
    pub lease: Option<LeaseHold>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(task: Task, now: DateTime<Utc>) -> Self {
        Self {
            task,
            state: TaskState::Pending,
            lease: None,
            last_error: None,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn holds(&self, token: LeaseToken) -> bool {
        self.state == TaskState::Leased && self.lease.is_some_and(|l| l.token == token)
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskState::Leased && self.lease.is_some_and(|l| l.expires_at <= now)
    }

    pub fn start_lease(&mut self, token: LeaseToken, expires_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.state = TaskState::Leased;
        self.lease = Some(LeaseHold { token, expires_at });
        self.updated_at = now;
    }

    pub fn mark_done(&mut self, now: DateTime<Utc>) {
        self.state = TaskState::Done;
        self.lease = None;
        self.updated_at = now;
        self.finished_at = Some(now);
    }

    pub fn mark_dead(&mut self, error: String, now: DateTime<Utc>) {
        self.state = TaskState::DeadLettered;
        self.lease = None;
        self.last_error = Some(error);
        self.updated_at = now;
        self.finished_at = Some(now);
    }

    /// Back to pending after a failed attempt; counts the failure.
    pub fn schedule_retry(&mut self, visible_at: DateTime<Utc>, error: String, now: DateTime<Utc>) {
        self.state = TaskState::Pending;
        self.lease = None;
        self.task.retry_count += 1;
        self.task.next_visible_at = visible_at;
        self.last_error = Some(error);
        self.updated_at = now;
    }

    /// Lease ran out without ack/nack. The attempt is not counted.
    pub fn expire_lease(&mut self, now: DateTime<Utc>) {
        self.state = TaskState::Pending;
        self.lease = None;
        self.task.next_visible_at = now;
        self.updated_at = now;
    }
}
