use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::TaskId;

/// Task type identifier, e.g. `email:reminder`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Name of a broker queue (`critical`, `default`, `low`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for QueueName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A unit of work as stored by the broker.
///
/// `payload` is opaque to the broker; only the handler registered for
/// `task_type` knows how to decode it. `queue`, `max_retry` and `timeout` are
/// fixed when the task is built and never change afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub payload: Vec<u8>,
    pub queue: QueueName,
    pub max_retry: u32,
    pub timeout: Duration,
    pub enqueued_at: DateTime<Utc>,
    /// Failed attempts so far. Incremented only by `nack`.
    pub retry_count: u32,
    pub next_visible_at: DateTime<Utc>,
}

impl Task {
    /// Build a fresh, immediately visible task.
    pub fn new(
        id: TaskId,
        task_type: TaskType,
        payload: Vec<u8>,
        queue: QueueName,
        max_retry: u32,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_type,
            payload,
            queue,
            max_retry,
            timeout,
            enqueued_at: now,
            retry_count: 0,
            next_visible_at: now,
        }
    }

    /// Whether one more failure still leaves room for a retry.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(max_retry: u32, retry_count: u32) -> Task {
        let mut t = Task::new(
            TaskId::generate(),
            TaskType::new("t"),
            vec![],
            QueueName::new("default"),
            max_retry,
            Duration::from_secs(1),
            Utc::now(),
        );
        t.retry_count = retry_count;
        t
    }

    #[test]
    fn retry_budget_is_inclusive_of_max_retry() {
        assert!(task(3, 0).can_retry());
        assert!(task(3, 2).can_retry());
        assert!(!task(3, 3).can_retry());
        assert!(!task(0, 0).can_retry());
    }
}
