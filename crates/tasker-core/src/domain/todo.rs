//! Todo rows as seen by the batch jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Draft,
    Active,
    Completed,
    Archived,
}

impl TodoStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TodoStatus::Draft => "draft",
            TodoStatus::Active => "active",
            TodoStatus::Completed => "completed",
            TodoStatus::Archived => "archived",
        }
    }

    /// Completed and archived todos no longer get reminders.
    pub fn is_finished(self) -> bool {
        matches!(self, TodoStatus::Completed | TodoStatus::Archived)
    }
}

impl fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TodoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(TodoStatus::Draft),
            "active" => Ok(TodoStatus::Active),
            "completed" => Ok(TodoStatus::Completed),
            "archived" => Ok(TodoStatus::Archived),
            other => Err(format!("unknown todo status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub status: TodoStatus,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// The part of a todo that travels inside a report payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoSummary {
    pub id: Uuid,
    pub title: String,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Todo> for TodoSummary {
    fn from(todo: &Todo) -> Self {
        Self {
            id: todo.id,
            title: todo.title.clone(),
            priority: todo.priority,
            due_date: todo.due_date,
            completed_at: todo.completed_at,
        }
    }
}

/// Per-user aggregate over the weekly report window. Computed per run, never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBatchStat {
    pub user_id: String,
    pub created_count: u32,
    pub completed_count: u32,
    pub active_count: u32,
    pub overdue_count: u32,
}
