//! TodoStore port - the relational store scanned by the cron jobs.
//!
//! Query construction lives in the adapters (`impls::SqliteTodoStore`,
//! `impls::InMemoryTodoStore`). Every scan takes `now` explicitly so the
//! adapters never read the wall clock themselves.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Todo, UserBatchStat};

/// Store failures, classified the way the caller's error mapping needs them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait TodoStore: Send + Sync {
    /// Unfinished todos due in `(now, now + hours]`, earliest due first.
    async fn todos_due_within(
        &self,
        now: DateTime<Utc>,
        hours: u32,
        limit: usize,
    ) -> Result<Vec<Todo>, StoreError>;

    /// Unfinished todos due before `now`, earliest due first.
    async fn overdue_todos(&self, now: DateTime<Utc>, limit: usize)
    -> Result<Vec<Todo>, StoreError>;

    /// Completed todos with `completed_at < cutoff`, oldest completion first.
    async fn completed_todos_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Todo>, StoreError>;

    /// Per-user counts for every active user over `[since, until]`.
    ///
    /// A user is active when they own a non-archived todo, or created or
    /// completed one inside the window.
    async fn weekly_stats(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<UserBatchStat>, StoreError>;

    /// Todos the user completed inside `[since, until]`, most recent first.
    async fn completed_todos_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Todo>, StoreError>;

    /// The user's unfinished todos due before `now`, earliest due first.
    async fn overdue_todos_for_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Todo>, StoreError>;

    /// Move the given completed todos to `archived` in one transition.
    ///
    /// Returns the number of rows actually transitioned. Rows that are no
    /// longer `completed` are left alone and not counted.
    async fn archive_todos(&self, ids: &[Uuid]) -> Result<usize, StoreError>;

    /// Release the underlying connection. Further calls may fail.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
