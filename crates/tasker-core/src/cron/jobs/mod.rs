//! Built-in batch jobs.
//!
//! Every job is a bounded scan followed by one side effect per row. A failed
//! row is logged and skipped, except in auto-archive, which is all-or-error.

mod auto_archive;
mod due_date_reminders;
mod overdue_notifications;
mod weekly_reports;

pub use auto_archive::AutoArchiveJob;
pub use due_date_reminders::DueDateRemindersJob;
pub use overdue_notifications::OverdueNotificationsJob;
pub use weekly_reports::WeeklyReportsJob;

use std::collections::BTreeMap;

use super::context::JobContext;
use super::job::{JobError, JobSummary};
use crate::domain::Todo;
use crate::tasks::{ReminderEmail, ReminderKind};

fn validate(ctx: &JobContext) -> Result<(), JobError> {
    ctx.config.validate().map_err(JobError::Validation)
}

/// Enqueue one reminder per todo. Enqueue failures are logged and counted.
async fn enqueue_reminders(ctx: &JobContext, todos: &[Todo], kind: ReminderKind) -> JobSummary {
    let cap = ctx.config.max_todos_per_user_notification;
    let mut per_user: BTreeMap<&str, usize> = BTreeMap::new();
    let mut summary = JobSummary {
        scanned: todos.len(),
        ..JobSummary::default()
    };

    for todo in todos {
        let count = per_user.entry(todo.user_id.as_str()).or_default();
        if *count < cap {
            *count += 1;
        }

        let Some(due_date) = todo.due_date else {
            tracing::warn!(todo_id = %todo.id, "todo has no due date, skipping");
            summary.failed += 1;
            continue;
        };
        let reminder = ReminderEmail {
            user_id: todo.user_id.clone(),
            todo_id: todo.id,
            todo_title: todo.title.clone(),
            due_date,
            kind,
        };

        match ctx.producer.enqueue(&reminder).await {
            Ok(task_id) => {
                summary.succeeded += 1;
                tracing::info!(
                    %task_id,
                    todo_id = %todo.id,
                    todo_title = %todo.title,
                    user_id = %todo.user_id,
                    kind = kind.as_str(),
                    "enqueued reminder"
                );
            }
            Err(e) => {
                summary.failed += 1;
                tracing::error!(
                    error = %e,
                    todo_id = %todo.id,
                    user_id = %todo.user_id,
                    kind = kind.as_str(),
                    "failed to enqueue reminder"
                );
            }
        }
    }

    tracing::info!(
        enqueued_count = summary.succeeded,
        total_todos = summary.scanned,
        kind = kind.as_str(),
        "reminders enqueued"
    );
    for (user_id, count) in per_user {
        tracing::info!(user_id, reminder_count = count, "user reminders enqueued");
    }
    summary
}

#[cfg(test)]
pub(crate) mod testkit {
    //! Shared fixture for the job tests.

    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use uuid::Uuid;

    use crate::broker::{Broker, InMemoryBroker};
    use crate::config::CronConfig;
    use crate::cron::JobContext;
    use crate::domain::{Priority, RunId, Todo, TodoStatus, UserBatchStat};
    use crate::impls::InMemoryTodoStore;
    use crate::ports::{Clock, FixedClock, StoreError, TodoStore, UserDirectory};
    use crate::producer::Producer;

    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap()
    }

    pub fn todo(user: &str, status: TodoStatus) -> Todo {
        Todo {
            id: Uuid::new_v4(),
            user_id: user.to_string(),
            title: format!("{user} todo"),
            status,
            priority: Priority::Medium,
            due_date: None,
            completed_at: None,
            created_at: now() - Duration::days(60),
        }
    }

    pub struct Fixture {
        pub store: Arc<InMemoryTodoStore>,
        pub broker: Arc<InMemoryBroker>,
        pub ctx: JobContext,
    }

    pub fn fixture(config: CronConfig) -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(now()));
        let store = Arc::new(InMemoryTodoStore::new());
        let broker = Arc::new(InMemoryBroker::with_clock(Arc::clone(&clock)));
        let ctx = JobContext {
            run_id: RunId::generate(),
            config,
            store: Arc::clone(&store) as Arc<dyn TodoStore>,
            producer: Producer::with_clock(
                Arc::clone(&broker) as Arc<dyn Broker>,
                Arc::clone(&clock),
            ),
            directory: Arc::clone(&store) as Arc<dyn UserDirectory>,
            clock,
        };
        Fixture { store, broker, ctx }
    }

    /// Wraps the in-memory store and injects failures.
    #[derive(Default)]
    pub struct FaultyStore {
        pub inner: Arc<InMemoryTodoStore>,
        /// Per-user list fetches fail.
        pub fail_user_lists: bool,
        /// Another writer archives the first selected todo just before
        /// `archive_todos` runs.
        pub archive_race: bool,
    }

    impl FaultyStore {
        pub fn over(inner: Arc<InMemoryTodoStore>) -> Self {
            Self {
                inner,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl TodoStore for FaultyStore {
        async fn todos_due_within(
            &self,
            now: DateTime<Utc>,
            hours: u32,
            limit: usize,
        ) -> Result<Vec<Todo>, StoreError> {
            self.inner.todos_due_within(now, hours, limit).await
        }

        async fn overdue_todos(
            &self,
            now: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<Todo>, StoreError> {
            self.inner.overdue_todos(now, limit).await
        }

        async fn completed_todos_older_than(
            &self,
            cutoff: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<Todo>, StoreError> {
            self.inner.completed_todos_older_than(cutoff, limit).await
        }

        async fn weekly_stats(
            &self,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> Result<Vec<UserBatchStat>, StoreError> {
            self.inner.weekly_stats(since, until).await
        }

        async fn completed_todos_for_user(
            &self,
            user_id: &str,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<Todo>, StoreError> {
            if self.fail_user_lists {
                return Err(StoreError::Other("connection reset".to_string()));
            }
            self.inner
                .completed_todos_for_user(user_id, since, until, limit)
                .await
        }

        async fn overdue_todos_for_user(
            &self,
            user_id: &str,
            now: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<Todo>, StoreError> {
            if self.fail_user_lists {
                return Err(StoreError::Other("connection reset".to_string()));
            }
            self.inner.overdue_todos_for_user(user_id, now, limit).await
        }

        async fn archive_todos(&self, ids: &[Uuid]) -> Result<usize, StoreError> {
            if self.archive_race {
                if let Some(mut first) = self.inner.get(ids[0]).await {
                    first.status = TodoStatus::Archived;
                    self.inner.insert(first).await;
                }
            }
            self.inner.archive_todos(ids).await
        }
    }
}
