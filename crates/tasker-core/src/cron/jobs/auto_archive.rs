use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

use super::validate;
use crate::cron::{CronJob, JobContext, JobError, JobSummary};

/// Moves long-completed todos to `archived` in one bulk update.
///
/// Unlike the notification jobs this is all-or-error: if fewer rows change
/// than were selected, the run fails.
pub struct AutoArchiveJob;

#[async_trait]
impl CronJob for AutoArchiveJob {
    fn name(&self) -> &'static str {
        "auto-archive"
    }

    fn description(&self) -> &'static str {
        "Archive old completed todos"
    }

    async fn run(&self, ctx: &JobContext) -> Result<JobSummary, JobError> {
        validate(ctx)?;
        let cutoff = ctx.clock.now() - Duration::days(i64::from(ctx.config.archive_days_threshold));
        tracing::info!(cutoff_date = %cutoff, "searching for completed todos to archive");

        let todos = ctx
            .store
            .completed_todos_older_than(cutoff, ctx.config.batch_size)
            .await?;
        tracing::info!(todo_count = todos.len(), "found completed todos to archive");

        if todos.is_empty() {
            tracing::info!("no todos to archive");
            return Ok(JobSummary::default());
        }

        let ids: Vec<Uuid> = todos.iter().map(|t| t.id).collect();
        let mut per_user: BTreeMap<&str, usize> = BTreeMap::new();
        for todo in &todos {
            *per_user.entry(todo.user_id.as_str()).or_default() += 1;
        }

        let archived = ctx.store.archive_todos(&ids).await?;
        if archived != ids.len() {
            return Err(JobError::PartialArchive {
                expected: ids.len(),
                archived,
            });
        }

        tracing::info!(archived_count = archived, "archived todos");
        for (user_id, count) in per_user {
            tracing::info!(user_id, archived_count = count, "user todos archived");
        }

        Ok(JobSummary {
            scanned: todos.len(),
            succeeded: archived,
            failed: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CronConfig;
    use crate::cron::jobs::testkit::{FaultyStore, fixture, now, todo};
    use crate::ports::TodoStore;
    use std::sync::Arc;
    use crate::domain::{Todo, TodoStatus};

    fn completed_days_ago(user: &str, days: i64) -> Todo {
        let mut t = todo(user, TodoStatus::Completed);
        t.completed_at = Some(now() - Duration::days(days));
        t
    }

    #[tokio::test]
    async fn archives_everything_eligible_then_finds_nothing() {
        let f = fixture(CronConfig {
            batch_size: 5,
            ..CronConfig::default()
        });
        let old: Vec<Todo> = (0..5).map(|i| completed_days_ago("u1", 31 + i)).collect();
        for t in &old {
            f.store.insert(t.clone()).await;
        }
        let fresh = completed_days_ago("u1", 3);
        f.store.insert(fresh.clone()).await;

        let first = AutoArchiveJob.run(&f.ctx).await.unwrap();
        assert_eq!(first.succeeded, 5);
        for t in &old {
            assert_eq!(f.store.get(t.id).await.unwrap().status, TodoStatus::Archived);
        }
        assert_eq!(
            f.store.get(fresh.id).await.unwrap().status,
            TodoStatus::Completed
        );

        let second = AutoArchiveJob.run(&f.ctx).await.unwrap();
        assert_eq!(second, JobSummary::default());
    }

    #[tokio::test]
    async fn zero_threshold_is_rejected() {
        let f = fixture(CronConfig {
            archive_days_threshold: 0,
            ..CronConfig::default()
        });
        let t = completed_days_ago("u1", 90);
        f.store.insert(t.clone()).await;

        assert!(matches!(
            AutoArchiveJob.run(&f.ctx).await,
            Err(JobError::Validation(_))
        ));
        assert_eq!(f.store.get(t.id).await.unwrap().status, TodoStatus::Completed);
    }

    #[tokio::test]
    async fn row_changed_between_select_and_archive_fails_the_run() {
        let mut f = fixture(CronConfig::default());
        let old: Vec<Todo> = (0..3).map(|i| completed_days_ago("u1", 40 + i)).collect();
        for t in &old {
            f.store.insert(t.clone()).await;
        }
        f.ctx.store = Arc::new(FaultyStore {
            archive_race: true,
            ..FaultyStore::over(Arc::clone(&f.store))
        }) as Arc<dyn TodoStore>;

        let err = AutoArchiveJob.run(&f.ctx).await.unwrap_err();

        assert!(
            matches!(
                err,
                JobError::PartialArchive {
                    expected: 3,
                    archived: 2
                }
            ),
            "{err}"
        );
    }
}
