use async_trait::async_trait;

use super::{enqueue_reminders, validate};
use crate::cron::{CronJob, JobContext, JobError, JobSummary};
use crate::tasks::ReminderKind;

/// Reminds owners of unfinished todos due within `reminder_hours`.
pub struct DueDateRemindersJob;

#[async_trait]
impl CronJob for DueDateRemindersJob {
    fn name(&self) -> &'static str {
        "due-date-reminders"
    }

    fn description(&self) -> &'static str {
        "Enqueue email reminders for todos due soon"
    }

    async fn run(&self, ctx: &JobContext) -> Result<JobSummary, JobError> {
        validate(ctx)?;
        let hours = ctx.config.reminder_hours;

        let todos = ctx
            .store
            .todos_due_within(ctx.clock.now(), hours, ctx.config.batch_size)
            .await?;
        tracing::info!(todo_count = todos.len(), hours, "found todos due soon");

        Ok(enqueue_reminders(ctx, &todos, ReminderKind::DueDateReminder).await)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::config::CronConfig;
    use crate::cron::jobs::testkit::{fixture, now, todo};
    use crate::domain::{TaskState, TodoStatus};
    use crate::tasks::ReminderEmail;
    use crate::typed::PayloadCodec;

    #[tokio::test]
    async fn enqueues_only_todos_inside_the_window() {
        let f = fixture(CronConfig::default());
        for (hours, status) in [
            (1, TodoStatus::Active),
            (24, TodoStatus::Draft),
            (25, TodoStatus::Active),
            (-1, TodoStatus::Active),
            (2, TodoStatus::Completed),
        ] {
            let mut t = todo("u1", status);
            t.due_date = Some(now() + Duration::hours(hours));
            f.store.insert(t).await;
        }

        let summary = DueDateRemindersJob.run(&f.ctx).await.unwrap();
        assert_eq!(
            summary,
            JobSummary {
                scanned: 2,
                succeeded: 2,
                failed: 0
            }
        );

        let pending = f.broker.tasks_in(TaskState::Pending).await;
        assert_eq!(pending.len(), 2);
        for info in pending {
            let reminder: ReminderEmail = PayloadCodec::decode(&info.task.payload).unwrap();
            assert_eq!(reminder.kind, ReminderKind::DueDateReminder);
            assert!(reminder.due_date > now());
            assert!(reminder.due_date <= now() + Duration::hours(24));
        }
    }

    #[tokio::test]
    async fn never_exceeds_batch_size() {
        let f = fixture(CronConfig {
            batch_size: 3,
            ..CronConfig::default()
        });
        for h in 1..=10 {
            let mut t = todo("u1", TodoStatus::Active);
            t.due_date = Some(now() + Duration::hours(h));
            f.store.insert(t).await;
        }

        let summary = DueDateRemindersJob.run(&f.ctx).await.unwrap();
        assert_eq!(summary.scanned, 3);
        assert_eq!(f.broker.tasks_in(TaskState::Pending).await.len(), 3);
    }

    #[tokio::test]
    async fn invalid_parameters_abort_before_enqueueing() {
        let f = fixture(CronConfig {
            reminder_hours: 0,
            ..CronConfig::default()
        });
        let mut t = todo("u1", TodoStatus::Active);
        t.due_date = Some(now() + Duration::hours(1));
        f.store.insert(t).await;

        let err = DueDateRemindersJob.run(&f.ctx).await.unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
        assert!(f.broker.tasks_in(TaskState::Pending).await.is_empty());
    }
}
