use async_trait::async_trait;

use super::{enqueue_reminders, validate};
use crate::cron::{CronJob, JobContext, JobError, JobSummary};
use crate::tasks::ReminderKind;

pub struct OverdueNotificationsJob;

#[async_trait]
impl CronJob for OverdueNotificationsJob {
    fn name(&self) -> &'static str {
        "overdue-notifications"
    }

    fn description(&self) -> &'static str {
        "Enqueue notifications for overdue todos"
    }

    async fn run(&self, ctx: &JobContext) -> Result<JobSummary, JobError> {
        validate(ctx)?;

        let todos = ctx
            .store
            .overdue_todos(ctx.clock.now(), ctx.config.batch_size)
            .await?;
        tracing::info!(todo_count = todos.len(), "found overdue todos");

        Ok(enqueue_reminders(ctx, &todos, ReminderKind::OverdueNotification).await)
    }
}
