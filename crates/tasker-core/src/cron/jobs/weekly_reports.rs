use async_trait::async_trait;
use chrono::Duration;

use super::validate;
use crate::cron::{CronJob, JobContext, JobError, JobSummary};
use crate::domain::{Todo, TodoSummary};
use crate::ports::StoreError;
use crate::tasks::WeeklyReportEmail;

const REPORT_WINDOW_DAYS: i64 = 7;

/// Items listed per section of one report.
const REPORT_LIST_LIMIT: usize = 10;

/// One productivity report per active user over the last seven days.
pub struct WeeklyReportsJob;

/// A failed fetch becomes an empty list; the report still goes out.
fn or_empty(result: Result<Vec<Todo>, StoreError>, user_id: &str, what: &str) -> Vec<TodoSummary> {
    match result {
        Ok(todos) => todos.iter().map(TodoSummary::from).collect(),
        Err(e) => {
            tracing::error!(error = %e, user_id, what, "failed to fetch todos for report");
            Vec::new()
        }
    }
}

#[async_trait]
impl CronJob for WeeklyReportsJob {
    fn name(&self) -> &'static str {
        "weekly-reports"
    }

    fn description(&self) -> &'static str {
        "Enqueue weekly productivity reports"
    }

    async fn run(&self, ctx: &JobContext) -> Result<JobSummary, JobError> {
        validate(ctx)?;
        let now = ctx.clock.now();
        let week_ago = now - Duration::days(REPORT_WINDOW_DAYS);

        let mut stats = ctx.store.weekly_stats(week_ago, now).await?;
        if stats.len() > ctx.config.batch_size {
            tracing::warn!(
                user_count = stats.len(),
                batch_size = ctx.config.batch_size,
                "more active users than batch size, reporting the first batch only"
            );
            stats.truncate(ctx.config.batch_size);
        }
        tracing::info!(user_count = stats.len(), "generating weekly reports");

        let mut summary = JobSummary {
            scanned: stats.len(),
            ..JobSummary::default()
        };
        for stat in &stats {
            let user_id = stat.user_id.as_str();
            let completed = ctx
                .store
                .completed_todos_for_user(user_id, week_ago, now, REPORT_LIST_LIMIT)
                .await;
            let overdue = ctx
                .store
                .overdue_todos_for_user(user_id, now, REPORT_LIST_LIMIT)
                .await;

            let report = WeeklyReportEmail {
                user_id: stat.user_id.clone(),
                week_start: week_ago,
                week_end: now,
                completed_count: stat.completed_count,
                active_count: stat.active_count,
                overdue_count: stat.overdue_count,
                completed_todos: or_empty(completed, user_id, "completed"),
                overdue_todos: or_empty(overdue, user_id, "overdue"),
            };

            match ctx.producer.enqueue(&report).await {
                Ok(task_id) => {
                    summary.succeeded += 1;
                    tracing::info!(
                        %task_id,
                        user_id,
                        created = stat.created_count,
                        completed = stat.completed_count,
                        active = stat.active_count,
                        overdue = stat.overdue_count,
                        "enqueued weekly report"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(error = %e, user_id, "failed to enqueue weekly report");
                }
            }
        }

        tracing::info!(
            enqueued_count = summary.succeeded,
            total_users = summary.scanned,
            "weekly reports enqueued"
        );
        Ok(summary)
    }
}
