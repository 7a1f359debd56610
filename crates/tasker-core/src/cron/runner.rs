//! Runs one job once: build context → run → always close.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::Instrument;

use super::context::ContextFactory;
use super::job::{CronJob, JobError, JobSummary};
use super::registry::JobRegistry;
use crate::domain::RunId;
use crate::ports::{IdGenerator, SystemClock, UlidGenerator};

pub struct JobRunner {
    factory: Arc<dyn ContextFactory>,
    ids: Arc<dyn IdGenerator>,
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl JobRunner {
    pub fn new(factory: Arc<dyn ContextFactory>) -> Self {
        Self {
            factory,
            ids: Arc::new(UlidGenerator::new(SystemClock)),
        }
    }

    /// Look `name` up in `registry` and run it.
    pub async fn run_named(
        &self,
        registry: &JobRegistry,
        name: &str,
    ) -> Result<JobSummary, JobError> {
        let job = registry.get(name)?;
        self.run(job.as_ref()).await
    }

    pub async fn run(&self, job: &dyn CronJob) -> Result<JobSummary, JobError> {
        let run_id = self.ids.run_id();
        let span = tracing::info_span!("cron", job = job.name(), %run_id);
        self.run_in_span(job, run_id).instrument(span).await
    }

    async fn run_in_span(&self, job: &dyn CronJob, run_id: RunId) -> Result<JobSummary, JobError> {
        let ctx = self.factory.create(run_id).await?;
        tracing::info!("starting cron job");

        let result = match AssertUnwindSafe(job.run(&ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(JobError::Panicked(panic_message(&*panic))),
        };

        // closed on every path
        if let Err(e) = ctx.close().await {
            tracing::warn!(error = %e, "failed to release job context");
        }

        match &result {
            Ok(summary) => tracing::info!(
                scanned = summary.scanned,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "cron job completed successfully"
            ),
            Err(e) => tracing::error!(error = %e, "failed to run cron job"),
        }
        result
    }
}
