//! Job registry: name → job, fixed at startup.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use super::job::{CronJob, JobError};
use super::jobs::{AutoArchiveJob, DueDateRemindersJob, OverdueNotificationsJob, WeeklyReportsJob};

#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<&'static str, Arc<dyn CronJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The four built-in batch jobs.
    pub fn with_builtin_jobs() -> Self {
        let builtin: [Arc<dyn CronJob>; 4] = [
            Arc::new(DueDateRemindersJob),
            Arc::new(OverdueNotificationsJob),
            Arc::new(WeeklyReportsJob),
            Arc::new(AutoArchiveJob),
        ];
        Self {
            jobs: builtin.into_iter().map(|job| (job.name(), job)).collect(),
        }
    }

    /// Names must be unique.
    pub fn register(&mut self, job: Arc<dyn CronJob>) -> Result<(), JobError> {
        let name = job.name();
        if self.jobs.contains_key(name) {
            return Err(JobError::Validation(format!(
                "job '{name}' is already registered"
            )));
        }
        self.jobs.insert(name, job);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn CronJob>, JobError> {
        self.jobs
            .get(name)
            .cloned()
            .ok_or_else(|| JobError::NotFound(name.to_string()))
    }

    /// Job names, sorted.
    pub fn list(&self) -> Vec<&'static str> {
        self.jobs.keys().copied().collect()
    }

    /// One aligned `name - description` line per job.
    pub fn help(&self) -> String {
        let width = self.jobs.keys().map(|name| name.len()).max().unwrap_or(0);
        let mut help = String::from("Available cron jobs:\n");
        for (name, job) in &self.jobs {
            let _ = writeln!(help, "  {name:<width$} - {}", job.description());
        }
        help
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
