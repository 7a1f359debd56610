//! The `CronJob` trait and what a run reports back.

use async_trait::async_trait;
use thiserror::Error;

use super::context::JobContext;
use crate::error::{ErrorKind, TaskerError};
use crate::ports::StoreError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid job parameters: {0}")]
    Validation(String),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Tasker(#[from] TaskerError),

    /// auto-archive changed fewer rows than it selected.
    #[error("archived {archived} of {expected} selected todos")]
    PartialArchive { expected: usize, archived: usize },

    #[error("job '{0}' not found")]
    NotFound(String),

    #[error("job panicked: {0}")]
    Panicked(String),

    #[error("failed to set up job context: {0}")]
    Setup(String),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Validation(_) | JobError::NotFound(_) => ErrorKind::Validation,
            JobError::Tasker(e) => e.kind(),
            JobError::Panicked(_) => ErrorKind::Permanent,
            JobError::Store(_) | JobError::PartialArchive { .. } | JobError::Setup(_) => {
                ErrorKind::Transient
            }
        }
    }
}

/// Row counts for one run. `failed` rows were logged and skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub scanned: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// A named one-shot batch job.
///
/// Jobs must tolerate being re-run over rows a previous run already handled:
/// there is no cross-run locking.
#[async_trait]
pub trait CronJob: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    async fn run(&self, ctx: &JobContext) -> Result<JobSummary, JobError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_problems_are_validation_errors() {
        assert_eq!(
            JobError::Validation("batch_size".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            JobError::NotFound("nightly".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            JobError::Store(StoreError::Other("db down".into())).kind(),
            ErrorKind::Transient
        );
    }

    #[test]
    fn partial_archive_reports_both_counts() {
        let err = JobError::PartialArchive {
            expected: 5,
            archived: 3,
        };
        assert_eq!(err.to_string(), "archived 3 of 5 selected todos");
    }
}
