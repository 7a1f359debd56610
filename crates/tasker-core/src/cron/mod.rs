//! Cron - 名前付きのワンショットバッチジョブ
//!
//! 外部スケジューラ（cron, オーケストレータ）がジョブを起動し、ここでは
//! 起動後の 1 回の実行だけを扱う。実行間で状態は持たない。

mod context;
mod job;
pub mod jobs;
mod registry;
mod runner;

pub use context::{ContextFactory, JobContext, SqliteContextFactory};
pub use job::{CronJob, JobError, JobSummary};
pub use registry::JobRegistry;
pub use runner::JobRunner;
