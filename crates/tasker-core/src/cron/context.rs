//! Per-run execution context and the factory that builds it.

use std::sync::Arc;

use async_trait::async_trait;

use super::job::JobError;
use crate::broker::{Broker, SqliteBroker};
use crate::config::{Config, CronConfig};
use crate::domain::RunId;
use crate::impls::SqliteTodoStore;
use crate::ports::{Clock, SystemClock, TodoStore, UserDirectory};
use crate::producer::Producer;

/// Everything one job run may touch. Owned by that run and closed when it ends.
pub struct JobContext {
    pub run_id: RunId,
    pub config: CronConfig,
    pub store: Arc<dyn TodoStore>,
    pub producer: Producer,
    pub directory: Arc<dyn UserDirectory>,
    pub clock: Arc<dyn Clock>,
}

impl JobContext {
    /// Close the store and the broker. Both are attempted; the first error wins.
    pub async fn close(&self) -> Result<(), JobError> {
        let store = self.store.close().await;
        if let Err(e) = &store {
            tracing::warn!(error = %e, "failed to close todo store");
        }
        let broker = self.producer.close().await;
        if let Err(e) = &broker {
            tracing::warn!(error = %e, "failed to close broker");
        }
        store?;
        broker?;
        Ok(())
    }
}

/// Builds a fresh `JobContext` for each run.
#[async_trait]
pub trait ContextFactory: Send + Sync {
    async fn create(&self, run_id: RunId) -> Result<JobContext, JobError>;
}

/// Opens the SQLite todo store and broker named in the config.
pub struct SqliteContextFactory {
    config: Config,
    clock: Arc<dyn Clock>,
}

impl SqliteContextFactory {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl ContextFactory for SqliteContextFactory {
    async fn create(&self, run_id: RunId) -> Result<JobContext, JobError> {
        self.config
            .cron
            .validate()
            .map_err(JobError::Validation)?;

        let store = SqliteTodoStore::open(&self.config.database.path).map_err(|e| {
            JobError::Setup(format!(
                "todo store at {}: {e}",
                self.config.database.path.display()
            ))
        })?;
        let store = Arc::new(store);

        let broker = match SqliteBroker::open(&self.config.broker.path) {
            Ok(b) => b.with_clock(Arc::clone(&self.clock)),
            Err(e) => {
                // the store is already open; close it before bailing
                if let Err(close_err) = store.close().await {
                    tracing::warn!(error = %close_err, "failed to close todo store");
                }
                return Err(JobError::Setup(format!(
                    "broker at {}: {e}",
                    self.config.broker.path.display()
                )));
            }
        };
        let broker: Arc<dyn Broker> = Arc::new(broker);

        Ok(JobContext {
            run_id,
            config: self.config.cron.clone(),
            store: Arc::clone(&store) as Arc<dyn TodoStore>,
            producer: Producer::with_clock(broker, Arc::clone(&self.clock)),
            directory: store,
            clock: Arc::clone(&self.clock),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config_in(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.database.path = dir.join("todos.db");
        config.broker.path = dir.join("broker.db");
        config
    }

    #[tokio::test]
    async fn opens_and_closes_both_databases() {
        let dir = tempfile::tempdir().unwrap();
        let factory = SqliteContextFactory::new(config_in(dir.path()));

        let ctx = factory.create(RunId::generate()).await.unwrap();
        assert!(ctx.store.overdue_todos(ctx.clock.now(), 1).await.unwrap().is_empty());
        ctx.close().await.unwrap();

        assert!(ctx.store.overdue_todos(ctx.clock.now(), 1).await.is_err());
        assert!(ctx.producer.broker().counts().await.is_err());
    }

    #[tokio::test]
    async fn unopenable_path_is_a_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.broker.path = PathBuf::from("/nonexistent/dir/broker.db");

        let err = SqliteContextFactory::new(config)
            .create(RunId::generate())
            .await
            .err()
            .unwrap();
        assert!(matches!(&err, JobError::Setup(msg) if msg.starts_with("broker at")), "{err}");
        // the store was opened before the broker failed
        assert!(dir.path().join("todos.db").exists());
    }

    #[tokio::test]
    async fn invalid_cron_settings_fail_before_opening_anything() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.cron.batch_size = 0;

        let err = SqliteContextFactory::new(config)
            .create(RunId::generate())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, JobError::Validation(_)));
        assert!(!dir.path().join("todos.db").exists());
    }
}
