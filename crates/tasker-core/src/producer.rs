//! Producer: typed payload → `Task` → broker.

use std::sync::Arc;

use crate::broker::Broker;
use crate::domain::{Task, TaskId};
use crate::error::TaskerError;
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::typed::{PayloadCodec, TaskPayload};

#[derive(Clone)]
pub struct Producer {
    broker: Arc<dyn Broker>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl Producer {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self::with_clock(broker, Arc::new(SystemClock))
    }

    pub fn with_clock(broker: Arc<dyn Broker>, clock: Arc<dyn Clock>) -> Self {
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self { broker, clock, ids }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Build the task for `payload` with its type's fixed policy.
    pub fn build<T: TaskPayload>(&self, payload: &T) -> Result<Task, TaskerError> {
        Ok(Task::new(
            self.ids.task_id(),
            T::task_type(),
            PayloadCodec::encode(payload)?,
            T::queue(),
            T::MAX_RETRY,
            T::TIMEOUT,
            self.clock.now(),
        ))
    }

    /// Errors are returned as-is; the caller decides whether to skip or abort.
    pub async fn enqueue<T: TaskPayload>(&self, payload: &T) -> Result<TaskId, TaskerError> {
        let task = self.build(payload)?;
        let task_id = task.id;
        let queue = task.queue.clone();

        self.broker.enqueue(task).await?;
        tracing::debug!(%task_id, task_type = T::TYPE, %queue, "task enqueued");
        Ok(task_id)
    }

    pub async fn close(&self) -> Result<(), TaskerError> {
        self.broker.close().await
    }
}
