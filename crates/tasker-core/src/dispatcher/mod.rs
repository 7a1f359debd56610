//! Dispatcher: a fixed pool of workers leasing from a shared broker.
//!
//! Per task:
//! 1. lease (weighted queue order)
//! 2. look up the handler by task type
//! 3. run it under `Task::timeout`
//! 4. ack / nack with backoff / dead-letter

mod weighted;
mod worker;

pub use weighted::WeightedQueues;
pub use worker::WorkerGroup;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::broker::{Broker, Lease, RetryPolicy};
use crate::error::TaskerError;
use crate::typed::{TaskContext, TaskRegistry};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub concurrency: usize,
    pub queues: WeightedQueues,
    /// How long a lease stays valid without ack/nack. Must exceed the
    /// largest registered task timeout.
    pub lease_timeout: Duration,
    /// Idle wait when every queue is empty.
    pub poll_interval: Duration,
    /// How long in-flight handlers may keep running after shutdown starts.
    pub shutdown_grace: Duration,
    pub retry: RetryPolicy,
}

/// What happened to one leased task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    Retried,
    DeadLettered,
    /// Cancelled by shutdown; left leased until the lease expires.
    Abandoned,
}

pub struct Dispatcher {
    broker: Arc<dyn Broker>,
    registry: Arc<TaskRegistry>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        broker: Arc<dyn Broker>,
        registry: Arc<TaskRegistry>,
        config: DispatcherConfig,
    ) -> Result<Self, TaskerError> {
        if config.concurrency == 0 {
            return Err(TaskerError::Validation(
                "worker concurrency must be at least 1".to_string(),
            ));
        }
        // a lease that expires mid-handler lets a second worker take the same task
        if let Some(max) = registry.max_timeout() {
            if config.lease_timeout <= max {
                return Err(TaskerError::Validation(format!(
                    "lease timeout {:?} must be longer than the largest task timeout {max:?}",
                    config.lease_timeout
                )));
            }
        }
        Ok(Self {
            broker,
            registry,
            config,
        })
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Spawn the worker pool.
    pub fn start(self) -> WorkerGroup {
        let queues: Vec<&str> = self.config.queues.names().map(|q| q.as_str()).collect();
        tracing::info!(
            concurrency = self.config.concurrency,
            ?queues,
            task_types = ?self.registry.registered_types(),
            "dispatcher starting"
        );
        WorkerGroup::spawn(Arc::new(self))
    }

    /// Lease and process at most one task. Returns `None` when nothing was visible.
    pub async fn process_next(
        &self,
        hard_cancel: &CancellationToken,
    ) -> Result<Option<Disposition>, TaskerError> {
        let order = self.config.queues.order();
        let Some(lease) = self.broker.lease(&order, self.config.lease_timeout).await? else {
            return Ok(None);
        };

        let span = tracing::info_span!(
            "task",
            task_id = %lease.task.id,
            task_type = %lease.task.task_type,
            queue = %lease.task.queue,
            attempt = lease.task.retry_count + 1,
        );
        Ok(Some(self.execute(lease, hard_cancel).instrument(span).await))
    }

    async fn execute(&self, lease: Lease, hard_cancel: &CancellationToken) -> Disposition {
        let task = &lease.task;

        let Some(handler) = self.registry.get(&task.task_type) else {
            let err = TaskerError::HandlerNotFound(task.task_type.clone());
            tracing::error!(error = %err, "unknown task type, dead-lettering");
            return self.dead_letter(&lease, &err.to_string()).await;
        };

        let ctx = TaskContext {
            task_id: task.id,
            task_type: task.task_type.clone(),
            retry_count: task.retry_count,
            max_retry: task.max_retry,
            deadline: tokio::time::Instant::now() + task.timeout,
            cancel: hard_cancel.child_token(),
        };

        let run = AssertUnwindSafe(handler.handle_raw(&ctx, &task.payload)).catch_unwind();
        let result = tokio::select! {
            biased;
            _ = hard_cancel.cancelled() => {
                tracing::warn!("shutdown grace elapsed, abandoning in-flight task");
                return Disposition::Abandoned;
            }
            r = tokio::time::timeout(task.timeout, run) => match r {
                Err(_) => Err(TaskerError::Timeout(task.timeout)),
                Ok(Err(_panic)) => Err(TaskerError::Transient("handler panicked".to_string())),
                Ok(Ok(r)) => r,
            },
        };

        match result {
            Ok(()) => match self.broker.ack(task.id, lease.token).await {
                Ok(()) => {
                    tracing::info!("task done");
                    Disposition::Acked
                }
                Err(e) => {
                    tracing::warn!(error = %e, "ack failed");
                    Disposition::Abandoned
                }
            },
            Err(err) if err.is_permanent() => {
                tracing::error!(error = %err, "permanent failure, dead-lettering");
                self.dead_letter(&lease, &err.to_string()).await
            }
            Err(err) => self.retry_or_bury(&lease, err).await,
        }
    }

    async fn retry_or_bury(&self, lease: &Lease, err: TaskerError) -> Disposition {
        let task = &lease.task;
        let attempt = task.retry_count + 1;

        if task.can_retry() {
            let delay = self.config.retry.next_delay(attempt);
            tracing::warn!(error = %err, attempt, max_retry = task.max_retry, ?delay, "task failed, will retry");
            match self
                .broker
                .nack(task.id, lease.token, delay, &err.to_string())
                .await
            {
                Ok(()) => Disposition::Retried,
                Err(e) => {
                    tracing::warn!(error = %e, "nack failed");
                    Disposition::Abandoned
                }
            }
        } else {
            tracing::error!(error = %err, attempt, max_retry = task.max_retry, "retries exhausted, dead-lettering");
            let reason = format!("retries exhausted after {attempt} attempts: {err}");
            self.dead_letter(lease, &reason).await
        }
    }

    async fn dead_letter(&self, lease: &Lease, reason: &str) -> Disposition {
        match self.broker.dead_letter(lease.task.id, lease.token, reason).await {
            Ok(()) => Disposition::DeadLettered,
            Err(e) => {
                tracing::warn!(error = %e, "dead-letter failed");
                Disposition::Abandoned
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::domain::{QueueName, TaskState};
    use crate::ports::ManualClock;
    use crate::producer::Producer;
    use crate::typed::{Handler, RegistryBuilder, TaskPayload};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Serialize, Deserialize)]
    struct Job {
        n: u32,
    }

    impl TaskPayload for Job {
        const TYPE: &'static str = "test:job";
        const MAX_RETRY: u32 = 2;
        const TIMEOUT: Duration = Duration::from_millis(200);
    }

    #[derive(Serialize, Deserialize)]
    struct Orphan;

    impl TaskPayload for Orphan {
        const TYPE: &'static str = "test:orphan";
    }

    enum Behaviour {
        Ok,
        Fail,
        Permanent,
        Sleep,
        Panic,
    }

    struct Scripted {
        behaviour: Behaviour,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Handler<Job> for Scripted {
        async fn handle(&self, _ctx: &TaskContext, _payload: Job) -> Result<(), TaskerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Ok => Ok(()),
                Behaviour::Fail => Err(TaskerError::Transient("smtp 451".into())),
                Behaviour::Permanent => Err(TaskerError::Permanent("bad address".into())),
                Behaviour::Sleep => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
                Behaviour::Panic => panic!("handler bug"),
            }
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        broker: Arc<InMemoryBroker>,
        producer: Producer,
        dispatcher: Dispatcher,
        calls: Arc<AtomicU32>,
    }

    fn fixture(behaviour: Behaviour) -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let broker = Arc::new(InMemoryBroker::with_clock(clock.clone()));
        let calls = Arc::new(AtomicU32::new(0));
        let registry = RegistryBuilder::new()
            .register::<Job, _>(Scripted {
                behaviour,
                calls: calls.clone(),
            })
            .unwrap()
            .build()
            .unwrap();
        let config = DispatcherConfig {
            concurrency: 1,
            queues: WeightedQueues::new([(QueueName::new("default"), 1)]).unwrap(),
            lease_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(10),
            shutdown_grace: Duration::from_millis(50),
            retry: RetryPolicy::new(Duration::from_secs(10), 2.0, Duration::from_secs(600)),
        };
        let dispatcher = Dispatcher::new(broker.clone(), Arc::new(registry), config).unwrap();
        Fixture {
            producer: Producer::with_clock(broker.clone(), clock.clone()),
            clock,
            broker,
            dispatcher,
            calls,
        }
    }

    #[tokio::test]
    async fn success_is_acked() {
        let f = fixture(Behaviour::Ok);
        let id = f.producer.enqueue(&Job { n: 1 }).await.unwrap();

        let d = f.dispatcher.process_next(&CancellationToken::new()).await.unwrap();

        assert_eq!(d, Some(Disposition::Acked));
        assert_eq!(f.broker.get(id).await.unwrap().unwrap().state, TaskState::Done);
    }

    #[tokio::test]
    async fn idle_when_nothing_is_visible() {
        let f = fixture(Behaviour::Ok);
        let d = f.dispatcher.process_next(&CancellationToken::new()).await.unwrap();
        assert_eq!(d, None);
    }

    #[tokio::test]
    async fn transient_failure_backs_off_then_dead_letters() {
        let f = fixture(Behaviour::Fail);
        let id = f.producer.enqueue(&Job { n: 1 }).await.unwrap();
        let cancel = CancellationToken::new();

        // attempts 1 and 2 are retried with 10s then 20s backoff
        for delay in [10, 20] {
            let d = f.dispatcher.process_next(&cancel).await.unwrap();
            assert_eq!(d, Some(Disposition::Retried));
            assert_eq!(f.dispatcher.process_next(&cancel).await.unwrap(), None);
            f.clock.advance(chrono::Duration::seconds(delay));
        }

        let d = f.dispatcher.process_next(&cancel).await.unwrap();
        assert_eq!(d, Some(Disposition::DeadLettered));
        assert_eq!(f.calls.load(Ordering::SeqCst), 3);

        let info = f.broker.get(id).await.unwrap().unwrap();
        assert_eq!(info.state, TaskState::DeadLettered);
        assert_eq!(info.task.retry_count, 2);
        assert!(info.last_error.unwrap().contains("retries exhausted"));
    }

    #[tokio::test]
    async fn permanent_failure_skips_retries() {
        let f = fixture(Behaviour::Permanent);
        f.producer.enqueue(&Job { n: 1 }).await.unwrap();

        let d = f.dispatcher.process_next(&CancellationToken::new()).await.unwrap();

        assert_eq!(d, Some(Disposition::DeadLettered));
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_type_is_dead_lettered() {
        let f = fixture(Behaviour::Ok);
        let id = f.producer.enqueue(&Orphan).await.unwrap();

        let d = f.dispatcher.process_next(&CancellationToken::new()).await.unwrap();

        assert_eq!(d, Some(Disposition::DeadLettered));
        let info = f.broker.get(id).await.unwrap().unwrap();
        assert!(info.last_error.unwrap().contains("handler not found"));
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let f = fixture(Behaviour::Sleep);
        let id = f.producer.enqueue(&Job { n: 1 }).await.unwrap();

        let d = f.dispatcher.process_next(&CancellationToken::new()).await.unwrap();

        assert_eq!(d, Some(Disposition::Retried));
        let info = f.broker.get(id).await.unwrap().unwrap();
        assert!(info.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn panicking_handler_does_not_kill_the_worker() {
        let f = fixture(Behaviour::Panic);
        f.producer.enqueue(&Job { n: 1 }).await.unwrap();

        let d = f.dispatcher.process_next(&CancellationToken::new()).await.unwrap();

        assert_eq!(d, Some(Disposition::Retried));
    }

    #[tokio::test]
    async fn hard_cancel_leaves_task_leased() {
        let f = fixture(Behaviour::Sleep);
        let id = f.producer.enqueue(&Job { n: 1 }).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let d = f.dispatcher.process_next(&cancel).await.unwrap();

        assert_eq!(d, Some(Disposition::Abandoned));
        assert_eq!(f.broker.get(id).await.unwrap().unwrap().state, TaskState::Leased);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let f = fixture(Behaviour::Ok);
        let mut config = f.dispatcher.config().clone();
        config.concurrency = 0;
        let registry = Arc::new(TaskRegistry::default());
        assert!(Dispatcher::new(f.broker.clone(), registry, config).is_err());
    }

    fn registry_with_timeout() -> Arc<TaskRegistry> {
        let registry = RegistryBuilder::new()
            .register::<Job, _>(Scripted {
                behaviour: Behaviour::Ok,
                calls: Arc::new(AtomicU32::new(0)),
            })
            .unwrap()
            .build()
            .unwrap();
        Arc::new(registry)
    }

    #[rstest::rstest]
    #[case::shorter(Duration::from_millis(100))]
    #[case::equal(Job::TIMEOUT)]
    fn lease_not_longer_than_task_timeout_is_rejected(#[case] lease_timeout: Duration) {
        let f = fixture(Behaviour::Ok);
        let mut config = f.dispatcher.config().clone();
        config.lease_timeout = lease_timeout;

        let err = Dispatcher::new(f.broker.clone(), registry_with_timeout(), config)
            .err()
            .unwrap();

        assert!(matches!(err, TaskerError::Validation(_)), "{err}");
    }

    #[test]
    fn lease_longer_than_task_timeout_is_accepted() {
        let f = fixture(Behaviour::Ok);
        let mut config = f.dispatcher.config().clone();
        config.lease_timeout = Job::TIMEOUT + Duration::from_millis(1);

        assert!(Dispatcher::new(f.broker.clone(), registry_with_timeout(), config).is_ok());
    }
}
