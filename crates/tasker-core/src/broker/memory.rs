//! In-memory broker implementation.
//!
//! Not durable across restarts; used by tests and local runs. Lease expiry
//! and backoff are evaluated lazily on every `lease` call against the
//! injected clock, so a `ManualClock` makes them fully deterministic.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{Broker, Lease, QueueCounts, TaskInfo, TaskRecord, to_chrono};
use crate::domain::{LeaseToken, QueueName, Task, TaskId, TaskState};
use crate::error::TaskerError;
use crate::ports::{Clock, SystemClock};

/// Queue index entry: ordered by visibility time, then by id (ULIDs sort by
/// creation time, so fresh tasks come out FIFO).
type Visible = (DateTime<Utc>, TaskId);

#[derive(Default)]
struct BrokerState {
    /// All task records (single source of truth).
    records: HashMap<TaskId, TaskRecord>,

    /// Pending tasks per queue.
    pending: HashMap<QueueName, BTreeSet<Visible>>,

    /// Leased tasks ordered by lease expiry.
    leased: BTreeSet<Visible>,
}

impl BrokerState {
    /// Put tasks whose lease ran out back into their queue.
    fn reclaim_expired(&mut self, now: DateTime<Utc>) {
        while let Some(&(expires_at, task_id)) = self.leased.first() {
            if expires_at > now {
                break;
            }
            self.leased.pop_first();

            let Some(record) = self.records.get_mut(&task_id) else {
                continue;
            };
            if record.lease_expired(now) {
                tracing::warn!(%task_id, queue = %record.task.queue, "lease expired, task is visible again");
                record.expire_lease(now);
                self.pending
                    .entry(record.task.queue.clone())
                    .or_default()
                    .insert((record.task.next_visible_at, task_id));
            }
        }
    }

    fn take_visible(&mut self, queue: &QueueName, now: DateTime<Utc>) -> Option<TaskId> {
        let index = self.pending.get_mut(queue)?;
        let &(visible_at, task_id) = index.first()?;
        if visible_at > now {
            return None;
        }
        index.pop_first();
        Some(task_id)
    }

    /// Validate the lease and remove it from the expiry index.
    fn release(&mut self, id: TaskId, token: LeaseToken) -> Result<&mut TaskRecord, TaskerError> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or(TaskerError::TaskNotFound(id))?;
        if !record.holds(token) {
            return Err(TaskerError::LeaseLost(id));
        }
        if let Some(hold) = record.lease {
            self.leased.remove(&(hold.expires_at, id));
        }
        Ok(record)
    }
}

pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    clock: Arc<dyn Clock>,
    closed: AtomicBool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            clock,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), TaskerError> {
        if self.is_closed() {
            return Err(TaskerError::Broker("broker is closed".to_string()));
        }
        Ok(())
    }

    /// All tasks currently in `state` (test/introspection helper).
    pub async fn tasks_in(&self, state: TaskState) -> Vec<TaskInfo> {
        let guard = self.state.lock().await;
        guard
            .records
            .values()
            .filter(|r| r.state == state)
            .map(info)
            .collect()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn info(record: &TaskRecord) -> TaskInfo {
    TaskInfo {
        task: record.task.clone(),
        state: record.state,
        last_error: record.last_error.clone(),
        finished_at: record.finished_at,
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn enqueue(&self, task: Task) -> Result<TaskId, TaskerError> {
        self.ensure_open()?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let task_id = task.id;
        if state.records.contains_key(&task_id) {
            return Err(TaskerError::DuplicateTask(task_id));
        }
        state
            .pending
            .entry(task.queue.clone())
            .or_default()
            .insert((task.next_visible_at, task_id));
        state.records.insert(task_id, TaskRecord::new(task, now));
        Ok(task_id)
    }

    async fn lease(
        &self,
        queues: &[QueueName],
        lease_timeout: Duration,
    ) -> Result<Option<Lease>, TaskerError> {
        self.ensure_open()?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.reclaim_expired(now);

        for queue in queues {
            let Some(task_id) = state.take_visible(queue, now) else {
                continue;
            };
            let token = LeaseToken::generate();
            let expires_at = now + to_chrono(lease_timeout);

            let Some(record) = state.records.get_mut(&task_id) else {
                continue;
            };
            record.start_lease(token, expires_at, now);
            let task = record.task.clone();
            state.leased.insert((expires_at, task_id));

            return Ok(Some(Lease {
                task,
                token,
                expires_at,
            }));
        }
        Ok(None)
    }

    async fn ack(&self, id: TaskId, token: LeaseToken) -> Result<(), TaskerError> {
        self.ensure_open()?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.release(id, token)?.mark_done(now);
        Ok(())
    }

    async fn nack(
        &self,
        id: TaskId,
        token: LeaseToken,
        retry_delay: Duration,
        error: &str,
    ) -> Result<(), TaskerError> {
        self.ensure_open()?;
        let now = self.clock.now();
        let visible_at = now + to_chrono(retry_delay);
        let mut state = self.state.lock().await;

        let record = state.release(id, token)?;
        record.schedule_retry(visible_at, error.to_string(), now);
        let queue = record.task.queue.clone();
        state
            .pending
            .entry(queue)
            .or_default()
            .insert((visible_at, id));
        Ok(())
    }

    async fn dead_letter(
        &self,
        id: TaskId,
        token: LeaseToken,
        reason: &str,
    ) -> Result<(), TaskerError> {
        self.ensure_open()?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.release(id, token)?.mark_dead(reason.to_string(), now);
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskInfo>, TaskerError> {
        let state = self.state.lock().await;
        Ok(state.records.get(&id).map(info))
    }

    async fn counts(&self) -> Result<QueueCounts, TaskerError> {
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        for record in state.records.values() {
            counts.add(record.state);
        }
        Ok(counts)
    }

    async fn close(&self) -> Result<(), TaskerError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
