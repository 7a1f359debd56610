//! SQLite-backed broker.
//!
//! One `tasks` table holds every record; the state column plays the role of
//! the in-memory queue indexes. Leasing runs inside an IMMEDIATE transaction
//! so two workers (or two processes sharing the file) can never claim the
//! same row. Timestamps are stored as unix milliseconds.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use super::{Broker, Lease, QueueCounts, TaskInfo, to_chrono};
use crate::db::{ConnError, SharedConnection, conversion_err, from_millis, millis};
use crate::domain::{LeaseToken, QueueName, Task, TaskId, TaskState, TaskType};
use crate::error::TaskerError;
use crate::ports::{Clock, SystemClock};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id               TEXT PRIMARY KEY,
    task_type        TEXT NOT NULL,
    payload          BLOB NOT NULL,
    queue            TEXT NOT NULL,
    max_retry        INTEGER NOT NULL,
    timeout_ms       INTEGER NOT NULL,
    enqueued_at      INTEGER NOT NULL,
    retry_count      INTEGER NOT NULL DEFAULT 0,
    visible_at       INTEGER NOT NULL,
    state            TEXT NOT NULL,
    lease_token      TEXT,
    lease_expires_at INTEGER,
    last_error       TEXT,
    updated_at       INTEGER NOT NULL,
    finished_at      INTEGER
);
CREATE INDEX IF NOT EXISTS tasks_queue_state_index ON tasks (queue, state, visible_at);
";

const TASK_COLUMNS: &str = "id, task_type, payload, queue, max_retry, timeout_ms, enqueued_at, \
     retry_count, visible_at, state, last_error, finished_at";

pub struct SqliteBroker {
    db: SharedConnection,
    clock: Arc<dyn Clock>,
}

impl SqliteBroker {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TaskerError> {
        let db = SharedConnection::open(path, SCHEMA).map_err(db_err)?;
        Ok(Self::from_shared(db))
    }

    pub fn open_in_memory() -> Result<Self, TaskerError> {
        let db = SharedConnection::open_in_memory(SCHEMA).map_err(db_err)?;
        Ok(Self::from_shared(db))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn from_shared(db: SharedConnection) -> Self {
        Self {
            db,
            clock: Arc::new(SystemClock),
        }
    }
}

impl From<ConnError> for TaskerError {
    fn from(e: ConnError) -> Self {
        match e {
            ConnError::Closed => TaskerError::Broker("broker is closed".to_string()),
            other => TaskerError::Broker(other.to_string()),
        }
    }
}

fn db_err(e: rusqlite::Error) -> TaskerError {
    TaskerError::Broker(e.to_string())
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Map a row selected with `TASK_COLUMNS`.
fn row_to_info(row: &Row<'_>) -> rusqlite::Result<TaskInfo> {
    let id: String = row.get(0)?;
    let id: TaskId = id.parse().map_err(|e| conversion_err(0, e))?;
    let state: String = row.get(9)?;
    let state: TaskState = state.parse().map_err(|e| conversion_err(9, e))?;
    let timeout_ms: i64 = row.get(5)?;
    let finished_at: Option<i64> = row.get(11)?;

    let task = Task {
        id,
        task_type: TaskType::new(row.get::<_, String>(1)?),
        payload: row.get(2)?,
        queue: QueueName::new(row.get::<_, String>(3)?),
        max_retry: row.get(4)?,
        timeout: Duration::from_millis(timeout_ms.max(0) as u64),
        enqueued_at: from_millis(row.get(6)?)?,
        retry_count: row.get(7)?,
        next_visible_at: from_millis(row.get(8)?)?,
    };
    Ok(TaskInfo {
        task,
        state,
        last_error: row.get(10)?,
        finished_at: finished_at.map(from_millis).transpose()?,
    })
}

/// Decide between `LeaseLost` and `TaskNotFound` after a guarded update hit no rows.
fn missing_lease(conn: &Connection, id: TaskId) -> Result<(), TaskerError> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM tasks WHERE id = ?1",
            params![id.as_ulid().to_string()],
            |_| Ok(()),
        )
        .optional()
        .map_err(db_err)?
        .is_some();
    if exists {
        Err(TaskerError::LeaseLost(id))
    } else {
        Err(TaskerError::TaskNotFound(id))
    }
}

#[async_trait]
impl Broker for SqliteBroker {
    async fn enqueue(&self, task: Task) -> Result<TaskId, TaskerError> {
        let now = self.clock.now();
        self.db.call(move |conn| {
            let id = task.id;
            let timeout_ms = i64::try_from(task.timeout.as_millis()).unwrap_or(i64::MAX);
            let inserted = conn.execute(
                "INSERT INTO tasks (id, task_type, payload, queue, max_retry, timeout_ms, enqueued_at, \
                 retry_count, visible_at, state, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    id.as_ulid().to_string(),
                    task.task_type.as_str(),
                    task.payload,
                    task.queue.as_str(),
                    task.max_retry,
                    timeout_ms,
                    millis(task.enqueued_at),
                    task.retry_count,
                    millis(task.next_visible_at),
                    TaskState::Pending.as_str(),
                    millis(now),
                ],
            );
            match inserted {
                Ok(_) => Ok(id),
                Err(e) if is_constraint_violation(&e) => Err(TaskerError::DuplicateTask(id)),
                Err(e) => Err(db_err(e)),
            }
        })
        .await
    }

    async fn lease(
        &self,
        queues: &[QueueName],
        lease_timeout: Duration,
    ) -> Result<Option<Lease>, TaskerError> {
        let now = self.clock.now();
        let expires_at = now + to_chrono(lease_timeout);
        let queues: Vec<QueueName> = queues.to_vec();

        self.db.call(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db_err)?;

            let mut claimed = None;
            for queue in &queues {
                let candidate = tx
                    .query_row(
                        &format!(
                            "SELECT {TASK_COLUMNS}, lease_expires_at FROM tasks \
                             WHERE queue = ?1 AND ((state = 'pending' AND visible_at <= ?2) \
                             OR (state = 'leased' AND lease_expires_at <= ?2)) \
                             ORDER BY visible_at, id LIMIT 1"
                        ),
                        params![queue.as_str(), millis(now)],
                        |row| Ok((row_to_info(row)?, row.get::<_, Option<i64>>(12)?)),
                    )
                    .optional()
                    .map_err(db_err)?;
                if candidate.is_some() {
                    claimed = candidate;
                    break;
                }
            }

            let Some((info, previous_expiry)) = claimed else {
                return Ok(None);
            };
            if info.state == TaskState::Leased {
                tracing::warn!(
                    task_id = %info.task.id,
                    queue = %info.task.queue,
                    expired_at_ms = previous_expiry,
                    "lease expired, task is visible again"
                );
            }

            let token = LeaseToken::generate();
            tx.execute(
                "UPDATE tasks SET state = 'leased', lease_token = ?1, lease_expires_at = ?2, updated_at = ?3 \
                 WHERE id = ?4",
                params![
                    token.as_ulid().to_string(),
                    millis(expires_at),
                    millis(now),
                    info.task.id.as_ulid().to_string(),
                ],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;

            Ok(Some(Lease {
                task: info.task,
                token,
                expires_at,
            }))
        })
        .await
    }

    async fn ack(&self, id: TaskId, token: LeaseToken) -> Result<(), TaskerError> {
        let now = millis(self.clock.now());
        self.db.call(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE tasks SET state = 'done', lease_token = NULL, lease_expires_at = NULL, \
                     updated_at = ?1, finished_at = ?1 \
                     WHERE id = ?2 AND lease_token = ?3 AND state = 'leased'",
                    params![now, id.as_ulid().to_string(), token.as_ulid().to_string()],
                )
                .map_err(db_err)?;
            if changed == 0 {
                return missing_lease(conn, id);
            }
            Ok(())
        })
        .await
    }

    async fn nack(
        &self,
        id: TaskId,
        token: LeaseToken,
        retry_delay: Duration,
        error: &str,
    ) -> Result<(), TaskerError> {
        let now = self.clock.now();
        let visible_at = millis(now + to_chrono(retry_delay));
        let now = millis(now);
        let error = error.to_string();
        self.db.call(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE tasks SET state = 'pending', lease_token = NULL, lease_expires_at = NULL, \
                     retry_count = retry_count + 1, visible_at = ?1, last_error = ?2, updated_at = ?3 \
                     WHERE id = ?4 AND lease_token = ?5 AND state = 'leased'",
                    params![
                        visible_at,
                        error,
                        now,
                        id.as_ulid().to_string(),
                        token.as_ulid().to_string()
                    ],
                )
                .map_err(db_err)?;
            if changed == 0 {
                return missing_lease(conn, id);
            }
            Ok(())
        })
        .await
    }

    async fn dead_letter(
        &self,
        id: TaskId,
        token: LeaseToken,
        reason: &str,
    ) -> Result<(), TaskerError> {
        let now = millis(self.clock.now());
        let reason = reason.to_string();
        self.db.call(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE tasks SET state = 'dead_lettered', lease_token = NULL, lease_expires_at = NULL, \
                     last_error = ?1, updated_at = ?2, finished_at = ?2 \
                     WHERE id = ?3 AND lease_token = ?4 AND state = 'leased'",
                    params![
                        reason,
                        now,
                        id.as_ulid().to_string(),
                        token.as_ulid().to_string()
                    ],
                )
                .map_err(db_err)?;
            if changed == 0 {
                return missing_lease(conn, id);
            }
            Ok(())
        })
        .await
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskInfo>, TaskerError> {
        self.db.call(move |conn| {
            conn.query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.as_ulid().to_string()],
                row_to_info,
            )
            .optional()
            .map_err(db_err)
        })
        .await
    }

    async fn counts(&self) -> Result<QueueCounts, TaskerError> {
        self.db.call(|conn| {
            let mut stmt = conn
                .prepare("SELECT state, COUNT(*) FROM tasks GROUP BY state")
                .map_err(db_err)?;
            let rows: Vec<(String, i64)> = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(db_err)?
                .collect::<Result<_, _>>()
                .map_err(db_err)?;

            let mut counts = QueueCounts::default();
            for (state, n) in rows {
                let n = usize::try_from(n).unwrap_or(0);
                match state.parse::<TaskState>() {
                    Ok(TaskState::Pending) => counts.pending += n,
                    Ok(TaskState::Leased) => counts.leased += n,
                    Ok(TaskState::Done) => counts.done += n,
                    Ok(TaskState::DeadLettered) => counts.dead_lettered += n,
                    Err(_) => tracing::warn!(%state, "unknown task state in broker table"),
                }
            }
            Ok(counts)
        })
        .await
    }

    async fn close(&self) -> Result<(), TaskerError> {
        Ok(self.db.close().await?)
    }
}
