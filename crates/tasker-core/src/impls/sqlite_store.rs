//! SQLite todo store. The `users` table doubles as the user directory.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use crate::db::{ConnError, SharedConnection, conversion_err, from_millis, millis};
use crate::domain::{Todo, UserBatchStat};
use crate::ports::{DirectoryError, StoreError, TodoStore, UserDirectory};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY,
    email      TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000)
);
CREATE TABLE IF NOT EXISTS todos (
    id           TEXT PRIMARY KEY,
    user_id      TEXT NOT NULL,
    title        TEXT NOT NULL,
    status       TEXT NOT NULL CHECK (status IN ('draft', 'active', 'completed', 'archived')),
    priority     TEXT NOT NULL CHECK (priority IN ('low', 'medium', 'high')),
    due_date     INTEGER,
    completed_at INTEGER,
    created_at   INTEGER NOT NULL,
    CONSTRAINT user_id FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS todos_due_date_index ON todos (status, due_date);
CREATE INDEX IF NOT EXISTS todos_completed_at_index ON todos (status, completed_at);
CREATE INDEX IF NOT EXISTS todos_user_index ON todos (user_id);
";

const TODO_COLUMNS: &str =
    "id, user_id, title, status, priority, due_date, completed_at, created_at";

/// Maps SQLite extended result codes to the same labels the API layer uses.
fn constraint_label(extended_code: i32) -> &'static str {
    match extended_code {
        rusqlite::ffi::SQLITE_CONSTRAINT_NOTNULL => "not_null_violation",
        rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => "foreign_key_violation",
        rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
            "unique_violation"
        }
        rusqlite::ffi::SQLITE_CONSTRAINT_CHECK => "check_violation",
        _ => "constraint_violation",
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(e.to_string()),
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::ConstraintViolation(format!(
                    "{}: {e}",
                    constraint_label(err.extended_code)
                ))
            }
            _ => StoreError::Other(e.to_string()),
        }
    }
}

impl From<ConnError> for StoreError {
    fn from(e: ConnError) -> Self {
        match e {
            ConnError::Sqlite(e) => e.into(),
            other => StoreError::Other(other.to_string()),
        }
    }
}

fn row_to_todo(row: &Row<'_>) -> rusqlite::Result<Todo> {
    let id: String = row.get(0)?;
    let status: String = row.get(3)?;
    let priority: String = row.get(4)?;
    let due_date: Option<i64> = row.get(5)?;
    let completed_at: Option<i64> = row.get(6)?;

    Ok(Todo {
        id: Uuid::parse_str(&id).map_err(|e| conversion_err(0, e))?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        status: status.parse().map_err(|e| conversion_err(3, e))?,
        priority: priority.parse().map_err(|e| conversion_err(4, e))?,
        due_date: due_date.map(from_millis).transpose()?,
        completed_at: completed_at.map(from_millis).transpose()?,
        created_at: from_millis(row.get(7)?)?,
    })
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

pub struct SqliteTodoStore {
    db: SharedConnection,
}

impl SqliteTodoStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Ok(Self {
            db: SharedConnection::open(path, SCHEMA)?,
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            db: SharedConnection::open_in_memory(SCHEMA)?,
        })
    }

    pub async fn insert_user(&self, user_id: &str, email: &str) -> Result<(), StoreError> {
        let (user_id, email) = (user_id.to_string(), email.to_string());
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO users (id, email) VALUES (?1, ?2)",
                    params![user_id, email],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn insert_todo(&self, todo: &Todo) -> Result<(), StoreError> {
        let todo = todo.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    &format!("INSERT INTO todos ({TODO_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                    params![
                        todo.id.to_string(),
                        todo.user_id,
                        todo.title,
                        todo.status.as_str(),
                        todo.priority.as_str(),
                        todo.due_date.map(millis),
                        todo.completed_at.map(millis),
                        millis(todo.created_at),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get_todo(&self, id: Uuid) -> Result<Todo, StoreError> {
        self.db
            .call(move |conn| {
                Ok(conn.query_row(
                    &format!("SELECT {TODO_COLUMNS} FROM todos WHERE id = ?1"),
                    params![id.to_string()],
                    row_to_todo,
                )?)
            })
            .await
    }

    /// Run a todo query with positional parameters.
    async fn query_todos(
        &self,
        sql: String,
        args: Vec<Value>,
    ) -> Result<Vec<Todo>, StoreError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let todos = stmt
                    .query_map(rusqlite::params_from_iter(args.iter()), row_to_todo)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(todos)
            })
            .await
    }
}

#[async_trait]
impl TodoStore for SqliteTodoStore {
    async fn todos_due_within(
        &self,
        now: DateTime<Utc>,
        hours: u32,
        limit: usize,
    ) -> Result<Vec<Todo>, StoreError> {
        let horizon = now + Duration::hours(i64::from(hours));
        self.query_todos(
            format!(
                "SELECT {TODO_COLUMNS} FROM todos \
                 WHERE due_date IS NOT NULL AND due_date > ?1 AND due_date <= ?2 \
                 AND status NOT IN ('completed', 'archived') \
                 ORDER BY due_date ASC, id ASC LIMIT ?3"
            ),
            vec![
                Value::Integer(millis(now)),
                Value::Integer(millis(horizon)),
                Value::Integer(limit_param(limit)),
            ],
        )
        .await
    }

    async fn overdue_todos(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Todo>, StoreError> {
        self.query_todos(
            format!(
                "SELECT {TODO_COLUMNS} FROM todos \
                 WHERE due_date IS NOT NULL AND due_date < ?1 \
                 AND status NOT IN ('completed', 'archived') \
                 ORDER BY due_date ASC, id ASC LIMIT ?2"
            ),
            vec![Value::Integer(millis(now)), Value::Integer(limit_param(limit))],
        )
        .await
    }

    async fn completed_todos_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Todo>, StoreError> {
        self.query_todos(
            format!(
                "SELECT {TODO_COLUMNS} FROM todos \
                 WHERE status = 'completed' AND completed_at IS NOT NULL AND completed_at < ?1 \
                 ORDER BY completed_at ASC, id ASC LIMIT ?2"
            ),
            vec![
                Value::Integer(millis(cutoff)),
                Value::Integer(limit_param(limit)),
            ],
        )
        .await
    }

    async fn weekly_stats(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<UserBatchStat>, StoreError> {
        let (since, until) = (millis(since), millis(until));
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT user_id,
                        SUM(CASE WHEN created_at BETWEEN ?1 AND ?2 THEN 1 ELSE 0 END),
                        SUM(CASE WHEN status = 'completed' AND completed_at BETWEEN ?1 AND ?2 THEN 1 ELSE 0 END),
                        SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END),
                        SUM(CASE WHEN due_date IS NOT NULL AND due_date < ?2
                                  AND status NOT IN ('completed', 'archived') THEN 1 ELSE 0 END)
                     FROM todos
                     GROUP BY user_id
                     HAVING SUM(CASE WHEN status != 'archived'
                                      OR created_at BETWEEN ?1 AND ?2
                                      OR completed_at BETWEEN ?1 AND ?2 THEN 1 ELSE 0 END) > 0
                     ORDER BY user_id",
                )?;
                let stats = stmt
                    .query_map(params![since, until], |row| {
                        Ok(UserBatchStat {
                            user_id: row.get(0)?,
                            created_count: row.get(1)?,
                            completed_count: row.get(2)?,
                            active_count: row.get(3)?,
                            overdue_count: row.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(stats)
            })
            .await
    }

    async fn completed_todos_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Todo>, StoreError> {
        self.query_todos(
            format!(
                "SELECT {TODO_COLUMNS} FROM todos \
                 WHERE user_id = ?1 AND status = 'completed' \
                 AND completed_at >= ?2 AND completed_at <= ?3 \
                 ORDER BY completed_at DESC, id ASC LIMIT ?4"
            ),
            vec![
                Value::Text(user_id.to_string()),
                Value::Integer(millis(since)),
                Value::Integer(millis(until)),
                Value::Integer(limit_param(limit)),
            ],
        )
        .await
    }

    async fn overdue_todos_for_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Todo>, StoreError> {
        self.query_todos(
            format!(
                "SELECT {TODO_COLUMNS} FROM todos \
                 WHERE user_id = ?1 AND due_date IS NOT NULL AND due_date < ?2 \
                 AND status NOT IN ('completed', 'archived') \
                 ORDER BY due_date ASC, id ASC LIMIT ?3"
            ),
            vec![
                Value::Text(user_id.to_string()),
                Value::Integer(millis(now)),
                Value::Integer(limit_param(limit)),
            ],
        )
        .await
    }

    async fn archive_todos(&self, ids: &[Uuid]) -> Result<usize, StoreError> {
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut archived = 0;
                {
                    let mut stmt = tx.prepare(
                        "UPDATE todos SET status = 'archived' WHERE id = ?1 AND status = 'completed'",
                    )?;
                    for id in &ids {
                        archived += stmt.execute(params![id])?;
                    }
                }
                tx.commit()?;
                Ok(archived)
            })
            .await
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(self.db.close().await?)
    }
}

#[async_trait]
impl UserDirectory for SqliteTodoStore {
    async fn email_for(&self, user_id: &str) -> Result<String, DirectoryError> {
        let id = user_id.to_string();
        let email = self
            .db
            .call(move |conn| {
                Ok::<_, StoreError>(
                    conn.query_row(
                        "SELECT email FROM users WHERE id = ?1",
                        params![id],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?,
                )
            })
            .await
            .map_err(|e| DirectoryError::Transient(e.to_string()))?;
        email.ok_or_else(|| DirectoryError::NotFound(user_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Priority, TodoStatus};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap()
    }

    fn todo(user: &str, status: TodoStatus) -> Todo {
        Todo {
            id: Uuid::new_v4(),
            user_id: user.to_string(),
            title: "water plants".to_string(),
            status,
            priority: Priority::Low,
            due_date: None,
            completed_at: None,
            created_at: now() - Duration::days(1),
        }
    }

    async fn store() -> SqliteTodoStore {
        let store = SqliteTodoStore::open_in_memory().unwrap();
        store.insert_user("u1", "ada@example.com").await.unwrap();
        store.insert_user("u2", "bob@example.com").await.unwrap();
        store
    }

    #[tokio::test]
    async fn round_trips_a_todo() {
        let store = store().await;
        let mut t = todo("u1", TodoStatus::Active);
        t.due_date = Some(now() + Duration::hours(5));
        store.insert_todo(&t).await.unwrap();

        assert_eq!(store.get_todo(t.id).await.unwrap(), t);
        assert!(matches!(
            store.get_todo(Uuid::new_v4()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn constraint_errors_are_classified() {
        let store = store().await;
        let t = todo("u1", TodoStatus::Active);
        store.insert_todo(&t).await.unwrap();

        let dup = store.insert_todo(&t).await.unwrap_err();
        assert!(matches!(&dup, StoreError::ConstraintViolation(m) if m.starts_with("unique_violation")));

        let orphan = store.insert_todo(&todo("ghost", TodoStatus::Active)).await.unwrap_err();
        assert!(
            matches!(&orphan, StoreError::ConstraintViolation(m) if m.starts_with("foreign_key_violation"))
        );
    }

    #[tokio::test]
    async fn due_and_overdue_queries() {
        let store = store().await;
        let mut soon = todo("u1", TodoStatus::Active);
        soon.due_date = Some(now() + Duration::hours(2));
        let mut late = todo("u2", TodoStatus::Draft);
        late.due_date = Some(now() - Duration::hours(2));
        let mut finished = todo("u2", TodoStatus::Completed);
        finished.due_date = Some(now() - Duration::hours(3));
        for t in [&soon, &late, &finished] {
            store.insert_todo(t).await.unwrap();
        }

        let due = store.todos_due_within(now(), 24, 100).await.unwrap();
        assert_eq!(due.iter().map(|t| t.id).collect::<Vec<_>>(), vec![soon.id]);

        let overdue = store.overdue_todos(now(), 100).await.unwrap();
        assert_eq!(overdue.iter().map(|t| t.id).collect::<Vec<_>>(), vec![late.id]);

        let mine = store.overdue_todos_for_user("u2", now(), 10).await.unwrap();
        assert_eq!(mine.len(), 1);
    }

    #[tokio::test]
    async fn archive_is_guarded_by_status() {
        let store = store().await;
        let mut done = todo("u1", TodoStatus::Completed);
        done.completed_at = Some(now() - Duration::days(45));
        let active = todo("u1", TodoStatus::Active);
        store.insert_todo(&done).await.unwrap();
        store.insert_todo(&active).await.unwrap();

        let old = store
            .completed_todos_older_than(now() - Duration::days(30), 100)
            .await
            .unwrap();
        assert_eq!(old.len(), 1);

        assert_eq!(store.archive_todos(&[done.id, active.id]).await.unwrap(), 1);
        assert_eq!(store.get_todo(done.id).await.unwrap().status, TodoStatus::Archived);
        assert_eq!(store.archive_todos(&[done.id]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn weekly_stats_and_user_lists() {
        let store = store().await;
        let mut recent = todo("u1", TodoStatus::Completed);
        recent.completed_at = Some(now() - Duration::days(1));
        let mut older = todo("u1", TodoStatus::Completed);
        older.completed_at = Some(now() - Duration::days(3));
        let mut overdue = todo("u1", TodoStatus::Active);
        overdue.due_date = Some(now() - Duration::days(1));
        let mut gone = todo("u2", TodoStatus::Archived);
        gone.created_at = now() - Duration::days(60);
        for t in [&recent, &older, &overdue, &gone] {
            store.insert_todo(t).await.unwrap();
        }

        let since = now() - Duration::days(7);
        let stats = store.weekly_stats(since, now()).await.unwrap();
        assert_eq!(
            stats,
            vec![UserBatchStat {
                user_id: "u1".into(),
                created_count: 3,
                completed_count: 2,
                active_count: 1,
                overdue_count: 1,
            }]
        );

        let done = store
            .completed_todos_for_user("u1", since, now(), 10)
            .await
            .unwrap();
        assert_eq!(done.iter().map(|t| t.id).collect::<Vec<_>>(), vec![recent.id, older.id]);
    }

    #[tokio::test]
    async fn directory_resolves_emails() {
        let store = store().await;
        assert_eq!(store.email_for("u2").await.unwrap(), "bob@example.com");
        assert!(matches!(
            store.email_for("u9").await,
            Err(DirectoryError::NotFound(_))
        ));

        store.close().await.unwrap();
        assert!(matches!(
            store.email_for("u2").await,
            Err(DirectoryError::Transient(_))
        ));
    }
}
