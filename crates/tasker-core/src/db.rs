//! Shared SQLite connection handle.
//!
//! rusqlite is synchronous, so every call hops onto the blocking pool. One
//! connection per handle, guarded by a std mutex that is never held across
//! an await.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    #[error("connection is closed")]
    Closed,

    #[error("blocking task failed: {0}")]
    Join(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Clone)]
pub struct SharedConnection {
    inner: Arc<Mutex<Option<Connection>>>,
}

impl SharedConnection {
    pub fn open<P: AsRef<Path>>(path: P, schema: &str) -> rusqlite::Result<Self> {
        Self::init(Connection::open(path.as_ref())?, schema)
    }

    pub fn open_in_memory(schema: &str) -> rusqlite::Result<Self> {
        Self::init(Connection::open_in_memory()?, schema)
    }

    fn init(conn: Connection, schema: &str) -> rusqlite::Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        // in-memory databases answer "memory" here
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        conn.execute_batch(schema)?;
        tracing::debug!(journal_mode = %mode, "sqlite connection ready");

        Ok(Self {
            inner: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    pub async fn call<R, E, F>(&self, f: F) -> Result<R, E>
    where
        R: Send + 'static,
        E: From<ConnError> + Send + 'static,
        F: FnOnce(&mut Connection) -> Result<R, E> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let conn = guard.as_mut().ok_or(ConnError::Closed)?;
            f(conn)
        })
        .await
        .map_err(|e| ConnError::Join(e.to_string()))?
    }

    /// Close the connection. Later calls fail with `ConnError::Closed`.
    pub async fn close(&self) -> Result<(), ConnError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            match guard.take() {
                Some(conn) => conn.close().map_err(|(_, e)| ConnError::Sqlite(e)),
                None => Ok(()),
            }
        })
        .await
        .map_err(|e| ConnError::Join(e.to_string()))?
    }
}

pub fn millis(t: chrono::DateTime<chrono::Utc>) -> i64 {
    t.timestamp_millis()
}

pub fn from_millis(ms: i64) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(0, ms))
}

/// Wrap a parse failure of column `idx` as a rusqlite conversion error.
pub fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum TestError {
        Conn(ConnError),
        Db(rusqlite::Error),
    }

    impl From<ConnError> for TestError {
        fn from(e: ConnError) -> Self {
            TestError::Conn(e)
        }
    }

    #[tokio::test]
    async fn calls_run_against_the_schema_until_closed() {
        let db = SharedConnection::open_in_memory("CREATE TABLE t (v INTEGER);").unwrap();

        let n: i64 = db
            .call(|conn| {
                conn.execute("INSERT INTO t (v) VALUES (7)", [])
                    .map_err(TestError::Db)?;
                conn.query_row("SELECT SUM(v) FROM t", [], |row| row.get(0))
                    .map_err(TestError::Db)
            })
            .await
            .unwrap();
        assert_eq!(n, 7);

        db.close().await.unwrap();
        let err = db.call(|_| Ok::<_, TestError>(())).await.unwrap_err();
        assert!(matches!(err, TestError::Conn(ConnError::Closed)));
        assert_eq!(ConnError::Closed.to_string(), "connection is closed");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_sqlite_errors_stay_transparent() {
        let db = SharedConnection::open_in_memory("").unwrap();
        db.close().await.unwrap();
        db.close().await.unwrap();

        let err = ConnError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, ConnError::Sqlite(rusqlite::Error::QueryReturnedNoRows)));
        assert_eq!(err.to_string(), rusqlite::Error::QueryReturnedNoRows.to_string());
    }
}
