use std::time::Duration;

use thiserror::Error;

use crate::domain::{TaskId, TaskType};
use crate::ports::{DirectoryError, NotifyError, StoreError};

/// 失敗の運用上の分類
///
/// - Transient: 一時的なエラー（リトライする）
/// - Permanent: 恒久的なエラー（リトライしても無意味、即 dead-letter）
/// - Validation: 入力・設定の不備（書き込み前に中断）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Validation,
}

#[derive(Debug, Error)]
pub enum TaskerError {
    #[error("handler not found for task_type={0}")]
    HandlerNotFound(TaskType),

    #[error("malformed payload: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("broker unavailable: {0}")]
    Broker(String),

    #[error("task {0} already exists")]
    DuplicateTask(TaskId),

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("lease on {0} is no longer held")]
    LeaseLost(TaskId),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("directory: {0}")]
    Directory(#[from] DirectoryError),

    #[error("notification: {0}")]
    Notify(#[from] NotifyError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("invalid: {0}")]
    Validation(String),

    #[error("{0}")]
    Permanent(String),

    #[error("{0}")]
    Transient(String),
}

impl TaskerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskerError::HandlerNotFound(_)
            | TaskerError::Codec(_)
            | TaskerError::Permanent(_) => ErrorKind::Permanent,
            TaskerError::Directory(DirectoryError::NotFound(_)) => ErrorKind::Permanent,
            TaskerError::Validation(_) => ErrorKind::Validation,
            TaskerError::Broker(_)
            | TaskerError::DuplicateTask(_)
            | TaskerError::TaskNotFound(_)
            | TaskerError::LeaseLost(_)
            | TaskerError::Store(_)
            | TaskerError::Directory(_)
            | TaskerError::Notify(_)
            | TaskerError::Timeout(_)
            | TaskerError::Cancelled
            | TaskerError::Transient(_) => ErrorKind::Transient,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind() == ErrorKind::Permanent
    }
}
