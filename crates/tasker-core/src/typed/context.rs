use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::{TaskId, TaskType};

/// Per-invocation context handed to a handler.
///
/// The dispatcher cancels `cancel` when the worker pool shuts down past its
/// grace period; long-running handlers should check it between steps.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub task_type: TaskType,
    /// Failed attempts before this one.
    pub retry_count: u32,
    pub max_retry: u32,
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

impl TaskContext {
    /// 1-indexed attempt number of this invocation.
    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }

    pub fn is_last_attempt(&self) -> bool {
        self.retry_count >= self.max_retry
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn attempt_numbers() {
        let ctx = TaskContext {
            task_id: TaskId::generate(),
            task_type: TaskType::new("t"),
            retry_count: 3,
            max_retry: 3,
            deadline: Instant::now() + Duration::from_secs(1),
            cancel: CancellationToken::new(),
        };

        assert_eq!(ctx.attempt(), 4);
        assert!(ctx.is_last_attempt());
        assert!(!ctx.is_cancelled());
        ctx.cancel.cancel();
        assert!(ctx.is_cancelled());
    }
}
