//! Task state machine as tracked by the broker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Broker-side state of a task.
///
/// State transitions:
/// - Pending -> Leased -> Done
/// - Pending -> Leased -> Pending (nack with backoff, or lease expiry)
/// - Pending -> Leased -> DeadLettered (retries exhausted or permanent error)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting to be leased (possibly not yet visible because of backoff).
    Pending,

    /// Claimed by exactly one worker until ack/nack or lease expiry.
    Leased,

    /// Handler succeeded and the task was acked.
    Done,

    /// Terminally failed; never leased again.
    DeadLettered,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::DeadLettered)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Leased => "leased",
            TaskState::Done => "done",
            TaskState::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "leased" => Ok(TaskState::Leased),
            "done" => Ok(TaskState::Done),
            "dead_lettered" => Ok(TaskState::DeadLettered),
            other => Err(format!("unknown task state: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_done_and_dead_are_terminal() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Leased.is_terminal());
        assert!(TaskState::Done.is_terminal());
        assert!(TaskState::DeadLettered.is_terminal());
    }

    #[test]
    fn string_form_matches_storage_column() {
        for state in [
            TaskState::Pending,
            TaskState::Leased,
            TaskState::Done,
            TaskState::DeadLettered,
        ] {
            assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
        }
    }
}
