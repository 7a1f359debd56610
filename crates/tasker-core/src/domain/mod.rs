//! Domain model: ids, tasks, task state and the todo rows scanned by cron jobs.

pub mod ids;
pub mod state;
pub mod task;
pub mod todo;

pub use ids::{Id, IdMarker, LeaseToken, RunId, TaskId};
pub use state::TaskState;
pub use task::{QueueName, Task, TaskType};
pub use todo::{Priority, Todo, TodoStatus, TodoSummary, UserBatchStat};
