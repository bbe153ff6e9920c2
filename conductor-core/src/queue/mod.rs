//! Durable per-orchestration sub-task queue

mod item;
mod task_queue;

pub use item::{QueueItemStatus, SubAgentTaskQueueItem};
pub use task_queue::{FailureOutcome, SubAgentTaskQueue};
