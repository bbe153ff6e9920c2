//! Agent identity, tasks, and the agent pool

pub mod pool;
pub mod types;

pub use pool::{Acquired, AgentPool};
pub use types::{Agent, AgentId, AgentTask, TaskId};
