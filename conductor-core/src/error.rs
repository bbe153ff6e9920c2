//! Error types for conductor-core

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::AgentId;
use crate::lifecycle::{AgentLifecycleState, LifecycleEvent};
use crate::orchestration::OrchestrationId;
use crate::policy::is_user_cancellation;
use crate::queue::QueueItemStatus;

/// Top-level error type for conductor-core
#[derive(Error, Debug)]
pub enum ConductorError {
    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Suspension error: {0}")]
    Suspension(#[from] SuspensionError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

pub type ConductorResult<T> = Result<T, ConductorError>;

/// An event the agent's current state does not accept
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Agent {agent_id} in state {state} does not accept {event}")]
    InvalidTransition {
        agent_id: AgentId,
        state: AgentLifecycleState,
        event: LifecycleEvent,
    },

    #[error("Agent {agent_id} is destroyed and cannot accept {event}")]
    TerminalStateViolation {
        agent_id: AgentId,
        event: LifecycleEvent,
    },

    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),
}

/// The decomposition response could not be used
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecompositionError {
    #[error("Malformed decomposition JSON: {0}")]
    MalformedJson(String),

    #[error("Decomposition returned no subtasks")]
    EmptySubtasks,

    #[error("Decomposition process failed: {0}")]
    ProcessFailed(String),
}

/// The dependency graph of a decomposition is not a forward-only DAG
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencyError {
    #[error("Subtask {index} depends on itself")]
    SelfReference { index: usize },

    #[error("Subtask {index} depends on later subtask {dependency}")]
    ForwardReference { index: usize, dependency: usize },

    #[error("Subtask {index} depends on unknown subtask {dependency} (only {len} subtasks)")]
    OutOfRange {
        index: usize,
        dependency: usize,
        len: usize,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue item {index} not found")]
    NotFound { index: usize },

    #[error("Queue item {index} is already claimed")]
    AlreadyClaimed { index: usize },

    #[error("Queue item {index} is {actual}, expected {expected}")]
    InvalidStatus {
        index: usize,
        expected: QueueItemStatus,
        actual: QueueItemStatus,
    },

    #[error("Queue item {index} cannot be retried")]
    RetryNotAllowed { index: usize },
}

/// Errors from CLI subprocess management
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn Claude process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("Claude binary not found. Is Claude Code installed?")]
    ClaudeNotFound,

    #[error("No process running for agent {0}")]
    NotRunning(AgentId),

    #[error("Process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid store key: {0}")]
    InvalidKey(String),
}

#[derive(Error, Debug)]
pub enum SuspensionError {
    #[error("No resume context for agent {0}")]
    NotFound(AgentId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors that abort a whole orchestration run or an engine call
#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error(transparent)]
    Decomposition(#[from] DecompositionError),

    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Suspension(#[from] SuspensionError),

    #[error("Orchestration not found: {0}")]
    NotFound(OrchestrationId),

    #[error("Orchestration {0} was cancelled")]
    Cancelled(OrchestrationId),

    #[error("All subtasks of orchestration {0} failed")]
    AllSubtasksFailed(OrchestrationId),

    #[error("Agent {0} has no pending interaction")]
    NoPendingInteraction(AgentId),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Classification of a per-sub-task failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Non-zero exit, crash or `result.is_error`
    Subprocess,
    /// No progress within the hang timeout
    Timeout,
    /// Stopped by the user; never retried
    Cancelled,
    /// A dependency failed permanently
    DependencyFailed,
    /// The subprocess could not be started
    Spawn,
    /// The host shut down while the task was running
    Interrupted,
}

/// Structured record of why a sub-task failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
    pub agent_id: Option<AgentId>,
    /// Retry count at the time of failure
    pub attempt: u32,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            agent_id: None,
            attempt: 0,
        }
    }

    #[must_use]
    pub fn on_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    #[must_use]
    pub fn at_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// True for explicit cancellations and for messages that read like one
    pub fn is_user_cancellation(&self) -> bool {
        self.kind == FailureKind::Cancelled || is_user_cancellation(&self.message)
    }

    /// Whether the retry policy may schedule another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            FailureKind::Subprocess | FailureKind::Timeout | FailureKind::Spawn
        ) && !self.is_user_cancellation()
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}
