//! CliProcessManager trait and related types
//!
//! One OS subprocess per running agent. The orchestration core only consumes
//! this interface; how the subprocess is started is up to the implementation.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::agent::AgentId;
use crate::error::ProcessError;

/// Everything needed to start one CLI run for an agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub agent_id: AgentId,
    pub prompt: String,
    /// Model alias passed to `--model`
    pub model: String,
    pub working_dir: Option<PathBuf>,
    /// Continue an existing CLI session (`--resume`)
    pub resume_session_id: Option<String>,
    /// Empty means the CLI's defaults
    pub allowed_tools: Vec<String>,
}

impl SpawnRequest {
    pub fn new(agent_id: AgentId, prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            agent_id,
            prompt: prompt.into(),
            model: model.into(),
            working_dir: None,
            resume_session_id: None,
            allowed_tools: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    #[must_use]
    pub fn resuming(mut self, session_id: Option<String>) -> Self {
        self.resume_session_id = session_id;
        self
    }

    #[must_use]
    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }
}

/// Final `result` message of a CLI run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessResult {
    pub is_error: bool,
    /// Final answer text (or error text when `is_error`)
    pub text: String,
    pub session_id: Option<String>,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub num_turns: Option<u32>,
}

/// Structured event from a running CLI subprocess
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    SessionStarted {
        session_id: String,
    },
    Thinking {
        text: String,
    },
    Text {
        text: String,
    },
    ToolInvoked {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// The agent called the question tool and needs an answer
    QuestionAsked {
        id: String,
        input: serde_json::Value,
    },
    /// The agent finished planning and needs approval
    PlanProposed {
        id: String,
        input: serde_json::Value,
    },
    ToolResult {
        id: String,
        content: String,
        is_error: bool,
    },
    Result(ProcessResult),
    /// The subprocess exited; always the last event of a run
    Exited {
        code: Option<i32>,
    },
}

/// Receiving end of one spawned run
#[derive(Debug)]
pub struct ProcessHandle {
    pub agent_id: AgentId,
    /// Closed once the subprocess is gone
    pub events: mpsc::Receiver<ProcessEvent>,
}

/// Spawns, streams and terminates CLI subprocesses
#[async_trait]
pub trait CliProcessManager: Send + Sync {
    /// Start a run; at most one per agent at a time
    async fn spawn(&self, request: SpawnRequest) -> Result<ProcessHandle, ProcessError>;

    /// Kill the agent's subprocess; its event channel closes without `Exited`
    async fn terminate(&self, agent_id: AgentId) -> Result<(), ProcessError>;

    async fn terminate_all(&self);

    async fn is_running(&self, agent_id: AgentId) -> bool;

    async fn active_count(&self) -> usize;
}
