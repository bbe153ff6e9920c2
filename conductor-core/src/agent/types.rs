//! Agent type definitions

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::orchestration::OrchestrationId;

/// Unique identifier for an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

/// Unique identifier for a task assigned to an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl AgentId {
    /// Create a new agent ID using UUID v7 (time-ordered)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TaskId {
    /// Create a new task ID using UUID v7 (time-ordered)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one agent instance
///
/// Everything here is persisted in a resume context, so an agent rebuilt after a
/// restart compares equal to the one that was suspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub role: String,
    /// Model alias passed to the CLI (`--model`)
    pub model: String,
    pub personality: String,
    pub appearance: String,
    /// CLI session ID, known once the subprocess reports it
    pub session_id: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub team_id: Option<String>,
    /// Agent that owns the orchestration this agent works for
    pub commander_id: Option<AgentId>,
}

impl Agent {
    /// Create an agent with default role and presentation
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(),
            name: name.into(),
            role: "sub-agent".to_string(),
            model: model.into(),
            personality: "focused".to_string(),
            appearance: "default".to_string(),
            session_id: None,
            working_dir: None,
            team_id: None,
            commander_id: None,
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_commander(mut self, commander_id: AgentId, team_id: impl Into<String>) -> Self {
        self.commander_id = Some(commander_id);
        self.team_id = Some(team_id.into());
        self
    }
}

/// A unit of work handed to one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: TaskId,
    pub title: String,
    /// Prompt the task was started with
    pub prompt: String,
    pub orchestration_id: Option<OrchestrationId>,
    /// Position of the sub-task inside its orchestration
    pub orchestration_task_index: Option<usize>,
    pub tool_call_count: u32,
    /// Rough completion estimate in `[0.0, 1.0]`
    pub progress: f64,
    pub started_at: DateTime<Utc>,
}

impl AgentTask {
    /// Create a standalone task
    pub fn new(title: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            title: title.into(),
            prompt: prompt.into(),
            orchestration_id: None,
            orchestration_task_index: None,
            tool_call_count: 0,
            progress: 0.0,
            started_at: Utc::now(),
        }
    }

    /// Link this task to a sub-task of an orchestration run
    #[must_use]
    pub fn for_subtask(mut self, orchestration_id: OrchestrationId, index: usize) -> Self {
        self.orchestration_id = Some(orchestration_id);
        self.orchestration_task_index = Some(index);
        self
    }

    /// Record one tool invocation and nudge the progress estimate
    ///
    /// Progress approaches 0.9 asymptotically; only completion reports 1.0.
    pub fn record_tool_call(&mut self) {
        self.tool_call_count += 1;
        self.progress += (0.9 - self.progress) * 0.1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_is_unique() {
        let id1 = AgentId::new();
        let id2 = AgentId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn agent_id_display() {
        let id = AgentId::new();
        let display = format!("{}", id);
        assert!(!display.is_empty());
    }

    #[test]
    fn agent_builder_sets_linkage() {
        let commander = AgentId::new();
        let agent = Agent::new("worker-1", "sonnet")
            .with_role("reviewer")
            .with_commander(commander, "team-a");

        assert_eq!(agent.role, "reviewer");
        assert_eq!(agent.commander_id, Some(commander));
        assert_eq!(agent.team_id.as_deref(), Some("team-a"));
        assert!(agent.session_id.is_none());
    }

    #[test]
    fn task_progress_stays_below_completion() {
        let mut task = AgentTask::new("t", "do it");
        for _ in 0..200 {
            task.record_tool_call();
        }
        assert_eq!(task.tool_call_count, 200);
        assert!(task.progress < 0.9);
        assert!(task.progress > 0.8);
    }

    #[test]
    fn task_subtask_linkage() {
        let orchestration_id = OrchestrationId::new();
        let task = AgentTask::new("t", "p").for_subtask(orchestration_id, 3);
        assert_eq!(task.orchestration_id, Some(orchestration_id));
        assert_eq!(task.orchestration_task_index, Some(3));
    }
}
