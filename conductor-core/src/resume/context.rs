//! Resume context: everything needed to continue a suspended agent

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentId, AgentTask, TaskId};
use crate::lifecycle::{AgentLifecycleState, LifecycleEvent};
use crate::orchestration::OrchestrationId;

/// Why an agent was suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspensionReason {
    UserQuestion,
    PermissionRequest,
    PlanReview,
    AppShutdown,
    /// Idle agent whose process went away
    Idle,
}

impl SuspensionReason {
    /// Reason recorded when the process terminates while the agent is in `state`
    pub fn from_state(state: AgentLifecycleState) -> Self {
        match state {
            AgentLifecycleState::WaitingForAnswer => Self::UserQuestion,
            AgentLifecycleState::RequestingPermission => Self::PermissionRequest,
            AgentLifecycleState::ReviewingPlan => Self::PlanReview,
            _ => Self::AppShutdown,
        }
    }
}

/// What the user must answer before a suspended agent can proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Question,
    Permission,
    Plan,
}

impl InteractionKind {
    /// State an agent blocked on this interaction sits in
    pub fn waiting_state(&self) -> AgentLifecycleState {
        match self {
            Self::Question => AgentLifecycleState::WaitingForAnswer,
            Self::Permission => AgentLifecycleState::RequestingPermission,
            Self::Plan => AgentLifecycleState::ReviewingPlan,
        }
    }
}

/// A blocking request from the agent, kept verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInteraction {
    pub kind: InteractionKind,
    pub tool_name: Option<String>,
    pub tool_use_id: Option<String>,
    /// Raw JSON input of the tool call, exactly as the CLI emitted it
    pub input: String,
    pub received_at: DateTime<Utc>,
}

impl PendingInteraction {
    pub fn new(kind: InteractionKind, input: impl Into<String>) -> Self {
        Self {
            kind,
            tool_name: None,
            tool_use_id: None,
            input: input.into(),
            received_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_tool(mut self, name: impl Into<String>, use_id: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self.tool_use_id = Some(use_id.into());
        self
    }

    /// Parse the raw input
    pub fn input_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.input)
    }
}

/// The user's reply to a [`PendingInteraction`]
///
/// `approved` is ignored for questions. A declined plan or permission still
/// continues the session, with `message` telling the agent why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionResponse {
    pub approved: bool,
    pub message: String,
}

impl InteractionResponse {
    pub fn approve(message: impl Into<String>) -> Self {
        Self {
            approved: true,
            message: message.into(),
        }
    }

    pub fn reject(message: impl Into<String>) -> Self {
        Self {
            approved: false,
            message: message.into(),
        }
    }

    /// Lifecycle event delivering this reply to an agent blocked on `kind`
    pub fn event(&self, kind: InteractionKind) -> LifecycleEvent {
        match (kind, self.approved) {
            (InteractionKind::Question, _) => LifecycleEvent::AnswerReceived,
            (InteractionKind::Plan, true) => LifecycleEvent::PlanApproved,
            (InteractionKind::Plan, false) => LifecycleEvent::PlanRejected,
            (InteractionKind::Permission, true) => LifecycleEvent::PermissionGranted,
            (InteractionKind::Permission, false) => LifecycleEvent::PermissionDenied,
        }
    }
}

/// Plain text answers and approves
impl From<&str> for InteractionResponse {
    fn from(message: &str) -> Self {
        Self::approve(message)
    }
}

impl From<String> for InteractionResponse {
    fn from(message: String) -> Self {
        Self::approve(message)
    }
}

/// Durable snapshot of one suspended agent
///
/// Self-sufficient: [`ResumeContext::into_parts`] rebuilds the agent and its
/// task without consulting any other state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeContext {
    // Agent identity
    pub agent_id: AgentId,
    pub name: String,
    pub role: String,
    pub model: String,
    pub personality: String,
    pub appearance: String,
    pub session_id: Option<String>,
    pub working_dir: Option<PathBuf>,

    // Task identity (absent for agents suspended while idle)
    pub task_id: Option<TaskId>,
    pub task_title: Option<String>,
    pub original_prompt: Option<String>,
    pub task_started_at: Option<DateTime<Utc>>,

    // Suspension metadata
    pub suspension_reason: SuspensionReason,
    pub suspended_at: DateTime<Utc>,
    pub tool_call_count: u32,
    pub progress: f64,

    // Linkage
    pub team_id: Option<String>,
    pub commander_id: Option<AgentId>,
    pub orchestration_id: Option<OrchestrationId>,
    pub orchestration_task_index: Option<usize>,

    pub pending_interaction: Option<PendingInteraction>,
}

impl ResumeContext {
    pub fn capture(
        agent: &Agent,
        task: Option<&AgentTask>,
        reason: SuspensionReason,
        pending_interaction: Option<PendingInteraction>,
    ) -> Self {
        Self {
            agent_id: agent.id,
            name: agent.name.clone(),
            role: agent.role.clone(),
            model: agent.model.clone(),
            personality: agent.personality.clone(),
            appearance: agent.appearance.clone(),
            session_id: agent.session_id.clone(),
            working_dir: agent.working_dir.clone(),
            task_id: task.map(|t| t.id),
            task_title: task.map(|t| t.title.clone()),
            original_prompt: task.map(|t| t.prompt.clone()),
            task_started_at: task.map(|t| t.started_at),
            suspension_reason: reason,
            suspended_at: Utc::now(),
            tool_call_count: task.map_or(0, |t| t.tool_call_count),
            progress: task.map_or(0.0, |t| t.progress),
            team_id: agent.team_id.clone(),
            commander_id: agent.commander_id,
            orchestration_id: task.and_then(|t| t.orchestration_id),
            orchestration_task_index: task.and_then(|t| t.orchestration_task_index),
            pending_interaction,
        }
    }

    pub fn agent(&self) -> Agent {
        Agent {
            id: self.agent_id,
            name: self.name.clone(),
            role: self.role.clone(),
            model: self.model.clone(),
            personality: self.personality.clone(),
            appearance: self.appearance.clone(),
            session_id: self.session_id.clone(),
            working_dir: self.working_dir.clone(),
            team_id: self.team_id.clone(),
            commander_id: self.commander_id,
        }
    }

    pub fn task(&self) -> Option<AgentTask> {
        let id = self.task_id?;
        Some(AgentTask {
            id,
            title: self.task_title.clone().unwrap_or_default(),
            prompt: self.original_prompt.clone().unwrap_or_default(),
            orchestration_id: self.orchestration_id,
            orchestration_task_index: self.orchestration_task_index,
            tool_call_count: self.tool_call_count,
            progress: self.progress,
            started_at: self.task_started_at.unwrap_or(self.suspended_at),
        })
    }

    pub fn into_parts(self) -> (Agent, Option<AgentTask>, Option<PendingInteraction>) {
        let agent = self.agent();
        let task = self.task();
        (agent, task, self.pending_interaction)
    }
}
