//! Lifecycle events, transition context, and side effects

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::TaskId;
use crate::resume::{InteractionKind, SuspensionReason};

/// Input to the lifecycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Create,
    ResourcesLoaded,
    AssignTask,
    AiReasoning,
    ToolInvoked,
    PermissionNeeded,
    PermissionGranted,
    PermissionDenied,
    QuestionAsked,
    AnswerReceived,
    PlanReady,
    PlanApproved,
    PlanRejected,
    /// The host process is terminating
    ProcessTerminated,
    TaskCompleted,
    TaskFailed,
    Resume,
    Cancel,
    Retry,
    Timeout,
    IdleTimeout,
    PoolReturn,
    PoolEviction,
    AssignNewTask,
    ReturnToPool,
    DisbandScheduled,
    CleanupTriggered,
    AnimationComplete,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 28] = [
        Self::Create,
        Self::ResourcesLoaded,
        Self::AssignTask,
        Self::AiReasoning,
        Self::ToolInvoked,
        Self::PermissionNeeded,
        Self::PermissionGranted,
        Self::PermissionDenied,
        Self::QuestionAsked,
        Self::AnswerReceived,
        Self::PlanReady,
        Self::PlanApproved,
        Self::PlanRejected,
        Self::ProcessTerminated,
        Self::TaskCompleted,
        Self::TaskFailed,
        Self::Resume,
        Self::Cancel,
        Self::Retry,
        Self::Timeout,
        Self::IdleTimeout,
        Self::PoolReturn,
        Self::PoolEviction,
        Self::AssignNewTask,
        Self::ReturnToPool,
        Self::DisbandScheduled,
        Self::CleanupTriggered,
        Self::AnimationComplete,
    ];
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Facts about the agent's surroundings that guard some transitions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentLifecycleContext {
    pub session_id: Option<String>,
    pub task_id: Option<TaskId>,
    /// Maximum number of pooled agents
    pub pool_capacity: usize,
    /// Agents currently pooled
    pub pool_size: usize,
    pub idle_duration: Duration,
    /// Interaction the agent is blocked on, if any (consulted by `Resume`)
    pub pending_interaction: Option<InteractionKind>,
    /// Whether a CLI subprocess is still attached to the agent
    pub process_attached: bool,
}

impl AgentLifecycleContext {
    pub fn pool_has_room(&self) -> bool {
        self.pool_size < self.pool_capacity
    }
}

/// Side effect requested by a transition
///
/// The state machine never performs these; the caller executes them against
/// the process manager and persistence collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEffect {
    SpawnProcess,
    TerminateProcess,
    WriteResumeContext { reason: SuspensionReason },
    DeleteResumeContext,
    ReturnToPool,
    ScheduleDestroy,
}
