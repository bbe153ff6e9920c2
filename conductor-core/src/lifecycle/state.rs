//! Agent lifecycle states

use serde::{Deserialize, Serialize};

/// State of one agent instance
///
/// Every agent has exactly one current state. States are only changed through
/// [`AgentLifecycleStateMachine::transition`](super::AgentLifecycleStateMachine::transition).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLifecycleState {
    Initializing,
    Idle,
    Working,
    Thinking,
    RequestingPermission,
    WaitingForAnswer,
    ReviewingPlan,
    Suspended,
    SuspendedIdle,
    Completed,
    Error,
    Pooled,
    Destroying,
    /// The only terminal state
    Destroyed,
}

impl AgentLifecycleState {
    /// Every state, in declaration order
    pub const ALL: [AgentLifecycleState; 14] = [
        Self::Initializing,
        Self::Idle,
        Self::Working,
        Self::Thinking,
        Self::RequestingPermission,
        Self::WaitingForAnswer,
        Self::ReviewingPlan,
        Self::Suspended,
        Self::SuspendedIdle,
        Self::Completed,
        Self::Error,
        Self::Pooled,
        Self::Destroying,
        Self::Destroyed,
    ];

    /// Mid-task; pool reclaim and cleanup must never touch the agent
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Working
                | Self::Thinking
                | Self::RequestingPermission
                | Self::WaitingForAnswer
                | Self::ReviewingPlan
        )
    }

    /// Can take a new task without full re-initialization
    pub fn is_available_for_task(&self) -> bool {
        matches!(self, Self::Idle | Self::Pooled | Self::SuspendedIdle)
    }

    /// Eligible for reclaim by the resource monitor
    pub fn is_cleanup_candidate(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Completed | Self::Error | Self::Pooled | Self::SuspendedIdle
        )
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended | Self::SuspendedIdle)
    }

    /// Waiting on a user response to a question, permission, or plan
    pub fn is_awaiting_user(&self) -> bool {
        matches!(
            self,
            Self::RequestingPermission | Self::WaitingForAnswer | Self::ReviewingPlan
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Destroyed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Thinking => "thinking",
            Self::RequestingPermission => "requesting_permission",
            Self::WaitingForAnswer => "waiting_for_answer",
            Self::ReviewingPlan => "reviewing_plan",
            Self::Suspended => "suspended",
            Self::SuspendedIdle => "suspended_idle",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Pooled => "pooled",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
        }
    }
}

impl std::fmt::Display for AgentLifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
