//! Event type definitions

use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::lifecycle::{AgentLifecycleState, LifecycleEvent};
use crate::orchestration::{OrchestrationId, OrchestrationPhase, SubTaskStatus};
use crate::policy::ResourcePressure;
use crate::resume::{PendingInteraction, SuspensionReason};

/// Events on the conductor event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConductorEvent {
    /// An agent changed lifecycle state
    AgentStateChanged {
        agent_id: AgentId,
        from: AgentLifecycleState,
        to: AgentLifecycleState,
        event: LifecycleEvent,
    },

    /// An event arrived that the agent's state does not accept (dropped)
    TransitionRejected {
        agent_id: AgentId,
        event: LifecycleEvent,
        reason: String,
    },

    /// A sub-task of an orchestration run changed status
    SubTaskStatusChanged {
        orchestration_id: OrchestrationId,
        index: usize,
        status: SubTaskStatus,
    },

    /// An orchestration run moved to a new phase
    OrchestrationPhaseChanged {
        orchestration_id: OrchestrationId,
        phase: OrchestrationPhase,
    },

    /// An orchestration run started a new wave
    WaveStarted {
        orchestration_id: OrchestrationId,
        wave: usize,
    },

    /// An agent is blocked until the user responds
    InteractionPending {
        agent_id: AgentId,
        orchestration_id: Option<OrchestrationId>,
        interaction: PendingInteraction,
    },

    /// A resume context was persisted for a suspended agent
    AgentSuspended {
        agent_id: AgentId,
        reason: SuspensionReason,
    },

    /// Resource pressure level changed
    PressureChanged {
        from: ResourcePressure,
        to: ResourcePressure,
    },
}

impl ConductorEvent {
    /// Extract agent ID if this event is agent-related
    pub fn agent_id(&self) -> Option<AgentId> {
        match self {
            ConductorEvent::AgentStateChanged { agent_id, .. }
            | ConductorEvent::TransitionRejected { agent_id, .. }
            | ConductorEvent::InteractionPending { agent_id, .. }
            | ConductorEvent::AgentSuspended { agent_id, .. } => Some(*agent_id),
            ConductorEvent::SubTaskStatusChanged { .. }
            | ConductorEvent::OrchestrationPhaseChanged { .. }
            | ConductorEvent::WaveStarted { .. }
            | ConductorEvent::PressureChanged { .. } => None,
        }
    }

    /// Extract orchestration ID if this event belongs to a run
    pub fn orchestration_id(&self) -> Option<OrchestrationId> {
        match self {
            ConductorEvent::SubTaskStatusChanged {
                orchestration_id, ..
            }
            | ConductorEvent::OrchestrationPhaseChanged {
                orchestration_id, ..
            }
            | ConductorEvent::WaveStarted {
                orchestration_id, ..
            } => Some(*orchestration_id),
            ConductorEvent::InteractionPending {
                orchestration_id, ..
            } => *orchestration_id,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_events_expose_agent_id() {
        let id = AgentId::new();
        let event = ConductorEvent::AgentStateChanged {
            agent_id: id,
            from: AgentLifecycleState::Idle,
            to: AgentLifecycleState::Working,
            event: LifecycleEvent::AssignTask,
        };
        assert_eq!(event.agent_id(), Some(id));
        assert_eq!(event.orchestration_id(), None);
    }

    #[test]
    fn run_events_expose_orchestration_id() {
        let id = OrchestrationId::new();
        let event = ConductorEvent::WaveStarted {
            orchestration_id: id,
            wave: 1,
        };
        assert_eq!(event.orchestration_id(), Some(id));
        assert_eq!(event.agent_id(), None);
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = ConductorEvent::PressureChanged {
            from: ResourcePressure::Normal,
            to: ResourcePressure::High,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "pressure_changed");
        assert_eq!(json["to"], "high");
    }
}
