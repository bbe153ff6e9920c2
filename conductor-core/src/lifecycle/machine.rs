//! Agent lifecycle state machine
//!
//! The transition table is a pure function over `(state, event, context)`.
//! [`AgentLifecycleStateMachine`] owns the current state of every agent and is
//! the only place states change. Side effects come back as data
//! ([`LifecycleEffect`]) for the caller to execute.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use super::event::{AgentLifecycleContext, LifecycleEffect, LifecycleEvent};
use super::state::AgentLifecycleState;
use crate::agent::AgentId;
use crate::error::TransitionError;
use crate::events::{ConductorEvent, EventBus};
use crate::resume::{InteractionKind, SuspensionReason};

/// Why the table refused an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The state does not accept the event
    Invalid,
    /// The state is terminal and accepts nothing
    Terminal,
}

/// Next state plus the effects the caller must run
pub type TableEntry = Result<(AgentLifecycleState, Vec<LifecycleEffect>), Rejection>;

/// Result of a successful transition
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub agent_id: AgentId,
    pub from: AgentLifecycleState,
    pub to: AgentLifecycleState,
    pub event: LifecycleEvent,
    pub effects: Vec<LifecycleEffect>,
}

impl TransitionOutcome {
    pub fn has_effect(&self, effect: &LifecycleEffect) -> bool {
        self.effects.contains(effect)
    }
}

/// The transition table
///
/// Total over every `(state, event)` pair: each pair yields exactly one next
/// state or a rejection.
pub fn resolve(
    state: AgentLifecycleState,
    event: LifecycleEvent,
    ctx: &AgentLifecycleContext,
) -> TableEntry {
    use AgentLifecycleState as S;
    use LifecycleEvent as E;
    use LifecycleEffect as Fx;

    let terminate_if_attached = || {
        if ctx.process_attached {
            vec![Fx::TerminateProcess]
        } else {
            Vec::new()
        }
    };
    let spawn_if_detached = || {
        if ctx.process_attached {
            Vec::new()
        } else {
            vec![Fx::SpawnProcess]
        }
    };
    let to_pool = || {
        if ctx.pool_has_room() {
            (S::Pooled, vec![Fx::ReturnToPool])
        } else {
            (S::Destroying, vec![Fx::ScheduleDestroy])
        }
    };
    let destroy = || (S::Destroying, vec![Fx::ScheduleDestroy]);

    let entry = match (state, event) {
        (S::Destroyed, _) => return Err(Rejection::Terminal),

        (S::Initializing, E::ResourcesLoaded) => (S::Idle, vec![]),
        (S::Initializing, E::TaskFailed | E::Timeout) => (S::Error, vec![]),
        (S::Initializing, E::Cancel | E::CleanupTriggered | E::DisbandScheduled) => destroy(),

        (S::Idle | S::Pooled | S::Completed | S::Error, E::AssignTask | E::AssignNewTask) => {
            (S::Working, vec![Fx::SpawnProcess])
        }
        (S::SuspendedIdle, E::AssignTask | E::AssignNewTask) => (
            S::Working,
            vec![Fx::DeleteResumeContext, Fx::SpawnProcess],
        ),

        (S::Idle | S::Completed, E::IdleTimeout | E::ReturnToPool | E::PoolReturn) => to_pool(),
        (S::Error, E::ReturnToPool | E::PoolReturn) => to_pool(),
        (S::Completed | S::Error, E::AnimationComplete) => (S::Idle, vec![]),
        (S::Error, E::Retry) => (S::Working, vec![Fx::SpawnProcess]),
        (S::Error, E::Cancel) => (S::Idle, vec![]),
        (
            S::Idle | S::Completed | S::Error | S::Pooled,
            E::DisbandScheduled | E::CleanupTriggered,
        ) => destroy(),
        (S::Pooled, E::PoolEviction | E::IdleTimeout) => destroy(),
        (S::Idle | S::Completed | S::Error, E::ProcessTerminated) => (
            S::SuspendedIdle,
            vec![Fx::WriteResumeContext {
                reason: SuspensionReason::Idle,
            }],
        ),
        (S::Pooled, E::ProcessTerminated) => (S::Pooled, vec![]),

        (S::Working | S::Thinking, E::AiReasoning) => (S::Thinking, vec![]),
        (S::Working | S::Thinking, E::ToolInvoked) => (S::Working, vec![]),
        (S::Working | S::Thinking, E::PermissionNeeded) => (S::RequestingPermission, vec![]),
        (S::Working | S::Thinking, E::QuestionAsked) => (S::WaitingForAnswer, vec![]),
        (S::Working | S::Thinking, E::PlanReady) => (S::ReviewingPlan, vec![]),
        (S::Working | S::Thinking, E::TaskCompleted) => (S::Completed, vec![]),
        (S::Working | S::Thinking, E::Timeout) => (S::Error, vec![Fx::TerminateProcess]),

        (S::RequestingPermission, E::PermissionGranted | E::PermissionDenied) => {
            (S::Working, spawn_if_detached())
        }
        (S::WaitingForAnswer, E::AnswerReceived) => (S::Working, spawn_if_detached()),
        (S::ReviewingPlan, E::PlanApproved) => (S::Working, spawn_if_detached()),
        (S::ReviewingPlan, E::PlanRejected) => (S::Thinking, spawn_if_detached()),

        (active, E::TaskFailed) if active.is_active() => (S::Error, terminate_if_attached()),
        (active, E::Cancel) if active.is_active() => (S::Idle, terminate_if_attached()),
        (active, E::ProcessTerminated) if active.is_active() => (
            S::Suspended,
            vec![Fx::WriteResumeContext {
                reason: SuspensionReason::from_state(active),
            }],
        ),

        (S::Suspended, E::Resume) => match ctx.pending_interaction {
            Some(InteractionKind::Question) => (S::WaitingForAnswer, vec![Fx::DeleteResumeContext]),
            Some(InteractionKind::Permission) => {
                (S::RequestingPermission, vec![Fx::DeleteResumeContext])
            }
            Some(InteractionKind::Plan) => (S::ReviewingPlan, vec![Fx::DeleteResumeContext]),
            None => (
                S::Working,
                vec![Fx::DeleteResumeContext, Fx::SpawnProcess],
            ),
        },
        (S::Suspended, E::Cancel) => (S::Idle, vec![Fx::DeleteResumeContext]),
        (S::Suspended | S::SuspendedIdle, E::ProcessTerminated) => (state, vec![]),
        (S::Suspended, E::CleanupTriggered | E::DisbandScheduled) => (
            S::Destroying,
            vec![Fx::DeleteResumeContext, Fx::ScheduleDestroy],
        ),
        (S::SuspendedIdle, E::Resume) => (S::Idle, vec![Fx::DeleteResumeContext]),
        (S::SuspendedIdle, E::IdleTimeout | E::CleanupTriggered | E::DisbandScheduled) => (
            S::Destroying,
            vec![Fx::DeleteResumeContext, Fx::ScheduleDestroy],
        ),

        (S::Destroying, E::AnimationComplete) => (S::Destroyed, vec![]),

        _ => return Err(Rejection::Invalid),
    };

    Ok(entry)
}

#[derive(Debug, Clone, Copy)]
struct AgentEntry {
    state: AgentLifecycleState,
    since: Instant,
}

/// Owner of every agent's current lifecycle state
///
/// The state of an agent is looked up here, never supplied by callers, so two
/// racing events cannot both act on the same stale state.
pub struct AgentLifecycleStateMachine {
    agents: RwLock<HashMap<AgentId, AgentEntry>>,
    event_bus: Option<Arc<dyn EventBus>>,
}

impl AgentLifecycleStateMachine {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            event_bus: None,
        }
    }

    /// Publish every successful transition as [`ConductorEvent::AgentStateChanged`]
    pub fn with_event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Register a new agent in `initializing`
    pub async fn create(&self, agent_id: AgentId) -> Result<TransitionOutcome, TransitionError> {
        self.transition(agent_id, LifecycleEvent::Create, &AgentLifecycleContext::default())
            .await
    }

    /// Apply an event to an agent
    ///
    /// `Create` is only accepted for unknown agents; every other event requires
    /// the agent to exist.
    pub async fn transition(
        &self,
        agent_id: AgentId,
        event: LifecycleEvent,
        ctx: &AgentLifecycleContext,
    ) -> Result<TransitionOutcome, TransitionError> {
        let outcome = {
            let mut agents = self.agents.write().await;

            if event == LifecycleEvent::Create {
                if let Some(entry) = agents.get(&agent_id) {
                    return Err(rejection_error(agent_id, entry.state, event, Rejection::Invalid));
                }
                agents.insert(
                    agent_id,
                    AgentEntry {
                        state: AgentLifecycleState::Initializing,
                        since: Instant::now(),
                    },
                );
                TransitionOutcome {
                    agent_id,
                    from: AgentLifecycleState::Initializing,
                    to: AgentLifecycleState::Initializing,
                    event,
                    effects: Vec::new(),
                }
            } else {
                let entry = agents
                    .get_mut(&agent_id)
                    .ok_or(TransitionError::AgentNotFound(agent_id))?;
                let from = entry.state;
                let (to, effects) = resolve(from, event, ctx)
                    .map_err(|rejection| rejection_error(agent_id, from, event, rejection))?;
                if to != from {
                    entry.since = Instant::now();
                }
                entry.state = to;
                TransitionOutcome {
                    agent_id,
                    from,
                    to,
                    event,
                    effects,
                }
            }
        };

        debug!(
            agent_id = %agent_id,
            from = %outcome.from,
            to = %outcome.to,
            event = %event,
            effects = outcome.effects.len(),
            "Lifecycle transition"
        );

        if let Some(bus) = &self.event_bus {
            bus.publish(ConductorEvent::AgentStateChanged {
                agent_id,
                from: outcome.from,
                to: outcome.to,
                event,
            })
            .await;
        }

        Ok(outcome)
    }

    /// Put an agent into a known state without a transition
    ///
    /// Only for rebuilding state from a persisted snapshot at startup.
    pub async fn restore(&self, agent_id: AgentId, state: AgentLifecycleState) {
        self.agents.write().await.insert(
            agent_id,
            AgentEntry {
                state,
                since: Instant::now(),
            },
        );
    }

    pub async fn state(&self, agent_id: AgentId) -> Option<AgentLifecycleState> {
        self.agents.read().await.get(&agent_id).map(|e| e.state)
    }

    /// How long the agent has been in its current state
    pub async fn time_in_state(&self, agent_id: AgentId) -> Option<Duration> {
        self.agents
            .read()
            .await
            .get(&agent_id)
            .map(|e| e.since.elapsed())
    }

    /// Every agent with its state and time spent in it
    pub async fn snapshot(&self) -> Vec<(AgentId, AgentLifecycleState, Duration)> {
        let mut entries: Vec<_> = self
            .agents
            .read()
            .await
            .iter()
            .map(|(id, e)| (*id, e.state, e.since.elapsed()))
            .collect();
        entries.sort_by_key(|(id, _, _)| *id);
        entries
    }

    pub async fn count_where(&self, predicate: impl Fn(&AgentLifecycleState) -> bool) -> usize {
        self.agents
            .read()
            .await
            .values()
            .filter(|e| predicate(&e.state))
            .count()
    }

    pub async fn agents_where(
        &self,
        predicate: impl Fn(&AgentLifecycleState) -> bool,
    ) -> Vec<AgentId> {
        let mut ids: Vec<_> = self
            .agents
            .read()
            .await
            .iter()
            .filter(|(_, e)| predicate(&e.state))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Drop bookkeeping for destroyed agents, returning how many were removed
    pub async fn purge_destroyed(&self) -> usize {
        let mut agents = self.agents.write().await;
        let before = agents.len();
        agents.retain(|_, e| !e.state.is_terminal());
        before - agents.len()
    }
}

impl Default for AgentLifecycleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn rejection_error(
    agent_id: AgentId,
    state: AgentLifecycleState,
    event: LifecycleEvent,
    rejection: Rejection,
) -> TransitionError {
    match rejection {
        Rejection::Invalid => TransitionError::InvalidTransition {
            agent_id,
            state,
            event,
        },
        Rejection::Terminal => TransitionError::TerminalStateViolation { agent_id, event },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventBus;
    use AgentLifecycleState as S;
    use LifecycleEvent as E;

    fn ctx() -> AgentLifecycleContext {
        AgentLifecycleContext {
            pool_capacity: 2,
            process_attached: true,
            ..Default::default()
        }
    }

    // ==================== Table Tests ====================

    #[test]
    fn table_is_total() {
        let contexts = [
            AgentLifecycleContext::default(),
            ctx(),
            AgentLifecycleContext {
                pending_interaction: Some(InteractionKind::Question),
                ..Default::default()
            },
        ];
        for state in S::ALL {
            for event in E::ALL {
                for c in &contexts {
                    match resolve(state, event, c) {
                        Ok((next, _)) => assert!(S::ALL.contains(&next)),
                        Err(Rejection::Terminal) => assert_eq!(state, S::Destroyed),
                        Err(Rejection::Invalid) => assert_ne!(state, S::Destroyed),
                    }
                }
            }
        }
    }

    #[test]
    fn destroyed_absorbs_every_event() {
        for event in E::ALL {
            assert_eq!(
                resolve(S::Destroyed, event, &ctx()),
                Err(Rejection::Terminal)
            );
        }
    }

    #[test]
    fn task_completed_while_idle_is_invalid() {
        assert_eq!(
            resolve(S::Idle, E::TaskCompleted, &ctx()),
            Err(Rejection::Invalid)
        );
    }

    #[test]
    fn resume_requires_suspension() {
        for state in S::ALL {
            let result = resolve(state, E::Resume, &ctx());
            if state.is_suspended() {
                assert!(result.is_ok(), "{state} should accept resume");
            } else {
                assert!(result.is_err(), "{state} should reject resume");
            }
        }
    }

    #[test]
    fn assign_task_spawns_process() {
        let (next, effects) = resolve(S::Idle, E::AssignTask, &ctx()).unwrap();
        assert_eq!(next, S::Working);
        assert_eq!(effects, vec![LifecycleEffect::SpawnProcess]);
    }

    #[test]
    fn assign_from_suspended_idle_discards_resume_context() {
        let (next, effects) = resolve(S::SuspendedIdle, E::AssignNewTask, &ctx()).unwrap();
        assert_eq!(next, S::Working);
        assert_eq!(
            effects,
            vec![
                LifecycleEffect::DeleteResumeContext,
                LifecycleEffect::SpawnProcess
            ]
        );
    }

    #[test]
    fn return_to_pool_respects_capacity() {
        let room = AgentLifecycleContext {
            pool_capacity: 1,
            pool_size: 0,
            ..Default::default()
        };
        let full = AgentLifecycleContext {
            pool_capacity: 1,
            pool_size: 1,
            ..Default::default()
        };

        assert_eq!(
            resolve(S::Completed, E::ReturnToPool, &room).unwrap(),
            (S::Pooled, vec![LifecycleEffect::ReturnToPool])
        );
        assert_eq!(
            resolve(S::Completed, E::ReturnToPool, &full).unwrap(),
            (S::Destroying, vec![LifecycleEffect::ScheduleDestroy])
        );
    }

    #[test]
    fn process_terminated_while_waiting_for_answer_writes_question_context() {
        let (next, effects) = resolve(S::WaitingForAnswer, E::ProcessTerminated, &ctx()).unwrap();
        assert_eq!(next, S::Suspended);
        assert_eq!(
            effects,
            vec![LifecycleEffect::WriteResumeContext {
                reason: SuspensionReason::UserQuestion
            }]
        );
    }

    #[test]
    fn process_terminated_while_working_writes_shutdown_context() {
        let (next, effects) = resolve(S::Working, E::ProcessTerminated, &ctx()).unwrap();
        assert_eq!(next, S::Suspended);
        assert_eq!(
            effects,
            vec![LifecycleEffect::WriteResumeContext {
                reason: SuspensionReason::AppShutdown
            }]
        );
    }

    #[test]
    fn resume_with_pending_question_returns_to_waiting() {
        let c = AgentLifecycleContext {
            pending_interaction: Some(InteractionKind::Question),
            ..Default::default()
        };
        let (next, effects) = resolve(S::Suspended, E::Resume, &c).unwrap();
        assert_eq!(next, S::WaitingForAnswer);
        assert_eq!(effects, vec![LifecycleEffect::DeleteResumeContext]);

        // Nothing but the answer (or cancellation) moves it on
        assert!(resolve(S::WaitingForAnswer, E::ToolInvoked, &c).is_err());
        assert!(resolve(S::WaitingForAnswer, E::TaskCompleted, &c).is_err());
    }

    #[test]
    fn resume_without_interaction_respawns() {
        let (next, effects) = resolve(S::Suspended, E::Resume, &ctx()).unwrap();
        assert_eq!(next, S::Working);
        assert!(effects.contains(&LifecycleEffect::SpawnProcess));
        assert!(effects.contains(&LifecycleEffect::DeleteResumeContext));
    }

    #[test]
    fn answer_respawns_only_when_detached() {
        let detached = AgentLifecycleContext::default();
        assert_eq!(
            resolve(S::WaitingForAnswer, E::AnswerReceived, &detached).unwrap(),
            (S::Working, vec![LifecycleEffect::SpawnProcess])
        );
        assert_eq!(
            resolve(S::WaitingForAnswer, E::AnswerReceived, &ctx()).unwrap(),
            (S::Working, vec![])
        );
    }

    #[test]
    fn cancel_terminates_attached_process() {
        assert_eq!(
            resolve(S::Thinking, E::Cancel, &ctx()).unwrap(),
            (S::Idle, vec![LifecycleEffect::TerminateProcess])
        );
    }

    #[test]
    fn timeout_only_applies_to_running_agents() {
        assert!(resolve(S::Working, E::Timeout, &ctx()).is_ok());
        assert!(resolve(S::WaitingForAnswer, E::Timeout, &ctx()).is_err());
        assert!(resolve(S::Idle, E::Timeout, &ctx()).is_err());
    }

    #[test]
    fn cleanup_never_touches_active_agents() {
        for state in S::ALL.into_iter().filter(S::is_active) {
            for event in [E::CleanupTriggered, E::PoolEviction, E::IdleTimeout, E::DisbandScheduled] {
                assert!(
                    resolve(state, event, &ctx()).is_err(),
                    "{state} accepted {event}"
                );
            }
        }
    }

    // ==================== Machine Tests ====================

    #[tokio::test]
    async fn create_registers_initializing_agent() {
        let machine = AgentLifecycleStateMachine::new();
        let id = AgentId::new();

        machine.create(id).await.unwrap();

        assert_eq!(machine.state(id).await, Some(S::Initializing));
        assert!(machine.create(id).await.is_err());
    }

    #[tokio::test]
    async fn unknown_agent_is_reported() {
        let machine = AgentLifecycleStateMachine::new();
        let id = AgentId::new();

        let err = machine.transition(id, E::AssignTask, &ctx()).await.unwrap_err();
        assert!(matches!(err, TransitionError::AgentNotFound(a) if a == id));
    }

    #[tokio::test]
    async fn full_happy_path() {
        let machine = AgentLifecycleStateMachine::new();
        let id = AgentId::new();
        machine.create(id).await.unwrap();

        for (event, expected) in [
            (E::ResourcesLoaded, S::Idle),
            (E::AssignTask, S::Working),
            (E::AiReasoning, S::Thinking),
            (E::ToolInvoked, S::Working),
            (E::TaskCompleted, S::Completed),
            (E::ReturnToPool, S::Pooled),
            (E::PoolEviction, S::Destroying),
            (E::AnimationComplete, S::Destroyed),
        ] {
            let outcome = machine.transition(id, event, &ctx()).await.unwrap();
            assert_eq!(outcome.to, expected, "after {event}");
        }

        let err = machine.transition(id, E::Resume, &ctx()).await.unwrap_err();
        assert!(matches!(err, TransitionError::TerminalStateViolation { .. }));
        assert_eq!(machine.state(id).await, Some(S::Destroyed));
    }

    #[tokio::test]
    async fn rejected_event_leaves_state_unchanged() {
        let machine = AgentLifecycleStateMachine::new();
        let id = AgentId::new();
        machine.restore(id, S::Idle).await;

        let err = machine.transition(id, E::TaskCompleted, &ctx()).await.unwrap_err();

        assert!(matches!(
            err,
            TransitionError::InvalidTransition {
                state: S::Idle,
                event: E::TaskCompleted,
                ..
            }
        ));
        assert_eq!(machine.state(id).await, Some(S::Idle));
    }

    #[tokio::test]
    async fn concurrent_assignments_claim_agent_once() {
        let machine = Arc::new(AgentLifecycleStateMachine::new());
        let id = AgentId::new();
        machine.restore(id, S::Pooled).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = Arc::clone(&machine);
            handles.push(tokio::spawn(async move {
                m.transition(id, E::AssignNewTask, &AgentLifecycleContext::default())
                    .await
                    .is_ok()
            }));
        }

        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn transitions_are_published() {
        let bus = Arc::new(MemoryEventBus::new(16));
        let machine = AgentLifecycleStateMachine::new().with_event_bus(bus.clone());
        let id = AgentId::new();
        machine.create(id).await.unwrap();
        machine
            .transition(id, E::ResourcesLoaded, &ctx())
            .await
            .unwrap();

        let events = bus.get_agent_events(id).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1].1,
            ConductorEvent::AgentStateChanged { to: S::Idle, .. }
        ));
    }

    #[tokio::test]
    async fn purge_removes_only_destroyed() {
        let machine = AgentLifecycleStateMachine::new();
        let gone = AgentId::new();
        let alive = AgentId::new();
        machine.restore(gone, S::Destroyed).await;
        machine.restore(alive, S::Idle).await;

        assert_eq!(machine.purge_destroyed().await, 1);
        assert!(machine.state(gone).await.is_none());
        assert_eq!(machine.state(alive).await, Some(S::Idle));
    }
}
