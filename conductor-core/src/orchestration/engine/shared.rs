//! Shared engine state and the helpers every part of the engine uses

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, RwLock, Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::agent::{Agent, AgentId, AgentPool};
use crate::config::ConductorConfig;
use crate::error::TransitionError;
use crate::events::{ConductorEvent, EventBus};
use crate::lifecycle::{
    AgentLifecycleContext, AgentLifecycleState, AgentLifecycleStateMachine, LifecycleEffect,
    LifecycleEvent, TransitionOutcome,
};
use crate::orchestration::{OrchestrationId, OrchestrationState};
use crate::process::{CliProcessManager, ProcessEvent, SpawnRequest};
use crate::queue::SubAgentTaskQueue;
use crate::resume::{InteractionKind, PendingInteraction, SuspensionManager};
use crate::store::{KeyValueStore, SnapshotStore};

/// Error text recorded for user cancellations
pub(super) const CANCEL_MESSAGE: &str = "cancelled by user";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum StopReason {
    Cancelled,
    Shutdown,
}

/// A sub-task run in flight
pub(super) struct Worker {
    pub run: OrchestrationId,
    pub stop: watch::Sender<Option<StopReason>>,
}

/// A sub-task whose agent is blocked on the user
#[derive(Debug, Clone)]
pub(super) struct Parked {
    pub run: OrchestrationId,
    pub index: usize,
    pub interaction: PendingInteraction,
}

/// One orchestration run
///
/// `state` is the run's coordination point; the lock is only ever held for
/// in-memory updates.
pub(super) struct Run {
    pub id: OrchestrationId,
    pub state: Mutex<OrchestrationState>,
    pub queue: SubAgentTaskQueue,
    pub waves: OnceLock<Vec<usize>>,
    /// Agent ID the decomposition and synthesis requests run under
    pub planner: AgentId,
    pub wake: Notify,
    pub cancel: CancellationToken,
    pub finished: watch::Sender<bool>,
    /// When this process saw the run end; drives retention
    pub finished_at: OnceLock<Instant>,
}

impl Run {
    pub fn new(state: OrchestrationState, queue: SubAgentTaskQueue) -> Self {
        Self {
            id: state.id,
            state: Mutex::new(state),
            queue,
            waves: OnceLock::new(),
            planner: AgentId::new(),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            finished: watch::channel(false).0,
            finished_at: OnceLock::new(),
        }
    }

    pub fn mark_finished(&self) {
        let _ = self.finished_at.set(Instant::now());
        self.finished.send_replace(true);
    }

    pub fn wave_of(&self, index: usize) -> usize {
        self.waves
            .get()
            .and_then(|w| w.get(index).copied())
            .unwrap_or(0)
    }
}

/// Everything in flight, shared by the engine handle and its background tasks
pub(super) struct EngineCore {
    pub config: ConductorConfig,
    pub processes: Arc<dyn CliProcessManager>,
    pub store: Arc<dyn KeyValueStore>,
    pub events: Arc<dyn EventBus>,
    pub lifecycle: AgentLifecycleStateMachine,
    pub pool: AgentPool,
    pub suspensions: SuspensionManager,
    pub snapshots: SnapshotStore,
    pub process_slots: Arc<Semaphore>,
    /// Signalled whenever a process slot or agent frees up
    pub capacity: Notify,
    pub runs: RwLock<HashMap<OrchestrationId, Arc<Run>>>,
    pub workers: Mutex<HashMap<AgentId, Worker>>,
    pub parked: Mutex<HashMap<AgentId, Parked>>,
    pub tasks: Mutex<JoinSet<()>>,
    pub shutdown: CancellationToken,
}

impl EngineCore {
    pub async fn run(&self, id: OrchestrationId) -> Option<Arc<Run>> {
        self.runs.read().await.get(&id).cloned()
    }

    pub async fn spawn_task(
        &self,
        task: impl std::future::Future<Output = ()> + Send + 'static,
    ) {
        let mut tasks = self.tasks.lock().await;
        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                error!(error = %e, "Engine task panicked");
            }
        }
        tasks.spawn(task);
    }

    /// Context for a transition of `agent_id`
    pub async fn context(
        &self,
        agent_id: AgentId,
        process_attached: bool,
        pending: Option<InteractionKind>,
    ) -> AgentLifecycleContext {
        let session_id = self.pool.get(agent_id).await.and_then(|a| a.session_id);
        let task_id = self.pool.task(agent_id).await.map(|t| t.id);
        AgentLifecycleContext {
            session_id,
            task_id,
            pool_capacity: self.config.cleanup.max_pooled_agents,
            pool_size: self
                .lifecycle
                .count_where(|s| *s == AgentLifecycleState::Pooled)
                .await,
            idle_duration: self
                .lifecycle
                .time_in_state(agent_id)
                .await
                .unwrap_or_default(),
            pending_interaction: pending,
            process_attached,
        }
    }

    /// Apply an event; rejections are logged and published, never fatal
    pub async fn transition(
        &self,
        agent_id: AgentId,
        event: LifecycleEvent,
        ctx: AgentLifecycleContext,
    ) -> Result<TransitionOutcome, TransitionError> {
        let result = self.lifecycle.transition(agent_id, event, &ctx).await;
        if let Err(ref e) = result {
            warn!(agent_id = %agent_id, event = %event, error = %e, "Transition rejected");
            self.events
                .publish(ConductorEvent::TransitionRejected {
                    agent_id,
                    event,
                    reason: e.to_string(),
                })
                .await;
        }
        result
    }

    /// Transition and run the resulting effects
    pub async fn apply(
        &self,
        agent_id: AgentId,
        event: LifecycleEvent,
        process_attached: bool,
    ) -> Option<TransitionOutcome> {
        let ctx = self.context(agent_id, process_attached, None).await;
        let outcome = self.transition(agent_id, event, ctx).await.ok()?;
        self.run_effects(&outcome, None).await;
        Some(outcome)
    }

    /// Execute a transition's side effects
    ///
    /// `SpawnProcess` is left to the caller, which knows what to run.
    pub async fn run_effects(
        &self,
        outcome: &TransitionOutcome,
        pending: Option<PendingInteraction>,
    ) {
        let agent_id = outcome.agent_id;
        for effect in &outcome.effects {
            match effect {
                LifecycleEffect::SpawnProcess => {}
                LifecycleEffect::TerminateProcess => {
                    if let Err(e) = self.processes.terminate(agent_id).await {
                        debug!(agent_id = %agent_id, error = %e, "Nothing to terminate");
                    }
                }
                LifecycleEffect::WriteResumeContext { reason } => {
                    let Some(agent) = self.pool.get(agent_id).await else {
                        warn!(agent_id = %agent_id, "Cannot suspend unknown agent");
                        continue;
                    };
                    let task = self.pool.task(agent_id).await;
                    match self
                        .suspensions
                        .suspend(&agent, task.as_ref(), *reason, pending.clone())
                        .await
                    {
                        Ok(_) => {
                            self.events
                                .publish(ConductorEvent::AgentSuspended {
                                    agent_id,
                                    reason: *reason,
                                })
                                .await;
                        }
                        Err(e) => {
                            error!(agent_id = %agent_id, error = %e, "Failed to write resume context")
                        }
                    }
                }
                LifecycleEffect::DeleteResumeContext => {
                    if let Err(e) = self.suspensions.discard(agent_id).await {
                        warn!(agent_id = %agent_id, error = %e, "Failed to delete resume context");
                    }
                }
                LifecycleEffect::ReturnToPool => self.pool.release(agent_id).await,
                LifecycleEffect::ScheduleDestroy => {
                    self.pool.remove(agent_id).await;
                    self.parked.lock().await.remove(&agent_id);
                    // Nothing to animate here, so destruction completes at once
                    let ctx = AgentLifecycleContext::default();
                    if let Err(e) = self
                        .lifecycle
                        .transition(agent_id, LifecycleEvent::AnimationComplete, &ctx)
                        .await
                    {
                        warn!(agent_id = %agent_id, error = %e, "Failed to finish destroying agent");
                    }
                    self.capacity.notify_waiters();
                }
            }
        }
    }

    /// Hand a finished agent back to the pool (or destroy it if the pool is full)
    pub async fn return_agent(&self, agent_id: AgentId) {
        if self
            .apply(agent_id, LifecycleEvent::ReturnToPool, false)
            .await
            .is_none()
        {
            self.pool.release(agent_id).await;
        }
        self.capacity.notify_waiters();
    }

    /// Wait for a free process slot; `None` once the engine shuts down
    pub async fn wait_for_slot(&self) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            permit = Arc::clone(&self.process_slots).acquire_owned() => permit.ok(),
        }
    }

    /// Copy queue state into the run's view and publish status changes
    pub async fn refresh(&self, run: &Run) {
        let items = run.queue.items().await;
        let mut changed = Vec::new();
        {
            let mut state = run.state.lock().await;
            for item in &items {
                if let Some(task) = state.subtask_mut(item.index) {
                    let before = task.status;
                    task.sync_from(item);
                    if task.status != before {
                        changed.push((item.index, task.status));
                    }
                }
            }
        }
        for (index, status) in changed {
            self.events
                .publish(ConductorEvent::SubTaskStatusChanged {
                    orchestration_id: run.id,
                    index,
                    status,
                })
                .await;
        }
    }

    /// Run a one-shot request and return its result text
    pub async fn complete(
        &self,
        request: SpawnRequest,
        cancel: &CancellationToken,
    ) -> Result<String, String> {
        let agent_id = request.agent_id;
        let _permit = tokio::select! {
            permit = Arc::clone(&self.process_slots).acquire_owned() => {
                permit.map_err(|e| e.to_string())?
            }
            _ = cancel.cancelled() => return Err(CANCEL_MESSAGE.to_string()),
            _ = self.shutdown.cancelled() => return Err("engine shutting down".to_string()),
        };

        let handle = self
            .processes
            .spawn(request)
            .await
            .map_err(|e| e.to_string())?;
        let hang_timeout = self.config.cleanup.process_hang_timeout();
        let events = ReceiverStream::new(handle.events).timeout(hang_timeout);
        tokio::pin!(events);

        let mut result = None;
        loop {
            let next = tokio::select! {
                next = events.next() => next,
                _ = cancel.cancelled() => {
                    let _ = self.processes.terminate(agent_id).await;
                    return Err(CANCEL_MESSAGE.to_string());
                }
                _ = self.shutdown.cancelled() => {
                    let _ = self.processes.terminate(agent_id).await;
                    return Err("engine shutting down".to_string());
                }
            };
            match next {
                Some(Ok(ProcessEvent::Result(r))) => result = Some(r),
                Some(Ok(ProcessEvent::Exited { .. })) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => {
                    let _ = self.processes.terminate(agent_id).await;
                    return Err(format!("no output for {}s", hang_timeout.as_secs()));
                }
            }
        }

        match result {
            Some(r) if !r.is_error => Ok(r.text),
            Some(r) => Err(r.text),
            None => Err("process exited without a result".to_string()),
        }
    }

    /// A new sub-agent working for `commander_id` on run `run`
    pub fn new_worker(&self, run: OrchestrationId, commander_id: AgentId) -> Agent {
        let mut agent = Agent::new("sub-agent", &self.config.process.worker_model)
            .with_commander(commander_id, run.to_string());
        agent.working_dir = self.config.process.working_dir.clone();
        agent
    }
}
