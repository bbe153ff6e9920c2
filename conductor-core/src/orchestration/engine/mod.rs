//! Orchestration engine
//!
//! [`OrchestrationEngine`] turns one prompt into a run: a decomposition
//! request, waves of sub-agents working the resulting sub-tasks, and a final
//! synthesis. Runs are driven by background tasks; callers observe them through
//! [`OrchestrationEngine::state`], [`OrchestrationEngine::wait`] or the event
//! bus.
//!
//! Everything durable goes through the injected store, so a run interrupted by
//! [`OrchestrationEngine::shutdown`] continues after
//! [`OrchestrationEngine::restore`] in a new process.

mod scheduler;
mod shared;
mod worker;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use self::shared::{CANCEL_MESSAGE, EngineCore, Parked, Run, StopReason};
use self::worker::Continuation;
use super::waves::compute_waves;
use super::{OrchestratedSubTask, OrchestrationId, OrchestrationPhase, OrchestrationState, SubTaskStatus};
use crate::agent::{AgentId, AgentPool, AgentTask};
use crate::config::ConductorConfig;
use crate::error::{FailureKind, OrchestrationError, TaskFailure, TransitionError};
use crate::events::{ConductorEvent, EventBus};
use crate::lifecycle::{
    AgentLifecycleState, AgentLifecycleStateMachine, LifecycleEffect, LifecycleEvent,
    TransitionOutcome,
};
use crate::process::CliProcessManager;
use crate::queue::{QueueItemStatus, SubAgentTaskQueue, SubAgentTaskQueueItem};
use crate::resume::{InteractionResponse, PendingInteraction, SuspensionManager};
use crate::store::{AgentRecord, KeyValueStore, PersistedSnapshot, SnapshotSource, SnapshotStore};

/// What [`OrchestrationEngine::restore`] brought back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub agents: usize,
    /// Unfinished runs whose drivers were restarted
    pub orchestrations: usize,
    /// Agents waiting for [`OrchestrationEngine::resume_agent`]
    pub suspended: Vec<AgentId>,
    /// Agents that were mid-task with nothing to resume from, now in `error`
    pub orphaned: Vec<AgentId>,
}

/// Top-level controller for orchestration runs
pub struct OrchestrationEngine {
    core: Arc<EngineCore>,
}

impl OrchestrationEngine {
    pub fn new(
        config: ConductorConfig,
        processes: Arc<dyn CliProcessManager>,
        store: Arc<dyn KeyValueStore>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        let process_slots = Arc::new(Semaphore::new(
            config.cleanup.max_concurrent_processes.max(1),
        ));
        let pool = AgentPool::new(config.cleanup.max_concurrent_agents.max(1));
        let lifecycle = AgentLifecycleStateMachine::new().with_event_bus(Arc::clone(&events));

        Self {
            core: Arc::new(EngineCore {
                suspensions: SuspensionManager::new(Arc::clone(&store)),
                snapshots: SnapshotStore::new(Arc::clone(&store)),
                config,
                processes,
                store,
                events,
                lifecycle,
                pool,
                process_slots,
                capacity: Notify::new(),
                runs: RwLock::new(HashMap::new()),
                workers: Mutex::new(HashMap::new()),
                parked: Mutex::new(HashMap::new()),
                tasks: Mutex::new(JoinSet::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.core.config
    }

    pub fn lifecycle(&self) -> &AgentLifecycleStateMachine {
        &self.core.lifecycle
    }

    pub fn pool(&self) -> &AgentPool {
        &self.core.pool
    }

    pub fn processes(&self) -> &Arc<dyn CliProcessManager> {
        &self.core.processes
    }

    pub fn events(&self) -> &Arc<dyn EventBus> {
        &self.core.events
    }

    /// Submit a prompt; the run proceeds in the background
    #[instrument(skip(self, prompt), fields(commander_id = %commander_id))]
    pub async fn start(
        &self,
        prompt: impl Into<String>,
        commander_id: AgentId,
    ) -> Result<OrchestrationId, OrchestrationError> {
        let state = OrchestrationState::new(commander_id, prompt);
        let id = state.id;
        if self.core.shutdown.is_cancelled() {
            return Err(OrchestrationError::Cancelled(id));
        }

        let queue = SubAgentTaskQueue::new(id).with_store(Arc::clone(&self.core.store));
        let run = Arc::new(Run::new(state, queue));
        self.core.runs.write().await.insert(id, Arc::clone(&run));

        info!(orchestration_id = %id, "Orchestration started");
        self.core
            .publish_phase(id, OrchestrationPhase::Decomposing)
            .await;
        self.core.spawn_driver(run).await;
        Ok(id)
    }

    /// Wait until the run finishes (or the engine shuts down) and return its state
    pub async fn wait(&self, id: OrchestrationId) -> Result<OrchestrationState, OrchestrationError> {
        let run = self
            .core
            .run(id)
            .await
            .ok_or(OrchestrationError::NotFound(id))?;
        let mut finished = run.finished.subscribe();
        tokio::select! {
            _ = async { finished.wait_for(|done| *done).await.is_ok() } => {}
            _ = self.core.shutdown.cancelled() => {}
        }
        Ok(run.state.lock().await.clone())
    }

    /// Run a prompt to completion
    #[instrument(name = "orchestration::run", skip(self, prompt), fields(commander_id = %commander_id))]
    pub async fn run(
        &self,
        prompt: impl Into<String>,
        commander_id: AgentId,
    ) -> Result<OrchestrationState, OrchestrationError> {
        let id = self.start(prompt, commander_id).await?;
        self.wait(id).await
    }

    pub async fn state(&self, id: OrchestrationId) -> Option<OrchestrationState> {
        let run = self.core.run(id).await?;
        let state = run.state.lock().await.clone();
        Some(state)
    }

    /// Every known run, oldest first
    pub async fn states(&self) -> Vec<OrchestrationState> {
        let runs: Vec<Arc<Run>> = self.core.runs.read().await.values().cloned().collect();
        let mut states = Vec::with_capacity(runs.len());
        for run in runs {
            states.push(run.state.lock().await.clone());
        }
        states.sort_by_key(|s| s.id);
        states
    }

    /// Agents blocked on the user, with what they asked
    pub async fn pending_interactions(&self) -> Vec<(AgentId, PendingInteraction)> {
        let mut pending: Vec<_> = self
            .core
            .parked
            .lock()
            .await
            .iter()
            .map(|(id, p)| (*id, p.interaction.clone()))
            .collect();
        pending.sort_by_key(|(id, _)| *id);
        pending
    }

    /// Answer a parked agent's question, plan or permission request
    ///
    /// Plain text approves. Pass [`InteractionResponse::reject`] to decline a
    /// plan or deny a permission; the agent then rethinks or works without it.
    /// Either way the agent's CLI session is continued with the response
    /// message as the prompt. Waits for a free process slot.
    #[instrument(skip(self, response), fields(agent_id = %agent_id))]
    pub async fn respond(
        &self,
        agent_id: AgentId,
        response: impl Into<InteractionResponse>,
    ) -> Result<(), OrchestrationError> {
        let response = response.into();
        let Some(parked) = self.core.parked.lock().await.remove(&agent_id) else {
            return Err(OrchestrationError::NoPendingInteraction(agent_id));
        };
        let Some(run) = self.core.run(parked.run).await else {
            return Err(OrchestrationError::NotFound(parked.run));
        };

        let event = response.event(parked.interaction.kind);
        // The process was stopped when the agent parked, so this yields a spawn
        let ctx = self.core.context(agent_id, false, None).await;
        let outcome = match self.core.transition(agent_id, event, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.core.parked.lock().await.insert(agent_id, parked);
                return Err(e.into());
            }
        };
        self.core.run_effects(&outcome, None).await;
        info!(event = %event, to = %outcome.to, "Interaction answered");

        run.queue.mark_resumed(parked.index).await?;
        self.core.refresh(&run).await;
        self.core
            .continue_subtask(
                &run,
                parked.index,
                agent_id,
                Continuation::Answer(response.message),
            )
            .await
    }

    /// Cancel a whole run
    ///
    /// Running sub-tasks are stopped, waiting ones fail with
    /// [`FailureKind::Cancelled`] and nothing is retried. The run ends in
    /// `failed` with the results gathered so far.
    #[instrument(skip(self), fields(orchestration_id = %id))]
    pub async fn cancel(&self, id: OrchestrationId) -> Result<(), OrchestrationError> {
        let run = self
            .core
            .run(id)
            .await
            .ok_or(OrchestrationError::NotFound(id))?;
        if run.state.lock().await.is_finished() {
            return Ok(());
        }

        run.cancel.cancel();
        let cancelled = run.queue.cancel_pending(CANCEL_MESSAGE).await;
        info!(?cancelled, "Cancelling run");

        for worker in self.core.workers.lock().await.values() {
            if worker.run == id {
                worker.stop.send_replace(Some(StopReason::Cancelled));
            }
        }

        let parked: Vec<AgentId> = {
            let mut parked = self.core.parked.lock().await;
            let ids: Vec<AgentId> = parked
                .iter()
                .filter(|(_, p)| p.run == id)
                .map(|(agent_id, _)| *agent_id)
                .collect();
            for agent_id in &ids {
                parked.remove(agent_id);
            }
            ids
        };
        for agent_id in parked {
            self.core.apply(agent_id, LifecycleEvent::Cancel, false).await;
            self.core.return_agent(agent_id).await;
        }

        // Restored agents that were never resumed still hold a resume context
        for agent_id in self
            .core
            .lifecycle
            .agents_where(|s| *s == AgentLifecycleState::Suspended)
            .await
        {
            let belongs = self
                .core
                .pool
                .task(agent_id)
                .await
                .is_some_and(|t| t.orchestration_id == Some(id));
            if belongs {
                self.core.apply(agent_id, LifecycleEvent::Cancel, false).await;
                self.core.return_agent(agent_id).await;
            }
        }

        self.core.refresh(&run).await;
        run.wake.notify_one();
        Ok(())
    }

    /// Cancel one running or parked sub-task; it is never retried
    #[instrument(skip(self), fields(agent_id = %agent_id))]
    pub async fn cancel_agent(&self, agent_id: AgentId) -> Result<(), OrchestrationError> {
        if let Some(worker) = self.core.workers.lock().await.get(&agent_id) {
            worker.stop.send_replace(Some(StopReason::Cancelled));
            return Ok(());
        }

        let Some(parked) = self.core.parked.lock().await.remove(&agent_id) else {
            return Err(TransitionError::AgentNotFound(agent_id).into());
        };
        let run = self
            .core
            .run(parked.run)
            .await
            .ok_or(OrchestrationError::NotFound(parked.run))?;
        self.core.apply(agent_id, LifecycleEvent::Cancel, false).await;
        let failure = TaskFailure::new(FailureKind::Cancelled, CANCEL_MESSAGE).on_agent(agent_id);
        self.core.record_failure(&run, parked.index, failure).await;
        self.core.return_agent(agent_id).await;
        self.core.refresh(&run).await;
        run.wake.notify_one();
        Ok(())
    }

    /// Apply a cleanup event to an agent that is not working for a run
    ///
    /// Agents handed out by the pool are skipped; their sub-task owns them.
    pub(crate) async fn reclaim(
        &self,
        agent_id: AgentId,
        event: LifecycleEvent,
    ) -> Option<TransitionOutcome> {
        if self.core.pool.is_busy(agent_id).await {
            return None;
        }
        let attached = self.core.processes.is_running(agent_id).await;
        self.core.apply(agent_id, event, attached).await
    }

    /// Forget finished runs older than their retention
    ///
    /// Completed runs are kept for `completed_team_cleanup` and failed ones
    /// for `failed_team_cleanup`, counted from when this engine saw them end.
    /// Pruned runs no longer appear in [`OrchestrationEngine::states`] or in
    /// snapshots.
    pub async fn prune_finished(&self) -> Vec<OrchestrationId> {
        let policy = &self.core.config.cleanup;
        let runs: Vec<Arc<Run>> = self.core.runs.read().await.values().cloned().collect();
        let mut expired = Vec::new();
        for run in runs {
            let Some(finished_at) = run.finished_at.get() else {
                continue;
            };
            let retention = match run.state.lock().await.phase {
                OrchestrationPhase::Completed => policy.completed_team_cleanup,
                _ => policy.failed_team_cleanup,
            };
            if finished_at.elapsed() >= retention {
                expired.push(run.id);
            }
        }

        if !expired.is_empty() {
            let mut runs = self.core.runs.write().await;
            for id in &expired {
                runs.remove(id);
            }
            info!(pruned = expired.len(), "Finished runs pruned");
        }
        expired.sort();
        expired
    }

    /// Stop all work and persist everything needed to continue later
    ///
    /// Running sub-tasks are suspended with an `app_shutdown` resume context,
    /// parked agents keep their pending interaction, and idle agents move to
    /// `suspended_idle`. The returned snapshot has also been saved to the store.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<PersistedSnapshot, OrchestrationError> {
        info!("Shutting down orchestration engine");
        self.core.shutdown.cancel();
        for worker in self.core.workers.lock().await.values() {
            worker.stop.send_replace(Some(StopReason::Shutdown));
        }

        // Tasks may spawn more tasks while they wind down
        loop {
            let mut tasks = std::mem::take(&mut *self.core.tasks.lock().await);
            if tasks.is_empty() {
                break;
            }
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!(error = %e, "Engine task panicked during shutdown");
                }
            }
        }

        let parked: Vec<(AgentId, Parked)> = self.core.parked.lock().await.drain().collect();
        for (agent_id, parked) in parked {
            let ctx = self
                .core
                .context(agent_id, false, Some(parked.interaction.kind))
                .await;
            if let Ok(outcome) = self
                .core
                .transition(agent_id, LifecycleEvent::ProcessTerminated, ctx)
                .await
            {
                self.core
                    .run_effects(&outcome, Some(parked.interaction))
                    .await;
            }
        }

        for agent_id in self
            .core
            .lifecycle
            .agents_where(|s| {
                matches!(
                    s,
                    AgentLifecycleState::Idle
                        | AgentLifecycleState::Completed
                        | AgentLifecycleState::Error
                )
            })
            .await
        {
            self.core
                .apply(agent_id, LifecycleEvent::ProcessTerminated, false)
                .await;
        }

        self.core.processes.terminate_all().await;
        let snapshot = self.snapshot().await;
        self.core.snapshots.save(&snapshot).await?;
        info!(
            agents = snapshot.agents.len(),
            resume_contexts = snapshot.resume_contexts.len(),
            "Engine state saved"
        );
        Ok(snapshot)
    }

    /// Latest snapshot saved by a previous [`OrchestrationEngine::shutdown`]
    pub async fn saved_snapshot(&self) -> Result<Option<PersistedSnapshot>, OrchestrationError> {
        Ok(self.core.snapshots.load().await?)
    }

    /// Current durable state
    pub async fn snapshot(&self) -> PersistedSnapshot {
        let mut snapshot = PersistedSnapshot::new();

        for (agent, task) in self.core.pool.agents().await {
            let Some(state) = self.core.lifecycle.state(agent.id).await else {
                continue;
            };
            if matches!(
                state,
                AgentLifecycleState::Destroying | AgentLifecycleState::Destroyed
            ) {
                continue;
            }
            snapshot.agents.push(AgentRecord { agent, state, task });
        }
        snapshot.agents.sort_by_key(|r| r.agent.id);

        snapshot.orchestrations = self.states().await;

        match self.core.suspensions.list().await {
            Ok(contexts) => snapshot.resume_contexts = contexts,
            Err(e) => warn!(error = %e, "Could not list resume contexts for snapshot"),
        }
        snapshot
    }

    /// Rebuild agents and unfinished runs from a snapshot
    ///
    /// Unfinished runs restart their drivers right away; suspended agents wait
    /// for [`OrchestrationEngine::resume_agent`].
    #[instrument(skip_all, fields(agents = snapshot.agents.len(), orchestrations = snapshot.orchestrations.len()))]
    pub async fn restore(
        &self,
        snapshot: PersistedSnapshot,
    ) -> Result<RestoreReport, OrchestrationError> {
        if !snapshot.is_current_version() {
            warn!(saved = %snapshot.app_version, "Restoring a snapshot from a different version");
        }
        let mut report = RestoreReport::default();

        for ctx in &snapshot.resume_contexts {
            if self.core.suspensions.load(ctx.agent_id).await?.is_none() {
                self.core.suspensions.store(ctx).await?;
            }
        }
        let contexts: HashSet<AgentId> = self
            .core
            .suspensions
            .list()
            .await?
            .into_iter()
            .map(|c| c.agent_id)
            .collect();

        for AgentRecord { agent, state, task } in snapshot.agents {
            if matches!(
                state,
                AgentLifecycleState::Destroying | AgentLifecycleState::Destroyed
            ) {
                continue;
            }
            let agent_id = agent.id;
            let has_context = contexts.contains(&agent_id);
            let restored = match state {
                s if s.is_active() || s == AgentLifecycleState::Initializing => {
                    AgentLifecycleState::Error
                }
                AgentLifecycleState::Suspended if !has_context => AgentLifecycleState::Error,
                AgentLifecycleState::SuspendedIdle if !has_context => AgentLifecycleState::Idle,
                s => s,
            };
            if restored == AgentLifecycleState::Error && state != AgentLifecycleState::Error {
                warn!(agent_id = %agent_id, was = %state, "Agent lost its process without a resume context");
                report.orphaned.push(agent_id);
            }

            self.core.pool.insert(agent, task).await;
            self.core.lifecycle.restore(agent_id, restored).await;
            if restored == AgentLifecycleState::Suspended {
                report.suspended.push(agent_id);
            } else if restored.is_cleanup_candidate() {
                self.core.pool.release(agent_id).await;
            }
            report.agents += 1;
        }

        for state in snapshot.orchestrations {
            let id = state.id;
            if self.core.run(id).await.is_some() {
                continue;
            }
            if state.is_finished() {
                let run = Run::new(state, SubAgentTaskQueue::new(id));
                run.mark_finished();
                self.core.runs.write().await.insert(id, Arc::new(run));
                continue;
            }

            let queue = match SubAgentTaskQueue::load(id, Arc::clone(&self.core.store)).await? {
                Some(queue) => queue,
                None => {
                    let queue = SubAgentTaskQueue::new(id).with_store(Arc::clone(&self.core.store));
                    queue
                        .enqueue(
                            state
                                .subtasks
                                .iter()
                                .map(|t| rebuild_item(t, &report.suspended))
                                .collect(),
                        )
                        .await?;
                    queue
                }
            };
            let recovered = queue.recover().await;
            // A suspended item whose agent did not come back starts over
            for item in queue.items().await {
                if item.status == QueueItemStatus::Suspended
                    && !item
                        .agent_id
                        .is_some_and(|a| report.suspended.contains(&a))
                {
                    queue.requeue(item.index).await?;
                }
            }

            let dependencies: Vec<Vec<usize>> =
                state.subtasks.iter().map(|t| t.dependencies.clone()).collect();
            let decomposed = state.phase != OrchestrationPhase::Decomposing;
            let run = Arc::new(Run::new(state, queue));
            if decomposed {
                let _ = run.waves.set(compute_waves(&dependencies)?);
            }
            self.core.runs.write().await.insert(id, Arc::clone(&run));
            self.core.refresh(&run).await;
            info!(orchestration_id = %id, ?recovered, "Run restored");
            self.core.spawn_driver(run).await;
            report.orchestrations += 1;
        }

        info!(
            agents = report.agents,
            orchestrations = report.orchestrations,
            suspended = report.suspended.len(),
            orphaned = report.orphaned.len(),
            "Restore complete"
        );
        Ok(report)
    }

    /// Continue a suspended agent from its resume context
    ///
    /// An agent that was waiting on the user goes back to waiting and the
    /// pending interaction is returned, unchanged, for the host to show again.
    /// Otherwise its sub-task is continued and the resume context is deleted
    /// once a process slot is held; if the engine shuts down first the agent
    /// is suspended again with its context intact. An agent whose run is gone
    /// is cancelled and returned to the pool.
    #[instrument(name = "agent::resume", skip(self), fields(agent_id = %agent_id))]
    pub async fn resume_agent(
        &self,
        agent_id: AgentId,
    ) -> Result<Option<PendingInteraction>, OrchestrationError> {
        let (agent, task, pending) = self.core.suspensions.resume(agent_id).await?;

        let state = match self.core.lifecycle.state(agent_id).await {
            Some(state) => state,
            None => {
                // Context without a snapshot entry
                let state = if task.is_some() {
                    AgentLifecycleState::Suspended
                } else {
                    AgentLifecycleState::SuspendedIdle
                };
                self.core.pool.insert(agent, task.clone()).await;
                self.core.lifecycle.restore(agent_id, state).await;
                state
            }
        };

        if state == AgentLifecycleState::SuspendedIdle {
            self.core.apply(agent_id, LifecycleEvent::Resume, false).await;
            self.core.pool.release(agent_id).await;
            return Ok(None);
        }

        let Some((run, index)) = self.suspended_item(agent_id, task.as_ref()).await else {
            warn!("Suspended task no longer belongs to a live run");
            self.core.apply(agent_id, LifecycleEvent::Cancel, false).await;
            self.core.return_agent(agent_id).await;
            return Ok(None);
        };

        let ctx = self
            .core
            .context(agent_id, false, pending.as_ref().map(|p| p.kind))
            .await;
        let outcome = self
            .core
            .transition(agent_id, LifecycleEvent::Resume, ctx)
            .await?;
        if pending.is_some() {
            self.core.run_effects(&outcome, None).await;
        } else {
            // Without a question to wait on, the context stays until work restarts
            let kept = TransitionOutcome {
                effects: outcome
                    .effects
                    .iter()
                    .filter(|e| **e != LifecycleEffect::DeleteResumeContext)
                    .cloned()
                    .collect(),
                ..outcome.clone()
            };
            self.core.run_effects(&kept, None).await;
        }
        info!(orchestration_id = %run.id, index, to = %outcome.to, "Agent resumed");

        if let Some(pending) = pending {
            self.core.parked.lock().await.insert(
                agent_id,
                Parked {
                    run: run.id,
                    index,
                    interaction: pending.clone(),
                },
            );
            self.core
                .events
                .publish(ConductorEvent::InteractionPending {
                    agent_id,
                    orchestration_id: Some(run.id),
                    interaction: pending.clone(),
                })
                .await;
            return Ok(Some(pending));
        }

        run.queue.mark_resumed(index).await?;
        self.core.refresh(&run).await;
        if let Err(e) = self
            .core
            .continue_subtask(&run, index, agent_id, Continuation::Resume)
            .await
        {
            warn!(error = %e, "Resumed agent could not continue; suspending it again");
            self.core
                .apply(agent_id, LifecycleEvent::ProcessTerminated, false)
                .await;
            run.queue.mark_suspended(index).await?;
            self.core.refresh(&run).await;
            return Err(e);
        }
        Ok(None)
    }

    /// The live run and queue index a suspended agent's task belongs to
    async fn suspended_item(
        &self,
        agent_id: AgentId,
        task: Option<&AgentTask>,
    ) -> Option<(Arc<Run>, usize)> {
        let task = task?;
        let run = self.core.run(task.orchestration_id?).await?;
        let index = task.orchestration_task_index?;
        if run.state.lock().await.is_finished() {
            return None;
        }
        let item = run.queue.get(index).await?;
        (item.status == QueueItemStatus::Suspended && item.agent_id == Some(agent_id))
            .then_some((run, index))
    }
}

#[async_trait]
impl SnapshotSource for OrchestrationEngine {
    async fn snapshot(&self) -> PersistedSnapshot {
        OrchestrationEngine::snapshot(self).await
    }
}

/// Queue record for a sub-task when the persisted queue is missing
fn rebuild_item(task: &OrchestratedSubTask, suspended: &[AgentId]) -> SubAgentTaskQueueItem {
    let mut item = task.to_queue_item();
    item.agent_id = task.agent_id;
    item.task_id = task.task_id;
    item.result = task.result.clone();
    item.error = task.error.clone();
    item.started_at = task.started_at;
    item.completed_at = task.completed_at;
    item.status = match task.status {
        SubTaskStatus::Completed => QueueItemStatus::Completed,
        SubTaskStatus::Failed => QueueItemStatus::Failed,
        SubTaskStatus::InProgress
            if task.agent_id.is_some_and(|a| suspended.contains(&a)) =>
        {
            QueueItemStatus::Suspended
        }
        SubTaskStatus::InProgress => QueueItemStatus::InProgress,
        SubTaskStatus::Pending | SubTaskStatus::Waiting => QueueItemStatus::Pending,
    };
    item
}
