//! Run driver: decomposition, wave scheduling and synthesis

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::shared::{EngineCore, Run};
use super::worker::Job;
use crate::agent::{Acquired, AgentTask};
use crate::error::{DecompositionError, OrchestrationError};
use crate::events::ConductorEvent;
use crate::lifecycle::LifecycleEvent;
use crate::orchestration::decompose::{decomposition_prompt, parse_decomposition};
use crate::orchestration::synthesis::{aggregate, synthesis_prompt};
use crate::orchestration::waves::compute_waves;
use crate::orchestration::{OrchestratedSubTask, OrchestrationId, OrchestrationPhase};
use crate::process::SpawnRequest;
use crate::queue::{QueueItemStatus, SubAgentTaskQueueItem};

/// How a run's driver stopped
#[derive(Debug)]
enum RunEnd {
    /// Every sub-task is terminal
    Drained,
    Cancelled,
    /// The engine shut down; the run stays resumable
    Interrupted,
    Failed(OrchestrationError),
}

enum Dispatch {
    Started,
    NoCapacity,
    /// The item or agent changed underneath us; try the next one
    Skipped,
}

impl EngineCore {
    /// Drive `run` to completion in the background
    pub(super) async fn spawn_driver(self: &Arc<Self>, run: Arc<Run>) {
        let core = Arc::clone(self);
        self.spawn_task(async move { core.drive(run).await }).await;
    }

    async fn drive(self: Arc<Self>, run: Arc<Run>) {
        let end = self.drive_inner(&run).await;
        self.finish_run(&run, end).await;
    }

    async fn drive_inner(self: &Arc<Self>, run: &Arc<Run>) -> RunEnd {
        let decomposing = run.state.lock().await.phase == OrchestrationPhase::Decomposing;
        if decomposing && let Err(e) = self.decompose(run).await {
            if self.shutdown.is_cancelled() {
                return RunEnd::Interrupted;
            }
            if run.cancel.is_cancelled() {
                return RunEnd::Cancelled;
            }
            return RunEnd::Failed(e);
        }
        self.schedule(run).await
    }

    async fn decompose(&self, run: &Run) -> Result<(), OrchestrationError> {
        let prompt = run.state.lock().await.original_prompt.clone();
        let request = SpawnRequest::new(
            run.planner,
            decomposition_prompt(&prompt),
            &self.config.process.decomposition_model,
        )
        .with_working_dir(self.config.process.working_dir.clone());

        let text = self
            .complete(request, &run.cancel)
            .await
            .map_err(DecompositionError::ProcessFailed)?;
        let subtasks = parse_decomposition(&text)?;
        let dependencies: Vec<Vec<usize>> =
            subtasks.iter().map(|t| t.dependencies.clone()).collect();
        let waves = compute_waves(&dependencies)?;

        run.queue
            .enqueue(subtasks.iter().map(OrchestratedSubTask::to_queue_item).collect())
            .await?;
        let wave_count = waves.iter().max().map_or(0, |w| w + 1);
        let _ = run.waves.set(waves);
        {
            let mut state = run.state.lock().await;
            state.subtasks = subtasks;
            state.current_wave = 0;
            state.phase = OrchestrationPhase::Executing;
        }

        info!(
            orchestration_id = %run.id,
            subtasks = dependencies.len(),
            waves = wave_count,
            "Decomposition complete"
        );
        self.publish_phase(run.id, OrchestrationPhase::Executing)
            .await;
        info!(orchestration_id = %run.id, wave = 0, "Wave started");
        self.events
            .publish(ConductorEvent::WaveStarted {
                orchestration_id: run.id,
                wave: 0,
            })
            .await;
        Ok(())
    }

    /// Dispatch ready work until every sub-task is terminal
    async fn schedule(self: &Arc<Self>, run: &Arc<Run>) -> RunEnd {
        loop {
            // Registered before looking at the queue so a release in between is not lost
            let capacity = self.capacity.notified();
            tokio::pin!(capacity);
            capacity.as_mut().enable();

            if self.shutdown.is_cancelled() {
                return RunEnd::Interrupted;
            }

            if run.cancel.is_cancelled() {
                self.refresh(run).await;
                if run.queue.is_finished().await {
                    return RunEnd::Cancelled;
                }
            } else {
                let blocked = run.queue.fail_blocked().await;
                if !blocked.is_empty() {
                    info!(orchestration_id = %run.id, ?blocked, "Sub-tasks failed on a failed dependency");
                }
                self.refresh(run).await;
                if run.queue.is_finished().await {
                    return RunEnd::Drained;
                }
                self.dispatch_ready(run).await;
            }

            tokio::select! {
                _ = run.wake.notified() => {}
                _ = &mut capacity => {}
                _ = run.cancel.cancelled(), if !run.cancel.is_cancelled() => {}
                _ = self.shutdown.cancelled() => {}
            }
        }
    }

    /// Start every ready sub-task of the current wave that capacity allows
    async fn dispatch_ready(self: &Arc<Self>, run: &Arc<Run>) {
        let ready = run.queue.ready_items().await;
        let items = run.queue.items().await;

        let Some(wave) = items
            .iter()
            .filter(|i| !i.is_terminal())
            .map(|i| run.wave_of(i.index))
            .min()
        else {
            return;
        };
        self.advance_wave(run, wave).await;

        let mut lane_busy = items.iter().any(|i| {
            !i.can_parallel
                && run.wave_of(i.index) == wave
                && (matches!(
                    i.status,
                    QueueItemStatus::InProgress | QueueItemStatus::Suspended
                ) || i.retry_pending)
        });

        for item in ready.iter().filter(|i| run.wave_of(i.index) == wave) {
            if !item.can_parallel && lane_busy {
                continue;
            }
            match self.dispatch(run, item, &items).await {
                Dispatch::Started => {
                    if !item.can_parallel {
                        lane_busy = true;
                    }
                }
                Dispatch::NoCapacity => break,
                Dispatch::Skipped => {}
            }
        }
    }

    async fn advance_wave(&self, run: &Run, wave: usize) {
        let advanced = {
            let mut state = run.state.lock().await;
            let advanced = state.current_wave < wave;
            if advanced {
                state.current_wave = wave;
            }
            advanced
        };
        if advanced {
            info!(orchestration_id = %run.id, wave, "Wave started");
            self.events
                .publish(ConductorEvent::WaveStarted {
                    orchestration_id: run.id,
                    wave,
                })
                .await;
        }
    }

    /// Bring an agent to `working` on `item` and start its process
    async fn dispatch(
        self: &Arc<Self>,
        run: &Arc<Run>,
        item: &SubAgentTaskQueueItem,
        items: &[SubAgentTaskQueueItem],
    ) -> Dispatch {
        let Ok(permit) = Arc::clone(&self.process_slots).try_acquire_owned() else {
            return Dispatch::NoCapacity;
        };
        let commander = run.state.lock().await.commander_id;
        let Some(Acquired { mut agent, fresh }) = self
            .pool
            .acquire(|| self.new_worker(run.id, commander))
            .await
        else {
            return Dispatch::NoCapacity;
        };

        if fresh {
            if let Err(e) = self.lifecycle.create(agent.id).await {
                warn!(agent_id = %agent.id, error = %e, "Could not register agent");
                self.pool.remove(agent.id).await;
                return Dispatch::Skipped;
            }
            if self
                .apply(agent.id, LifecycleEvent::ResourcesLoaded, false)
                .await
                .is_none()
            {
                self.pool.remove(agent.id).await;
                return Dispatch::Skipped;
            }
        } else {
            let team = run.id.to_string();
            agent.commander_id = Some(commander);
            agent.team_id = Some(team.clone());
            agent.session_id = None;
            self.pool
                .update(agent.id, |a| {
                    a.commander_id = Some(commander);
                    a.team_id = Some(team);
                    a.session_id = None;
                })
                .await;
        }

        let task = AgentTask::new(&item.title, &item.prompt).for_subtask(run.id, item.index);
        if let Err(e) = run.queue.claim(item.index, agent.id, task.id).await {
            debug!(orchestration_id = %run.id, index = item.index, error = %e, "Claim lost");
            self.pool.release(agent.id).await;
            return Dispatch::Skipped;
        }
        self.pool.set_task(agent.id, task).await;

        let ctx = self.context(agent.id, false, None).await;
        let Ok(outcome) = self
            .transition(agent.id, LifecycleEvent::AssignTask, ctx)
            .await
        else {
            self.pool.remove(agent.id).await;
            if let Err(e) = run.queue.requeue(item.index).await {
                warn!(orchestration_id = %run.id, index = item.index, error = %e, "Could not requeue sub-task");
            }
            return Dispatch::Skipped;
        };
        self.run_effects(&outcome, None).await;
        self.refresh(run).await;

        info!(
            orchestration_id = %run.id,
            index = item.index,
            agent_id = %agent.id,
            attempt = item.retry_count,
            "Dispatching sub-task"
        );
        self.launch(Job {
            run: Arc::clone(run),
            index: item.index,
            agent,
            prompt: subtask_prompt(item, items),
            resume_session: None,
            permit,
        })
        .await;
        Dispatch::Started
    }

    async fn finish_run(&self, run: &Run, end: RunEnd) {
        self.refresh(run).await;
        let completed = run.state.lock().await.completed_count();
        let (phase, error) = match end {
            RunEnd::Interrupted => {
                info!(orchestration_id = %run.id, "Run interrupted by shutdown");
                return;
            }
            RunEnd::Failed(e) => (OrchestrationPhase::Failed, Some(e)),
            RunEnd::Cancelled => (
                OrchestrationPhase::Failed,
                Some(OrchestrationError::Cancelled(run.id)),
            ),
            RunEnd::Drained if completed == 0 => (
                OrchestrationPhase::Failed,
                Some(OrchestrationError::AllSubtasksFailed(run.id)),
            ),
            RunEnd::Drained => (OrchestrationPhase::Completed, None),
        };

        let result = if phase == OrchestrationPhase::Completed {
            run.state.lock().await.phase = OrchestrationPhase::Synthesizing;
            self.publish_phase(run.id, OrchestrationPhase::Synthesizing)
                .await;
            Some(self.synthesize(run).await)
        } else {
            let state = run.state.lock().await;
            (!state.subtasks.is_empty()).then(|| aggregate(&state))
        };

        {
            let mut state = run.state.lock().await;
            state.phase = phase;
            state.error = error.as_ref().map(ToString::to_string);
            state.synthesis_result = result;
            state.completed_at = Some(Utc::now());
            match &error {
                None => info!(
                    orchestration_id = %run.id,
                    completed = state.completed_count(),
                    failed = state.failed_count(),
                    "Run completed"
                ),
                Some(e) => warn!(orchestration_id = %run.id, error = %e, "Run failed"),
            }
        }
        self.publish_phase(run.id, phase).await;

        if let Err(e) = run.queue.forget().await {
            warn!(orchestration_id = %run.id, error = %e, "Could not delete finished queue");
        }
        run.mark_finished();
    }

    /// Final answer for a drained run
    ///
    /// Model synthesis is optional; any failure falls back to the plain
    /// aggregation.
    async fn synthesize(&self, run: &Run) -> String {
        let (aggregated, prompt) = {
            let state = run.state.lock().await;
            (aggregate(&state), synthesis_prompt(&state))
        };
        if !self.config.orchestration.synthesize_with_model {
            return aggregated;
        }

        let request = SpawnRequest::new(run.planner, prompt, &self.config.process.worker_model)
            .with_working_dir(self.config.process.working_dir.clone());
        match self.complete(request, &run.cancel).await {
            Ok(text) => {
                info!(orchestration_id = %run.id, "Synthesis complete");
                text
            }
            Err(e) => {
                warn!(orchestration_id = %run.id, error = %e, "Model synthesis failed, using aggregated results");
                aggregated
            }
        }
    }

    pub(super) async fn publish_phase(&self, orchestration_id: OrchestrationId, phase: OrchestrationPhase) {
        self.events
            .publish(ConductorEvent::OrchestrationPhaseChanged {
                orchestration_id,
                phase,
            })
            .await;
    }
}

/// The sub-task's prompt plus whatever its dependencies produced
fn subtask_prompt(item: &SubAgentTaskQueueItem, items: &[SubAgentTaskQueueItem]) -> String {
    let mut prompt = item.prompt.clone();
    let inputs: Vec<_> = item
        .dependencies
        .iter()
        .filter_map(|d| items.iter().find(|i| i.index == *d))
        .filter_map(|d| d.result.as_deref().map(|r| (&d.title, r)))
        .collect();
    if !inputs.is_empty() {
        prompt.push_str("\n\nResults of earlier sub-tasks:\n");
        for (title, result) in inputs {
            let _ = write!(prompt, "\n## {title}\n\n{}\n", result.trim());
        }
    }
    prompt
}
