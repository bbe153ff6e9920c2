//! One sub-task run: spawn the CLI, follow its events, settle the outcome

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, watch};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::shared::{CANCEL_MESSAGE, EngineCore, Parked, Run, StopReason, Worker};
use crate::agent::{Agent, AgentId, AgentTask};
use crate::error::{FailureKind, OrchestrationError, QueueError, TaskFailure, TransitionError};
use crate::events::ConductorEvent;
use crate::lifecycle::LifecycleEvent;
use crate::process::stream_json::{PLAN_TOOL, QUESTION_TOOL};
use crate::process::{ProcessEvent, ProcessResult, SpawnRequest};
use crate::queue::FailureOutcome;
use crate::resume::{InteractionKind, PendingInteraction};

/// Prompt for continuing a session that has no new user input
const CONTINUE_PROMPT: &str = "Continue the task from where you left off.";

/// Everything a worker needs to run one attempt
pub(super) struct Job {
    pub run: Arc<Run>,
    pub index: usize,
    pub agent: Agent,
    pub prompt: String,
    /// Continue this CLI session instead of starting fresh
    pub resume_session: Option<String>,
    pub permit: OwnedSemaphorePermit,
}

#[derive(Debug)]
enum WorkOutcome {
    Completed(String),
    Failed(TaskFailure),
    Interaction(PendingInteraction),
    Stopped(StopReason),
}

/// Why a parked or suspended sub-task is continued
pub(super) enum Continuation {
    /// The user answered; the text is the next prompt
    Answer(String),
    /// Suspended work restarting; its resume context is deleted once a
    /// process slot is held
    Resume,
}

impl EngineCore {
    /// Register and start a worker for `job`
    pub(super) async fn launch(self: &Arc<Self>, job: Job) {
        let (stop, stop_rx) = watch::channel(None);
        {
            let mut workers = self.workers.lock().await;
            // A worker registered after shutdown or cancellation must stop at once
            if self.shutdown.is_cancelled() {
                stop.send_replace(Some(StopReason::Shutdown));
            } else if job.run.cancel.is_cancelled() {
                stop.send_replace(Some(StopReason::Cancelled));
            }
            workers.insert(
                job.agent.id,
                Worker {
                    run: job.run.id,
                    stop,
                },
            );
        }
        let core = Arc::clone(self);
        self.spawn_task(async move { core.work(job, stop_rx).await })
            .await;
    }

    /// Start a suspended sub-task's agent again
    ///
    /// Continues the CLI session when one is known.
    pub(super) async fn continue_subtask(
        self: &Arc<Self>,
        run: &Arc<Run>,
        index: usize,
        agent_id: AgentId,
        continuation: Continuation,
    ) -> Result<(), OrchestrationError> {
        let agent = self
            .pool
            .get(agent_id)
            .await
            .ok_or(TransitionError::AgentNotFound(agent_id))?;
        let item = run
            .queue
            .get(index)
            .await
            .ok_or(QueueError::NotFound { index })?;

        let session = agent.session_id.clone().or(item.session_id);
        let message = match &continuation {
            Continuation::Answer(message) => Some(message.clone()),
            Continuation::Resume => None,
        };
        let prompt = match (&session, message) {
            (Some(_), Some(message)) => message,
            (Some(_), None) => CONTINUE_PROMPT.to_string(),
            (None, Some(message)) => format!("{}\n\nUser response:\n{message}", item.prompt),
            (None, None) => item.prompt,
        };

        let permit = self
            .wait_for_slot()
            .await
            .ok_or(OrchestrationError::Cancelled(run.id))?;
        if matches!(continuation, Continuation::Resume)
            && let Err(e) = self.suspensions.discard(agent_id).await
        {
            warn!(agent_id = %agent_id, error = %e, "Failed to delete resume context");
        }
        info!(
            orchestration_id = %run.id,
            index,
            agent_id = %agent_id,
            resumed_session = session.is_some(),
            "Continuing sub-task"
        );
        self.launch(Job {
            run: Arc::clone(run),
            index,
            agent,
            prompt,
            resume_session: session,
            permit,
        })
        .await;
        Ok(())
    }

    async fn work(self: Arc<Self>, job: Job, mut stop: watch::Receiver<Option<StopReason>>) {
        let Job {
            run,
            index,
            agent,
            prompt,
            resume_session,
            permit,
        } = job;
        let agent_id = agent.id;

        let request = SpawnRequest::new(agent_id, prompt, &agent.model)
            .with_working_dir(agent.working_dir.clone())
            .resuming(resume_session)
            .with_allowed_tools(self.config.process.allowed_tools.clone());
        let outcome = self.follow(&run, index, request, &mut stop).await;

        self.workers.lock().await.remove(&agent_id);
        self.settle(&run, index, agent_id, outcome).await;
        drop(permit);
        self.capacity.notify_waiters();
        run.wake.notify_one();
    }

    /// Spawn the process and track it until it decides the attempt
    async fn follow(
        &self,
        run: &Run,
        index: usize,
        request: SpawnRequest,
        stop: &mut watch::Receiver<Option<StopReason>>,
    ) -> WorkOutcome {
        let agent_id = request.agent_id;
        let handle = match self.processes.spawn(request).await {
            Ok(handle) => handle,
            Err(e) => {
                return WorkOutcome::Failed(TaskFailure::new(FailureKind::Spawn, e.to_string()));
            }
        };

        let hang_timeout = self.config.cleanup.process_hang_timeout();
        let events = ReceiverStream::new(handle.events).timeout(hang_timeout);
        tokio::pin!(events);
        let mut result: Option<ProcessResult> = None;

        loop {
            let next = tokio::select! {
                reason = async { stop.wait_for(Option::is_some).await.ok().and_then(|r| *r) } => {
                    return WorkOutcome::Stopped(reason.unwrap_or(StopReason::Shutdown));
                }
                next = events.next() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(_)) => {
                    return WorkOutcome::Failed(TaskFailure::new(
                        FailureKind::Timeout,
                        format!("no output for {}s", hang_timeout.as_secs()),
                    ));
                }
                // Channel closed without an exit: the process was killed under us
                None => return finished(result, None),
            };

            match event {
                ProcessEvent::SessionStarted { session_id } => {
                    self.record_session(run, index, agent_id, session_id).await;
                }
                ProcessEvent::Thinking { .. } => {
                    self.apply(agent_id, LifecycleEvent::AiReasoning, true).await;
                }
                // Assistant prose is reasoning too, not only thinking blocks
                ProcessEvent::Text { text } => {
                    debug!(agent_id = %agent_id, len = text.len(), "Assistant text");
                    self.apply(agent_id, LifecycleEvent::AiReasoning, true).await;
                }
                ProcessEvent::ToolInvoked { name, .. } => {
                    debug!(agent_id = %agent_id, tool = %name, "Tool invoked");
                    self.pool
                        .update_task(agent_id, AgentTask::record_tool_call)
                        .await;
                    self.apply(agent_id, LifecycleEvent::ToolInvoked, true).await;
                }
                ProcessEvent::QuestionAsked { id, input } => {
                    return WorkOutcome::Interaction(
                        PendingInteraction::new(InteractionKind::Question, input.to_string())
                            .with_tool(QUESTION_TOOL, id),
                    );
                }
                ProcessEvent::PlanProposed { id, input } => {
                    return WorkOutcome::Interaction(
                        PendingInteraction::new(InteractionKind::Plan, input.to_string())
                            .with_tool(PLAN_TOOL, id),
                    );
                }
                ProcessEvent::ToolResult { .. } => {}
                ProcessEvent::Result(r) => {
                    if let Some(session_id) = r.session_id.clone() {
                        self.record_session(run, index, agent_id, session_id).await;
                    }
                    result = Some(r);
                }
                ProcessEvent::Exited { code } => return finished(result, code),
            }
        }
    }

    async fn record_session(
        &self,
        run: &Run,
        index: usize,
        agent_id: AgentId,
        session_id: String,
    ) {
        self.pool
            .update(agent_id, |a| a.session_id = Some(session_id.clone()))
            .await;
        if let Err(e) = run.queue.set_session(index, session_id).await {
            debug!(error = %e, "Could not record session on queue item");
        }
    }

    /// Apply the attempt's outcome to the agent, the queue and the run
    async fn settle(
        self: &Arc<Self>,
        run: &Arc<Run>,
        index: usize,
        agent_id: AgentId,
        outcome: WorkOutcome,
    ) {
        match outcome {
            WorkOutcome::Completed(text) => {
                self.apply(agent_id, LifecycleEvent::TaskCompleted, false).await;
                self.pool.update_task(agent_id, |t| t.progress = 1.0).await;
                match run.queue.mark_completed(index, text).await {
                    Ok(()) => {
                        info!(orchestration_id = %run.id, index, agent_id = %agent_id, "Sub-task completed")
                    }
                    Err(e) => {
                        warn!(orchestration_id = %run.id, index, error = %e, "Could not complete queue item")
                    }
                }
                self.return_agent(agent_id).await;
            }
            WorkOutcome::Failed(failure) => {
                // A hung process is still attached; the timeout transition terminates it
                let (event, attached) = if failure.kind == FailureKind::Timeout {
                    (LifecycleEvent::Timeout, true)
                } else {
                    (LifecycleEvent::TaskFailed, false)
                };
                self.apply(agent_id, event, attached).await;
                self.record_failure(run, index, failure.on_agent(agent_id)).await;
                self.return_agent(agent_id).await;
            }
            WorkOutcome::Interaction(pending) => self.park(run, index, agent_id, pending).await,
            WorkOutcome::Stopped(StopReason::Cancelled) => {
                let attached = self.processes.is_running(agent_id).await;
                self.apply(agent_id, LifecycleEvent::Cancel, attached).await;
                let failure =
                    TaskFailure::new(FailureKind::Cancelled, CANCEL_MESSAGE).on_agent(agent_id);
                self.record_failure(run, index, failure).await;
                self.return_agent(agent_id).await;
            }
            WorkOutcome::Stopped(StopReason::Shutdown) => {
                let _ = self.processes.terminate(agent_id).await;
                self.apply(agent_id, LifecycleEvent::ProcessTerminated, false)
                    .await;
                if let Err(e) = run.queue.mark_suspended(index).await {
                    warn!(orchestration_id = %run.id, index, error = %e, "Could not suspend queue item");
                }
            }
        }
        self.refresh(run).await;
    }

    pub(super) async fn record_failure(
        self: &Arc<Self>,
        run: &Arc<Run>,
        index: usize,
        failure: TaskFailure,
    ) {
        let message = failure.message.clone();
        match run
            .queue
            .mark_failed(index, failure, &self.config.retry)
            .await
        {
            Ok(FailureOutcome::RetryScheduled { attempt, delay }) => {
                info!(
                    orchestration_id = %run.id,
                    index,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Sub-task failed, retry scheduled"
                );
                self.schedule_retry(run, index, delay).await;
            }
            Ok(FailureOutcome::Permanent) => {
                warn!(orchestration_id = %run.id, index, error = %message, "Sub-task failed permanently");
            }
            Err(e) => {
                warn!(orchestration_id = %run.id, index, error = %e, "Could not fail queue item")
            }
        }
    }

    async fn schedule_retry(self: &Arc<Self>, run: &Arc<Run>, index: usize, delay: Duration) {
        let core = Arc::clone(self);
        let run = Arc::clone(run);
        self.spawn_task(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    match run.queue.retry(index, &core.config.retry).await {
                        Ok(()) => info!(orchestration_id = %run.id, index, "Retrying sub-task"),
                        Err(e) => debug!(orchestration_id = %run.id, index, error = %e, "Retry dropped"),
                    }
                }
                _ = run.cancel.cancelled() => {}
                _ = core.shutdown.cancelled() => {}
            }
            run.wake.notify_one();
        })
        .await;
    }

    /// Block the sub-task until the user answers
    ///
    /// The CLI cannot take an answer mid-run, so the process is stopped and
    /// later continued with `--resume`.
    async fn park(&self, run: &Run, index: usize, agent_id: AgentId, pending: PendingInteraction) {
        let event = match pending.kind {
            InteractionKind::Question => LifecycleEvent::QuestionAsked,
            InteractionKind::Plan => LifecycleEvent::PlanReady,
            InteractionKind::Permission => LifecycleEvent::PermissionNeeded,
        };
        self.apply(agent_id, event, true).await;
        let _ = self.processes.terminate(agent_id).await;
        if let Err(e) = run.queue.mark_suspended(index).await {
            warn!(orchestration_id = %run.id, index, error = %e, "Could not suspend queue item");
        }

        self.parked.lock().await.insert(
            agent_id,
            Parked {
                run: run.id,
                index,
                interaction: pending.clone(),
            },
        );
        info!(orchestration_id = %run.id, index, agent_id = %agent_id, kind = ?pending.kind, "Sub-task waiting on user");
        self.events
            .publish(ConductorEvent::InteractionPending {
                agent_id,
                orchestration_id: Some(run.id),
                interaction: pending,
            })
            .await;
    }
}

fn finished(result: Option<ProcessResult>, code: Option<i32>) -> WorkOutcome {
    match result {
        Some(r) if !r.is_error => WorkOutcome::Completed(r.text),
        Some(r) => {
            let message = if r.text.is_empty() {
                "run ended in error".to_string()
            } else {
                r.text
            };
            WorkOutcome::Failed(TaskFailure::new(FailureKind::Subprocess, message))
        }
        None => WorkOutcome::Failed(TaskFailure::new(
            FailureKind::Subprocess,
            match code {
                Some(code) => format!("process exited with code {code} before reporting a result"),
                None => "process ended before reporting a result".to_string(),
            },
        )),
    }
}
