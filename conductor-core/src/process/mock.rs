//! Mock process manager for testing
//!
//! MockProcessManager scripts CLI runs so engine logic can be tested fast and
//! deterministically, without a `claude` binary.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::traits::{CliProcessManager, ProcessEvent, ProcessHandle, ProcessResult, SpawnRequest};
use crate::agent::AgentId;
use crate::error::ProcessError;

/// Tool-use ID the mock gives scripted questions and plans
pub const MOCK_TOOL_USE_ID: &str = "toolu_mock";

/// One scripted CLI run
#[derive(Debug, Clone)]
pub struct MockRun {
    events: Vec<ProcessEvent>,
    delay: Duration,
    hang: bool,
    spawn_error: bool,
}

impl MockRun {
    /// Run that emits exactly these events (a session event is prepended)
    pub fn from_events(events: Vec<ProcessEvent>) -> Self {
        Self {
            events,
            delay: Duration::ZERO,
            hang: false,
            spawn_error: false,
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::from_events(vec![
            ProcessEvent::Text { text: text.clone() },
            ProcessEvent::Result(ProcessResult {
                text,
                cost_usd: Some(0.001),
                duration_ms: Some(10),
                num_turns: Some(1),
                ..Default::default()
            }),
            ProcessEvent::Exited { code: Some(0) },
        ])
    }

    /// Run ending in an `is_error` result and a non-zero exit
    pub fn failure(message: impl Into<String>) -> Self {
        Self::from_events(vec![
            ProcessEvent::Result(ProcessResult {
                is_error: true,
                text: message.into(),
                ..Default::default()
            }),
            ProcessEvent::Exited { code: Some(1) },
        ])
    }

    /// Process dies without producing a result
    pub fn crash() -> Self {
        Self::from_events(vec![ProcessEvent::Exited { code: Some(137) }])
    }

    /// Agent asks a question and then waits
    pub fn question(input: serde_json::Value) -> Self {
        Self::from_events(vec![ProcessEvent::QuestionAsked {
            id: MOCK_TOOL_USE_ID.to_string(),
            input,
        }])
        .hanging()
    }

    /// Agent proposes a plan and then waits
    pub fn plan(input: serde_json::Value) -> Self {
        Self::from_events(vec![ProcessEvent::PlanProposed {
            id: MOCK_TOOL_USE_ID.to_string(),
            input,
        }])
        .hanging()
    }

    /// Process that never produces output nor exits until terminated
    pub fn hang() -> Self {
        Self::from_events(Vec::new()).hanging()
    }

    /// `spawn` itself fails
    pub fn spawn_error() -> Self {
        Self {
            spawn_error: true,
            ..Self::from_events(Vec::new())
        }
    }

    /// Keep the process alive after the scripted events
    #[must_use]
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Wait before emitting anything
    #[must_use]
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

struct Script {
    prompt_contains: String,
    runs: VecDeque<MockRun>,
}

struct ActiveRun {
    run_id: Uuid,
    cancel: CancellationToken,
}

type Active = Arc<Mutex<HashMap<AgentId, ActiveRun>>>;

/// Scripted implementation of CliProcessManager
///
/// Runs are picked by the first script whose substring occurs in the prompt;
/// each script's runs are consumed in order and the last one repeats.
/// Unmatched prompts get the default run (success with "done").
pub struct MockProcessManager {
    scripts: StdMutex<Vec<Script>>,
    default_run: StdMutex<MockRun>,
    spawns: StdMutex<Vec<SpawnRequest>>,
    terminations: StdMutex<Vec<AgentId>>,
    active: Active,
    peak: Arc<AtomicUsize>,
}

impl MockProcessManager {
    pub fn new() -> Self {
        Self {
            scripts: StdMutex::new(Vec::new()),
            default_run: StdMutex::new(MockRun::success("done")),
            spawns: StdMutex::new(Vec::new()),
            terminations: StdMutex::new(Vec::new()),
            active: Arc::new(Mutex::new(HashMap::new())),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Script the runs for prompts containing `prompt_contains`
    pub fn script(&self, prompt_contains: impl Into<String>, runs: Vec<MockRun>) -> &Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push(Script {
                prompt_contains: prompt_contains.into(),
                runs: runs.into(),
            });
        }
        self
    }

    pub fn set_default(&self, run: MockRun) {
        if let Ok(mut default_run) = self.default_run.lock() {
            *default_run = run;
        }
    }

    /// Every spawn request received, in order
    pub fn spawns(&self) -> Vec<SpawnRequest> {
        self.spawns.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Spawn requests whose prompt contains `needle`
    pub fn spawns_matching(&self, needle: &str) -> Vec<SpawnRequest> {
        self.spawns()
            .into_iter()
            .filter(|r| r.prompt.contains(needle))
            .collect()
    }

    pub fn terminations(&self) -> Vec<AgentId> {
        self.terminations
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Highest number of simultaneously running processes seen
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_run(&self, prompt: &str) -> MockRun {
        if let Ok(mut scripts) = self.scripts.lock()
            && let Some(script) = scripts
                .iter_mut()
                .find(|s| prompt.contains(&s.prompt_contains))
        {
            let run = if script.runs.len() > 1 {
                script.runs.pop_front()
            } else {
                script.runs.front().cloned()
            };
            if let Some(run) = run {
                return run;
            }
        }
        self.default_run
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|_| MockRun::success("done"))
    }
}

impl Default for MockProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CliProcessManager for MockProcessManager {
    async fn spawn(&self, request: SpawnRequest) -> Result<ProcessHandle, ProcessError> {
        let run = self.next_run(&request.prompt);
        let agent_id = request.agent_id;
        if let Ok(mut spawns) = self.spawns.lock() {
            spawns.push(request);
        }

        if run.spawn_error {
            return Err(ProcessError::SpawnFailed(std::io::Error::other(
                "scripted spawn failure",
            )));
        }

        let session_id = format!("mock-session-{agent_id}");
        let mut events = Vec::with_capacity(run.events.len() + 1);
        events.push(ProcessEvent::SessionStarted {
            session_id: session_id.clone(),
        });
        events.extend(run.events.into_iter().map(|event| match event {
            ProcessEvent::Result(mut result) => {
                result.session_id.get_or_insert_with(|| session_id.clone());
                ProcessEvent::Result(result)
            }
            other => other,
        }));

        let (tx, rx) = mpsc::channel(events.len().max(1));
        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        {
            let mut active = self.active.lock().await;
            if let Some(previous) = active.insert(
                agent_id,
                ActiveRun {
                    run_id,
                    cancel: cancel.clone(),
                },
            ) {
                previous.cancel.cancel();
            }
            self.peak.fetch_max(active.len(), Ordering::SeqCst);
        }

        let active = Arc::clone(&self.active);
        let (delay, hang) = (run.delay, run.hang);
        tokio::spawn(async move {
            let emitted = async {
                tokio::time::sleep(delay).await;
                for event in events {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                if hang {
                    std::future::pending::<()>().await;
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = emitted => {}
            }
            let mut active = active.lock().await;
            if active.get(&agent_id).is_some_and(|r| r.run_id == run_id) {
                active.remove(&agent_id);
            }
        });

        Ok(ProcessHandle {
            agent_id,
            events: rx,
        })
    }

    async fn terminate(&self, agent_id: AgentId) -> Result<(), ProcessError> {
        if let Ok(mut terminations) = self.terminations.lock() {
            terminations.push(agent_id);
        }
        let run = self
            .active
            .lock()
            .await
            .remove(&agent_id)
            .ok_or(ProcessError::NotRunning(agent_id))?;
        run.cancel.cancel();
        Ok(())
    }

    async fn terminate_all(&self) {
        let runs: Vec<_> = self.active.lock().await.drain().collect();
        for (agent_id, run) in runs {
            if let Ok(mut terminations) = self.terminations.lock() {
                terminations.push(agent_id);
            }
            run.cancel.cancel();
        }
    }

    async fn is_running(&self, agent_id: AgentId) -> bool {
        self.active.lock().await.contains_key(&agent_id)
    }

    async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}
