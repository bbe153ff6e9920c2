//! Process manager spawning `claude -p`
//!
//! Each run is one `claude -p --output-format stream-json` subprocess. A
//! reader task per process turns stdout lines into [`ProcessEvent`]s.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::stream_json::{parse_line, to_process_events};
use super::traits::{CliProcessManager, ProcessEvent, ProcessHandle, SpawnRequest};
use crate::agent::AgentId;
use crate::error::ProcessError;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for ClaudeProcessManager
#[derive(Debug, Clone, Default)]
pub struct ClaudeProcessConfig {
    /// Path to claude binary (defaults to "claude" on PATH)
    pub claude_path: Option<PathBuf>,
}

struct RunningProcess {
    run_id: Uuid,
    cancel: CancellationToken,
}

type Running = Arc<Mutex<HashMap<AgentId, RunningProcess>>>;

/// Production process manager backed by tokio subprocesses
pub struct ClaudeProcessManager {
    config: ClaudeProcessConfig,
    running: Running,
}

impl ClaudeProcessManager {
    pub fn new(config: ClaudeProcessConfig) -> Self {
        Self {
            config,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn resolve_binary(&self) -> Result<PathBuf, ProcessError> {
        let name = self
            .config
            .claude_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("claude"));
        which::which(&name).map_err(|_| ProcessError::ClaudeNotFound)
    }

    /// Build the command for one run
    ///
    /// Extracted for testability: command construction can be checked without
    /// spawning anything.
    pub fn build_command(&self, program: PathBuf, request: &SpawnRequest) -> Command {
        let mut cmd = Command::new(program);

        // Print mode with stream-json output (requires --verbose)
        cmd.arg("-p")
            .arg("--verbose")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--model")
            .arg(&request.model);

        if let Some(ref session_id) = request.resume_session_id {
            cmd.arg("--resume").arg(session_id);
        }

        if !request.allowed_tools.is_empty() {
            cmd.arg("--allowedTools")
                .arg(request.allowed_tools.join(","));
        }

        if let Some(ref working_dir) = request.working_dir {
            cmd.current_dir(working_dir);
        }

        // The prompt comes last
        cmd.arg(&request.prompt);

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);

        cmd
    }
}

impl Default for ClaudeProcessManager {
    fn default() -> Self {
        Self::new(ClaudeProcessConfig::default())
    }
}

#[async_trait]
impl CliProcessManager for ClaudeProcessManager {
    #[instrument(skip_all, fields(agent_id = %request.agent_id, model = %request.model))]
    async fn spawn(&self, request: SpawnRequest) -> Result<ProcessHandle, ProcessError> {
        let program = self.resolve_binary()?;
        let mut child = self
            .build_command(program, &request)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ProcessError::ClaudeNotFound
                } else {
                    ProcessError::SpawnFailed(e)
                }
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            ProcessError::Io(std::io::Error::other("failed to capture stdout"))
        })?;

        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        {
            let mut running = self.running.lock().await;
            let entry = RunningProcess {
                run_id,
                cancel: cancel.clone(),
            };
            if let Some(previous) = running.insert(request.agent_id, entry) {
                warn!("Agent already had a running process, terminating it");
                previous.cancel.cancel();
            }
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(read_events(
            request.agent_id,
            run_id,
            child,
            BufReader::new(stdout),
            tx,
            cancel,
            Arc::clone(&self.running),
        ));

        info!("Claude process spawned");
        Ok(ProcessHandle {
            agent_id: request.agent_id,
            events: rx,
        })
    }

    async fn terminate(&self, agent_id: AgentId) -> Result<(), ProcessError> {
        let process = self
            .running
            .lock()
            .await
            .remove(&agent_id)
            .ok_or(ProcessError::NotRunning(agent_id))?;
        process.cancel.cancel();
        debug!(agent_id = %agent_id, "Claude process terminated");
        Ok(())
    }

    async fn terminate_all(&self) {
        let processes: Vec<_> = self.running.lock().await.drain().collect();
        for (agent_id, process) in processes {
            process.cancel.cancel();
            debug!(agent_id = %agent_id, "Claude process terminated");
        }
    }

    async fn is_running(&self, agent_id: AgentId) -> bool {
        self.running.lock().await.contains_key(&agent_id)
    }

    async fn active_count(&self) -> usize {
        self.running.lock().await.len()
    }
}

async fn read_events(
    agent_id: AgentId,
    run_id: Uuid,
    mut child: Child,
    stdout: BufReader<tokio::process::ChildStdout>,
    tx: mpsc::Sender<ProcessEvent>,
    cancel: CancellationToken,
    running: Running,
) {
    let mut lines = stdout.lines();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(agent_id = %agent_id, error = %e, "Failed to kill Claude process");
                }
                return;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let Some(msg) = parse_line(&line) else { continue };
                    for event in to_process_events(msg) {
                        if tx.send(event).await.is_err() {
                            // Receiver gone; nobody cares about this run anymore
                            let _ = child.kill().await;
                            forget_run(&running, agent_id, run_id).await;
                            return;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(agent_id = %agent_id, error = %e, "Error reading Claude stdout");
                    break;
                }
            }
        }
    }

    let code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(agent_id = %agent_id, error = %e, "Failed to wait for Claude process");
            None
        }
    };

    forget_run(&running, agent_id, run_id).await;

    debug!(agent_id = %agent_id, code = ?code, "Claude process exited");
    let _ = tx.send(ProcessEvent::Exited { code }).await;
}

/// Drop the bookkeeping entry unless a newer run for the agent replaced it
async fn forget_run(running: &Running, agent_id: AgentId, run_id: Uuid) {
    let mut running = running.lock().await;
    if running.get(&agent_id).is_some_and(|p| p.run_id == run_id) {
        running.remove(&agent_id);
    }
}
