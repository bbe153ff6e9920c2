//! Orchestration run types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::{AgentId, TaskId};
use crate::error::TaskFailure;
use crate::queue::{QueueItemStatus, SubAgentTaskQueueItem};

/// Unique identifier for an orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrchestrationId(pub Uuid);

impl OrchestrationId {
    /// Create a new orchestration ID using UUID v7 (time-ordered)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for OrchestrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrchestrationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Phase of a run: `Decomposing → Executing → Synthesizing → Completed | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationPhase {
    Decomposing,
    Executing,
    Synthesizing,
    Completed,
    Failed,
}

impl OrchestrationPhase {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for OrchestrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Decomposing => "decomposing",
            Self::Executing => "executing",
            Self::Synthesizing => "synthesizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// In-memory status of one sub-task
///
/// `Waiting` covers both "dependencies not met yet" and "ready but no capacity".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    Pending,
    Waiting,
    InProgress,
    Completed,
    Failed,
}

impl SubTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Execution view of one decomposed sub-task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratedSubTask {
    pub index: usize,
    pub title: String,
    pub prompt: String,
    pub dependencies: Vec<usize>,
    pub can_parallel: bool,
    pub complexity: String,
    pub status: SubTaskStatus,
    pub agent_id: Option<AgentId>,
    pub task_id: Option<TaskId>,
    pub result: Option<String>,
    pub error: Option<TaskFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OrchestratedSubTask {
    pub fn new(index: usize, title: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            index,
            title: title.into(),
            prompt: prompt.into(),
            dependencies: Vec::new(),
            can_parallel: true,
            complexity: "medium".to_string(),
            status: SubTaskStatus::Pending,
            agent_id: None,
            task_id: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// The durable queue record for this sub-task
    pub fn to_queue_item(&self) -> SubAgentTaskQueueItem {
        let mut item = SubAgentTaskQueueItem::new(self.index, &self.title, &self.prompt)
            .with_dependencies(self.dependencies.clone());
        item.can_parallel = self.can_parallel;
        item.complexity = self.complexity.clone();
        item.created_at = self.created_at;
        item
    }

    /// Refresh this view from its queue record
    ///
    /// A failed item with a retry scheduled is still waiting from the run's
    /// point of view.
    pub fn sync_from(&mut self, item: &SubAgentTaskQueueItem) {
        self.status = match item.status {
            QueueItemStatus::Pending => SubTaskStatus::Pending,
            QueueItemStatus::Ready => SubTaskStatus::Waiting,
            QueueItemStatus::InProgress | QueueItemStatus::Suspended => SubTaskStatus::InProgress,
            QueueItemStatus::Completed => SubTaskStatus::Completed,
            QueueItemStatus::Failed if item.retry_pending => SubTaskStatus::Waiting,
            QueueItemStatus::Failed => SubTaskStatus::Failed,
        };
        self.agent_id = item.agent_id;
        self.task_id = item.task_id;
        self.result = item.result.clone();
        self.error = item.error.clone();
        self.started_at = item.started_at;
        self.completed_at = item.completed_at;
    }
}

/// One decomposition run, owned by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub id: OrchestrationId,
    /// Agent that submitted the prompt
    pub commander_id: AgentId,
    pub original_prompt: String,
    pub phase: OrchestrationPhase,
    pub subtasks: Vec<OrchestratedSubTask>,
    pub current_wave: usize,
    pub synthesis_result: Option<String>,
    /// Why the whole run failed, if it did
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OrchestrationState {
    pub fn new(commander_id: AgentId, original_prompt: impl Into<String>) -> Self {
        Self {
            id: OrchestrationId::new(),
            commander_id,
            original_prompt: original_prompt.into(),
            phase: OrchestrationPhase::Decomposing,
            subtasks: Vec::new(),
            current_wave: 0,
            synthesis_result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn completed_count(&self) -> usize {
        self.subtasks
            .iter()
            .filter(|t| t.status == SubTaskStatus::Completed)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.subtasks
            .iter()
            .filter(|t| t.status == SubTaskStatus::Failed)
            .count()
    }

    /// Share of sub-tasks completed, in `[0.0, 1.0]`
    pub fn progress(&self) -> f64 {
        if self.subtasks.is_empty() {
            return 0.0;
        }
        self.completed_count() as f64 / self.subtasks.len() as f64
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_finished()
    }

    pub fn subtask(&self, index: usize) -> Option<&OrchestratedSubTask> {
        self.subtasks.iter().find(|t| t.index == index)
    }

    pub(crate) fn subtask_mut(&mut self, index: usize) -> Option<&mut OrchestratedSubTask> {
        self.subtasks.iter_mut().find(|t| t.index == index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    fn state_with(statuses: &[SubTaskStatus]) -> OrchestrationState {
        let mut state = OrchestrationState::new(AgentId::new(), "build it");
        state.subtasks = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let mut t = OrchestratedSubTask::new(i, format!("t{i}"), "p");
                t.status = *s;
                t
            })
            .collect();
        state
    }

    #[test]
    fn counts_and_progress_are_derived() {
        let state = state_with(&[
            SubTaskStatus::Completed,
            SubTaskStatus::Failed,
            SubTaskStatus::InProgress,
            SubTaskStatus::Completed,
        ]);
        assert_eq!(state.completed_count(), 2);
        assert_eq!(state.failed_count(), 1);
        assert!((state.progress() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_run_has_zero_progress() {
        assert_eq!(state_with(&[]).progress(), 0.0);
    }

    #[test]
    fn retry_pending_item_reads_as_waiting() {
        let mut task = OrchestratedSubTask::new(0, "t", "p");
        let mut item = task.to_queue_item();
        item.status = QueueItemStatus::Failed;
        item.retry_pending = true;
        item.error = Some(TaskFailure::new(FailureKind::Timeout, "hung"));

        task.sync_from(&item);
        assert_eq!(task.status, SubTaskStatus::Waiting);

        item.retry_pending = false;
        task.sync_from(&item);
        assert_eq!(task.status, SubTaskStatus::Failed);
        assert_eq!(task.error.unwrap().kind, FailureKind::Timeout);
    }

    #[test]
    fn queue_item_carries_shape() {
        let mut task = OrchestratedSubTask::new(3, "C", "do c");
        task.dependencies = vec![0, 1];
        task.can_parallel = false;
        task.complexity = "high".into();

        let item = task.to_queue_item();
        assert_eq!(item.index, 3);
        assert_eq!(item.dependencies, vec![0, 1]);
        assert!(!item.can_parallel);
        assert_eq!(item.complexity, "high");
        assert_eq!(item.status, QueueItemStatus::Pending);
    }

    #[test]
    fn phase_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&OrchestrationPhase::Synthesizing).unwrap(),
            "\"synthesizing\""
        );
        assert!(OrchestrationPhase::Failed.is_finished());
        assert!(!OrchestrationPhase::Executing.is_finished());
    }
}
