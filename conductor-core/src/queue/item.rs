//! Queue item types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, TaskId};
use crate::error::TaskFailure;
use crate::policy::RetryPolicy;

/// Status of a queue item
///
/// `Pending → Ready → InProgress → Completed | Failed`, with `Suspended`
/// while the agent waits on the user or the host restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Ready,
    InProgress,
    Suspended,
    Completed,
    Failed,
}

impl std::fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Durable record of one decomposed sub-task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAgentTaskQueueItem {
    /// Position in the decomposition
    pub index: usize,
    pub title: String,
    pub prompt: String,
    pub dependencies: Vec<usize>,
    pub can_parallel: bool,
    pub complexity: String,
    pub status: QueueItemStatus,
    pub retry_count: u32,
    /// Failed, but a retry has been scheduled and not yet started
    #[serde(default)]
    pub retry_pending: bool,
    pub agent_id: Option<AgentId>,
    pub task_id: Option<TaskId>,
    /// CLI session of the last run, used to continue after an interaction
    pub session_id: Option<String>,
    pub result: Option<String>,
    pub error: Option<TaskFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SubAgentTaskQueueItem {
    pub fn new(index: usize, title: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            index,
            title: title.into(),
            prompt: prompt.into(),
            dependencies: Vec::new(),
            can_parallel: true,
            complexity: "medium".to_string(),
            status: QueueItemStatus::Pending,
            retry_count: 0,
            retry_pending: false,
            agent_id: None,
            task_id: None,
            session_id: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<usize>) -> Self {
        self.dependencies = dependencies;
        self
    }

    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.can_parallel = false;
        self
    }

    /// Failed and still within the retry budget
    ///
    /// User cancellations and dependency failures are never retryable.
    pub fn can_retry(&self, policy: &RetryPolicy) -> bool {
        self.status == QueueItemStatus::Failed
            && policy.allows_retry(self.retry_count)
            && self.error.as_ref().is_none_or(TaskFailure::is_retryable)
    }

    /// Failed with no retry coming
    pub fn is_permanently_failed(&self) -> bool {
        self.status == QueueItemStatus::Failed && !self.retry_pending
    }

    /// Completed or permanently failed
    pub fn is_terminal(&self) -> bool {
        self.status == QueueItemStatus::Completed || self.is_permanently_failed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    fn failed(kind: FailureKind, retry_count: u32) -> SubAgentTaskQueueItem {
        let mut item = SubAgentTaskQueueItem::new(0, "t", "p");
        item.status = QueueItemStatus::Failed;
        item.retry_count = retry_count;
        item.error = Some(TaskFailure::new(kind, "x"));
        item
    }

    #[test]
    fn can_retry_respects_budget() {
        let policy = RetryPolicy::default();
        assert!(failed(FailureKind::Subprocess, 0).can_retry(&policy));
        assert!(failed(FailureKind::Subprocess, 1).can_retry(&policy));
        assert!(!failed(FailureKind::Subprocess, 2).can_retry(&policy));
        assert!(!failed(FailureKind::Subprocess, 0).can_retry(&RetryPolicy::none()));
    }

    #[test]
    fn can_retry_requires_failed_status() {
        let item = SubAgentTaskQueueItem::new(0, "t", "p");
        assert!(!item.can_retry(&RetryPolicy::default()));
    }

    #[test]
    fn cancelled_items_are_never_retryable() {
        let policy = RetryPolicy::default();
        assert!(!failed(FailureKind::Cancelled, 0).can_retry(&policy));
        assert!(!failed(FailureKind::DependencyFailed, 0).can_retry(&policy));
    }

    #[test]
    fn retry_pending_is_not_terminal() {
        let mut item = failed(FailureKind::Timeout, 0);
        assert!(item.is_terminal());
        item.retry_pending = true;
        assert!(!item.is_terminal());
        assert!(!item.is_permanently_failed());
    }

    #[test]
    fn status_display_matches_serde() {
        let json = serde_json::to_string(&QueueItemStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        assert_eq!(QueueItemStatus::InProgress.to_string(), "in_progress");
    }
}
