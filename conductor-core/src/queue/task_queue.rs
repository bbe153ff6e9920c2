//! SubAgentTaskQueue: the restart-safe view of one orchestration's sub-tasks
//!
//! Every mutation happens under a single mutex and is applied all-or-nothing.
//! Persistence runs after the lock is released, so slow storage never blocks
//! dispatch; a version counter keeps an older copy from overwriting a newer one.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::item::{QueueItemStatus, SubAgentTaskQueueItem};
use crate::agent::{AgentId, TaskId};
use crate::error::{FailureKind, QueueError, StoreError, TaskFailure};
use crate::orchestration::OrchestrationId;
use crate::policy::RetryPolicy;
use crate::store::{KeyValueStore, get_json, put_json};

/// What happened after a failure was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// A retry is due after `delay`; call [`SubAgentTaskQueue::retry`] then
    RetryScheduled { attempt: u32, delay: Duration },
    Permanent,
}

struct Inner {
    items: Vec<SubAgentTaskQueueItem>,
    version: u64,
}

pub struct SubAgentTaskQueue {
    orchestration_id: OrchestrationId,
    inner: Mutex<Inner>,
    store: Option<Arc<dyn KeyValueStore>>,
    /// Last version written to the store
    persisted: Mutex<u64>,
}

impl SubAgentTaskQueue {
    pub fn new(orchestration_id: OrchestrationId) -> Self {
        Self {
            orchestration_id,
            inner: Mutex::new(Inner {
                items: Vec::new(),
                version: 0,
            }),
            store: None,
            persisted: Mutex::new(0),
        }
    }

    /// Persist every mutation under `queue/<orchestration_id>`
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn store_key(orchestration_id: OrchestrationId) -> String {
        format!("queue/{orchestration_id}")
    }

    /// Reload a persisted queue
    pub async fn load(
        orchestration_id: OrchestrationId,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Option<Self>, StoreError> {
        let items: Option<Vec<SubAgentTaskQueueItem>> =
            get_json(store.as_ref(), &Self::store_key(orchestration_id)).await?;
        Ok(items.map(|items| Self {
            orchestration_id,
            inner: Mutex::new(Inner { items, version: 0 }),
            store: Some(store),
            persisted: Mutex::new(0),
        }))
    }

    pub fn orchestration_id(&self) -> OrchestrationId {
        self.orchestration_id
    }

    /// Apply `f` atomically and persist the result if it succeeded
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Vec<SubAgentTaskQueueItem>) -> Result<T, QueueError>,
    ) -> Result<T, QueueError> {
        let (value, snapshot) = {
            let mut inner = self.inner.lock().await;
            // Work on a copy so a failing closure leaves nothing half-applied
            let mut items = inner.items.clone();
            let value = f(&mut items)?;
            inner.items = items;
            inner.version += 1;
            (value, (inner.version, inner.items.clone()))
        };
        self.persist(snapshot).await;
        Ok(value)
    }

    async fn persist(&self, (version, items): (u64, Vec<SubAgentTaskQueueItem>)) {
        let Some(store) = &self.store else { return };
        let mut persisted = self.persisted.lock().await;
        if version <= *persisted {
            return;
        }
        let key = Self::store_key(self.orchestration_id);
        match put_json(store.as_ref(), &key, &items).await {
            Ok(()) => *persisted = version,
            Err(e) => warn!(
                orchestration_id = %self.orchestration_id,
                error = %e,
                "Failed to persist task queue"
            ),
        }
    }

    /// Add items; indices must be unique
    pub async fn enqueue(&self, new_items: Vec<SubAgentTaskQueueItem>) -> Result<(), QueueError> {
        self.mutate(|items| {
            items.extend(new_items);
            items.sort_by_key(|i| i.index);
            Ok(())
        })
        .await
    }

    pub async fn items(&self) -> Vec<SubAgentTaskQueueItem> {
        self.inner.lock().await.items.clone()
    }

    pub async fn get(&self, index: usize) -> Option<SubAgentTaskQueueItem> {
        self.inner
            .lock()
            .await
            .items
            .iter()
            .find(|i| i.index == index)
            .cloned()
    }

    /// Promote every pending item whose dependencies all completed
    ///
    /// Returns all items that are ready afterwards, in index order.
    pub async fn ready_items(&self) -> Vec<SubAgentTaskQueueItem> {
        self.mutate(|items| {
            let completed: Vec<usize> = items
                .iter()
                .filter(|i| i.status == QueueItemStatus::Completed)
                .map(|i| i.index)
                .collect();
            for item in items.iter_mut() {
                if item.status == QueueItemStatus::Pending
                    && item.dependencies.iter().all(|d| completed.contains(d))
                {
                    item.status = QueueItemStatus::Ready;
                }
            }
            Ok(items
                .iter()
                .filter(|i| i.status == QueueItemStatus::Ready)
                .cloned()
                .collect())
        })
        .await
        .unwrap_or_default()
    }

    /// Force a pending item to ready
    pub async fn mark_ready(&self, index: usize) -> Result<(), QueueError> {
        self.mutate(|items| {
            let item = find(items, index)?;
            expect_status(item, QueueItemStatus::Pending)?;
            item.status = QueueItemStatus::Ready;
            Ok(())
        })
        .await
    }

    /// Claim a ready item for execution
    ///
    /// Exactly one of any number of concurrent claims on the same item succeeds.
    pub async fn claim(
        &self,
        index: usize,
        agent_id: AgentId,
        task_id: TaskId,
    ) -> Result<SubAgentTaskQueueItem, QueueError> {
        let item = self
            .mutate(|items| {
                let item = find(items, index)?;
                match item.status {
                    QueueItemStatus::Ready => {}
                    QueueItemStatus::InProgress => return Err(QueueError::AlreadyClaimed { index }),
                    actual => {
                        return Err(QueueError::InvalidStatus {
                            index,
                            expected: QueueItemStatus::Ready,
                            actual,
                        });
                    }
                }
                item.status = QueueItemStatus::InProgress;
                item.agent_id = Some(agent_id);
                item.task_id = Some(task_id);
                item.started_at = Some(Utc::now());
                Ok(item.clone())
            })
            .await?;
        debug!(index, agent_id = %agent_id, "Queue item claimed");
        Ok(item)
    }

    pub async fn set_session(&self, index: usize, session_id: String) -> Result<(), QueueError> {
        self.mutate(|items| {
            find(items, index)?.session_id = Some(session_id);
            Ok(())
        })
        .await
    }

    /// Park a running item while its agent waits or the host restarts
    pub async fn mark_suspended(&self, index: usize) -> Result<(), QueueError> {
        self.mutate(|items| {
            let item = find(items, index)?;
            expect_status(item, QueueItemStatus::InProgress)?;
            item.status = QueueItemStatus::Suspended;
            Ok(())
        })
        .await
    }

    /// Continue a suspended item
    pub async fn mark_resumed(&self, index: usize) -> Result<(), QueueError> {
        self.mutate(|items| {
            let item = find(items, index)?;
            expect_status(item, QueueItemStatus::Suspended)?;
            item.status = QueueItemStatus::InProgress;
            Ok(())
        })
        .await
    }

    pub async fn mark_completed(&self, index: usize, result: String) -> Result<(), QueueError> {
        self.mutate(|items| {
            let item = find(items, index)?;
            expect_status(item, QueueItemStatus::InProgress)?;
            item.status = QueueItemStatus::Completed;
            item.result = Some(result);
            item.error = None;
            item.completed_at = Some(Utc::now());
            Ok(())
        })
        .await
    }

    /// Record a failure and decide whether it will be retried
    pub async fn mark_failed(
        &self,
        index: usize,
        failure: TaskFailure,
        policy: &RetryPolicy,
    ) -> Result<FailureOutcome, QueueError> {
        self.mutate(|items| {
            let item = find(items, index)?;
            if !matches!(
                item.status,
                QueueItemStatus::InProgress | QueueItemStatus::Suspended
            ) {
                return Err(QueueError::InvalidStatus {
                    index,
                    expected: QueueItemStatus::InProgress,
                    actual: item.status,
                });
            }
            item.status = QueueItemStatus::Failed;
            item.error = Some(failure.at_attempt(item.retry_count));
            item.completed_at = Some(Utc::now());

            if item.can_retry(policy) {
                item.retry_pending = true;
                Ok(FailureOutcome::RetryScheduled {
                    attempt: item.retry_count + 1,
                    delay: policy.delay(item.retry_count),
                })
            } else {
                item.retry_pending = false;
                Ok(FailureOutcome::Permanent)
            }
        })
        .await
    }

    pub async fn can_retry(&self, index: usize, policy: &RetryPolicy) -> bool {
        self.get(index)
            .await
            .is_some_and(|item| item.retry_pending || item.can_retry(policy))
    }

    /// Start the next attempt: bump `retry_count`, back to ready, clear the error
    pub async fn retry(&self, index: usize, policy: &RetryPolicy) -> Result<(), QueueError> {
        self.mutate(|items| {
            let item = find(items, index)?;
            if !(item.retry_pending || item.can_retry(policy)) {
                return Err(QueueError::RetryNotAllowed { index });
            }
            item.retry_count += 1;
            item.retry_pending = false;
            item.status = QueueItemStatus::Ready;
            item.error = None;
            item.agent_id = None;
            item.task_id = None;
            item.started_at = None;
            item.completed_at = None;
            Ok(())
        })
        .await
    }

    /// Fail every not-yet-started item that depends on a permanently failed one
    ///
    /// Walks in index order so chains cascade in a single pass. Returns the
    /// indices that were failed.
    pub async fn fail_blocked(&self) -> Vec<usize> {
        self.mutate(|items| {
            let mut failed = Vec::new();
            for i in 0..items.len() {
                let waiting = matches!(
                    items[i].status,
                    QueueItemStatus::Pending | QueueItemStatus::Ready
                );
                if !waiting {
                    continue;
                }
                let blocker = items[i].dependencies.iter().copied().find(|dep| {
                    items
                        .iter()
                        .any(|other| other.index == *dep && other.is_permanently_failed())
                });
                if let Some(dep) = blocker {
                    let item = &mut items[i];
                    item.status = QueueItemStatus::Failed;
                    item.retry_pending = false;
                    item.error = Some(
                        TaskFailure::new(
                            FailureKind::DependencyFailed,
                            format!("dependency {dep} failed"),
                        )
                        .at_attempt(item.retry_count),
                    );
                    item.completed_at = Some(Utc::now());
                    failed.push(item.index);
                }
            }
            Ok(failed)
        })
        .await
        .unwrap_or_default()
    }

    /// Fail everything that has not finished and is not running
    ///
    /// Running items are left to the caller, which must stop their agents first.
    pub async fn cancel_pending(&self, message: &str) -> Vec<usize> {
        self.mutate(|items| {
            let mut cancelled = Vec::new();
            for item in items.iter_mut() {
                let open = matches!(
                    item.status,
                    QueueItemStatus::Pending | QueueItemStatus::Ready | QueueItemStatus::Suspended
                ) || (item.status == QueueItemStatus::Failed && item.retry_pending);
                if open {
                    item.status = QueueItemStatus::Failed;
                    item.retry_pending = false;
                    item.error = Some(
                        TaskFailure::new(FailureKind::Cancelled, message)
                            .at_attempt(item.retry_count),
                    );
                    item.completed_at = Some(Utc::now());
                    cancelled.push(item.index);
                }
            }
            Ok(cancelled)
        })
        .await
        .unwrap_or_default()
    }

    /// Put a suspended or in-progress item back to ready without spending a retry
    pub async fn requeue(&self, index: usize) -> Result<(), QueueError> {
        self.mutate(|items| {
            let item = find(items, index)?;
            if !matches!(
                item.status,
                QueueItemStatus::InProgress | QueueItemStatus::Suspended
            ) {
                return Err(QueueError::InvalidStatus {
                    index,
                    expected: QueueItemStatus::Suspended,
                    actual: item.status,
                });
            }
            item.status = QueueItemStatus::Ready;
            item.agent_id = None;
            item.started_at = None;
            Ok(())
        })
        .await
    }

    /// Reset state left behind by a crash
    ///
    /// In-progress items lost their process and go back to ready; scheduled
    /// retries become ready immediately. Suspended items are left alone.
    pub async fn recover(&self) -> Vec<usize> {
        self.mutate(|items| {
            let mut reset = Vec::new();
            for item in items.iter_mut() {
                if item.status == QueueItemStatus::InProgress {
                    item.status = QueueItemStatus::Ready;
                    item.agent_id = None;
                    item.started_at = None;
                    reset.push(item.index);
                } else if item.status == QueueItemStatus::Failed && item.retry_pending {
                    item.retry_count += 1;
                    item.retry_pending = false;
                    item.status = QueueItemStatus::Ready;
                    item.error = None;
                    item.agent_id = None;
                    reset.push(item.index);
                }
            }
            Ok(reset)
        })
        .await
        .unwrap_or_default()
    }

    /// Every item completed or permanently failed
    pub async fn is_finished(&self) -> bool {
        self.inner
            .lock()
            .await
            .items
            .iter()
            .all(SubAgentTaskQueueItem::is_terminal)
    }

    /// Delete the persisted copy
    pub async fn forget(&self) -> Result<(), StoreError> {
        match &self.store {
            Some(store) => store.delete(&Self::store_key(self.orchestration_id)).await,
            None => Ok(()),
        }
    }
}

fn find(
    items: &mut [SubAgentTaskQueueItem],
    index: usize,
) -> Result<&mut SubAgentTaskQueueItem, QueueError> {
    items
        .iter_mut()
        .find(|i| i.index == index)
        .ok_or(QueueError::NotFound { index })
}

fn expect_status(
    item: &SubAgentTaskQueueItem,
    expected: QueueItemStatus,
) -> Result<(), QueueError> {
    if item.status == expected {
        Ok(())
    } else {
        Err(QueueError::InvalidStatus {
            index: item.index,
            expected,
            actual: item.status,
        })
    }
}
