//! Whole-engine snapshots for save/restore across restarts

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::traits::{KeyValueStore, get_json, put_json};
use crate::agent::{Agent, AgentTask};
use crate::error::StoreError;
use crate::lifecycle::AgentLifecycleState;
use crate::orchestration::OrchestrationState;
use crate::resume::ResumeContext;

const SNAPSHOT_KEY: &str = "snapshot/latest";

/// Version of the running library, stamped into every snapshot
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One agent with the state it was in when the snapshot was taken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent: Agent,
    pub state: AgentLifecycleState,
    /// Task the agent was working on, if any
    #[serde(default)]
    pub task: Option<AgentTask>,
}

/// Everything needed to rebuild suspended work after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub app_version: String,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub agents: Vec<AgentRecord>,
    #[serde(default)]
    pub orchestrations: Vec<OrchestrationState>,
    #[serde(default)]
    pub resume_contexts: Vec<ResumeContext>,
}

impl PersistedSnapshot {
    pub fn new() -> Self {
        Self {
            app_version: APP_VERSION.to_string(),
            saved_at: Utc::now(),
            agents: Vec::new(),
            orchestrations: Vec::new(),
            resume_contexts: Vec::new(),
        }
    }

    pub fn is_current_version(&self) -> bool {
        self.app_version == APP_VERSION
    }
}

impl Default for PersistedSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads and writes the latest snapshot
#[derive(Clone)]
pub struct SnapshotStore {
    store: Arc<dyn KeyValueStore>,
}

impl SnapshotStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn save(&self, snapshot: &PersistedSnapshot) -> Result<(), StoreError> {
        put_json(self.store.as_ref(), SNAPSHOT_KEY, snapshot).await?;
        debug!(
            agents = snapshot.agents.len(),
            orchestrations = snapshot.orchestrations.len(),
            resume_contexts = snapshot.resume_contexts.len(),
            "Snapshot saved"
        );
        Ok(())
    }

    /// Latest snapshot; a version mismatch is logged but still returned
    pub async fn load(&self) -> Result<Option<PersistedSnapshot>, StoreError> {
        let snapshot: Option<PersistedSnapshot> =
            get_json(self.store.as_ref(), SNAPSHOT_KEY).await?;
        if let Some(ref s) = snapshot
            && !s.is_current_version()
        {
            warn!(
                saved = %s.app_version,
                running = APP_VERSION,
                "Snapshot was written by a different version"
            );
        }
        Ok(snapshot)
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.delete(SNAPSHOT_KEY).await
    }
}

/// Anything that can describe its durable state as a snapshot
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self) -> PersistedSnapshot;
}

/// Periodically flushes a [`SnapshotSource`] to a [`SnapshotStore`]
pub struct SnapshotScheduler {
    source: Arc<dyn SnapshotSource>,
    store: SnapshotStore,
    interval: Duration,
}

impl SnapshotScheduler {
    pub fn new(source: Arc<dyn SnapshotSource>, store: SnapshotStore, interval: Duration) -> Self {
        Self {
            source,
            store,
            interval,
        }
    }

    /// Take and save one snapshot now
    pub async fn flush(&self) -> Result<(), StoreError> {
        let snapshot = self.source.snapshot().await;
        self.store.save(&snapshot).await
    }

    /// Flush every interval until `shutdown` fires, then flush once more
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Snapshot scheduler received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.flush().await {
                            error!(error = %e, "Periodic snapshot failed");
                        }
                    }
                }
            }

            if let Err(e) = self.flush().await {
                error!(error = %e, "Final snapshot failed");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::store::MemoryStore;

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SnapshotSource for CountingSource {
        async fn snapshot(&self) -> PersistedSnapshot {
            self.calls.fetch_add(1, Ordering::SeqCst);
            PersistedSnapshot::new()
        }
    }

    #[tokio::test]
    async fn save_then_load() {
        let store = SnapshotStore::new(Arc::new(MemoryStore::new()));
        assert!(store.load().await.unwrap().is_none());

        let mut snapshot = PersistedSnapshot::new();
        snapshot.agents.push(AgentRecord {
            agent: Agent::new("a", "sonnet"),
            state: AgentLifecycleState::Suspended,
            task: None,
        });
        store.save(&snapshot).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn older_version_still_loads() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let json = r#"{"app_version":"0.0.1","saved_at":"2025-01-01T00:00:00Z"}"#;
        kv.put(SNAPSHOT_KEY, json.as_bytes().to_vec()).await.unwrap();

        let loaded = SnapshotStore::new(kv).load().await.unwrap().unwrap();
        assert!(!loaded.is_current_version());
        assert!(loaded.agents.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_flushes_on_interval_and_shutdown() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let store = SnapshotStore::new(Arc::new(MemoryStore::new()));
        let scheduler =
            SnapshotScheduler::new(source.clone(), store.clone(), Duration::from_secs(60));
        let shutdown = CancellationToken::new();
        let handle = scheduler.spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert!(store.load().await.unwrap().is_some());
    }
}
