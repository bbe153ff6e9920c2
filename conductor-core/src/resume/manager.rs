//! Persistence of resume contexts

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::context::{PendingInteraction, ResumeContext, SuspensionReason};
use crate::agent::{Agent, AgentId, AgentTask};
use crate::error::SuspensionError;
use crate::store::{KeyValueStore, get_json, put_json};

const KEY_PREFIX: &str = "resume/";

/// Writes, reads and deletes [`ResumeContext`]s, keyed by agent ID
///
/// Contexts are independent: any number may exist and they can be resumed in
/// any order.
pub struct SuspensionManager {
    store: Arc<dyn KeyValueStore>,
}

impl SuspensionManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn key(agent_id: AgentId) -> String {
        format!("{KEY_PREFIX}{agent_id}")
    }

    /// Capture and persist a resume context for the agent
    #[instrument(skip_all, fields(agent_id = %agent.id, reason = ?reason))]
    pub async fn suspend(
        &self,
        agent: &Agent,
        task: Option<&AgentTask>,
        reason: SuspensionReason,
        pending_interaction: Option<PendingInteraction>,
    ) -> Result<ResumeContext, SuspensionError> {
        let ctx = ResumeContext::capture(agent, task, reason, pending_interaction);
        put_json(self.store.as_ref(), &Self::key(agent.id), &ctx).await?;
        debug!("Resume context written");
        Ok(ctx)
    }

    /// Write an existing context back, e.g. one carried in a snapshot
    pub async fn store(&self, ctx: &ResumeContext) -> Result<(), SuspensionError> {
        put_json(self.store.as_ref(), &Self::key(ctx.agent_id), ctx).await?;
        Ok(())
    }

    pub async fn load(&self, agent_id: AgentId) -> Result<Option<ResumeContext>, SuspensionError> {
        Ok(get_json(self.store.as_ref(), &Self::key(agent_id)).await?)
    }

    /// Rebuild the agent and task from a stored context
    ///
    /// The context stays in the store; call [`SuspensionManager::discard`]
    /// once the agent has left its suspended state.
    pub async fn resume(
        &self,
        agent_id: AgentId,
    ) -> Result<(Agent, Option<AgentTask>, Option<PendingInteraction>), SuspensionError> {
        let ctx = self
            .load(agent_id)
            .await?
            .ok_or(SuspensionError::NotFound(agent_id))?;
        Ok(ctx.into_parts())
    }

    pub async fn discard(&self, agent_id: AgentId) -> Result<(), SuspensionError> {
        self.store.delete(&Self::key(agent_id)).await?;
        debug!(agent_id = %agent_id, "Resume context deleted");
        Ok(())
    }

    /// Every stored context; unreadable entries are skipped with a warning
    pub async fn list(&self) -> Result<Vec<ResumeContext>, SuspensionError> {
        let mut contexts = Vec::new();
        for key in self.store.keys(KEY_PREFIX).await? {
            match get_json::<ResumeContext>(self.store.as_ref(), &key).await {
                Ok(Some(ctx)) => contexts.push(ctx),
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable resume context"),
            }
        }
        contexts.sort_by_key(|c| c.agent_id);
        Ok(contexts)
    }
}
