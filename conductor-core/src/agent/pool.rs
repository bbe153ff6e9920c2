//! Bounded pool of reusable agents

use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::Mutex;
use tracing::debug;

use super::types::{Agent, AgentId, AgentTask};

struct PoolInner {
    agents: HashMap<AgentId, Agent>,
    tasks: HashMap<AgentId, AgentTask>,
    /// Agents free to take work, oldest release first
    available: VecDeque<AgentId>,
    busy: HashSet<AgentId>,
}

/// Registry of live agents with a cap on how many may exist at once
///
/// Lifecycle states live in the state machine; the pool only tracks identity,
/// current task, and which agents are free to hand out.
pub struct AgentPool {
    inner: Mutex<PoolInner>,
    max_agents: usize,
}

/// An agent handed out by [`AgentPool::acquire`]
#[derive(Debug, Clone)]
pub struct Acquired {
    pub agent: Agent,
    /// Newly created rather than reused
    pub fresh: bool,
}

impl AgentPool {
    pub fn new(max_agents: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                agents: HashMap::new(),
                tasks: HashMap::new(),
                available: VecDeque::new(),
                busy: HashSet::new(),
            }),
            max_agents,
        }
    }

    /// Reuse a free agent, or create one with `create` if under the cap
    ///
    /// Returns `None` when every slot is taken; the caller waits for a release.
    pub async fn acquire(&self, create: impl FnOnce() -> Agent) -> Option<Acquired> {
        let mut inner = self.inner.lock().await;

        if let Some(id) = inner.available.pop_front()
            && let Some(agent) = inner.agents.get(&id).cloned()
        {
            inner.busy.insert(id);
            debug!(agent_id = %id, "Reusing pooled agent");
            return Some(Acquired {
                agent,
                fresh: false,
            });
        }

        if inner.agents.len() >= self.max_agents {
            return None;
        }

        let agent = create();
        inner.busy.insert(agent.id);
        inner.agents.insert(agent.id, agent.clone());
        Some(Acquired { agent, fresh: true })
    }

    /// Mark an agent free for the next task and drop its task
    pub async fn release(&self, agent_id: AgentId) {
        let mut inner = self.inner.lock().await;
        if !inner.agents.contains_key(&agent_id) {
            return;
        }
        inner.busy.remove(&agent_id);
        inner.tasks.remove(&agent_id);
        if !inner.available.contains(&agent_id) {
            inner.available.push_back(agent_id);
        }
    }

    /// Forget an agent entirely, freeing its slot
    pub async fn remove(&self, agent_id: AgentId) -> Option<Agent> {
        let mut inner = self.inner.lock().await;
        inner.busy.remove(&agent_id);
        inner.tasks.remove(&agent_id);
        inner.available.retain(|id| *id != agent_id);
        inner.agents.remove(&agent_id)
    }

    /// Register an agent rebuilt from persisted state
    ///
    /// It counts as busy until released; the cap is not enforced so that a
    /// restore never drops work.
    pub async fn insert(&self, agent: Agent, task: Option<AgentTask>) {
        let mut inner = self.inner.lock().await;
        let id = agent.id;
        inner.available.retain(|a| *a != id);
        inner.busy.insert(id);
        inner.agents.insert(id, agent);
        match task {
            Some(task) => {
                inner.tasks.insert(id, task);
            }
            None => {
                inner.tasks.remove(&id);
            }
        }
    }

    pub async fn get(&self, agent_id: AgentId) -> Option<Agent> {
        self.inner.lock().await.agents.get(&agent_id).cloned()
    }

    /// Apply `f` to the stored agent
    pub async fn update(&self, agent_id: AgentId, f: impl FnOnce(&mut Agent)) {
        if let Some(agent) = self.inner.lock().await.agents.get_mut(&agent_id) {
            f(agent);
        }
    }

    pub async fn set_task(&self, agent_id: AgentId, task: AgentTask) {
        self.inner.lock().await.tasks.insert(agent_id, task);
    }

    pub async fn task(&self, agent_id: AgentId) -> Option<AgentTask> {
        self.inner.lock().await.tasks.get(&agent_id).cloned()
    }

    /// Apply `f` to the agent's current task
    pub async fn update_task(&self, agent_id: AgentId, f: impl FnOnce(&mut AgentTask)) {
        if let Some(task) = self.inner.lock().await.tasks.get_mut(&agent_id) {
            f(task);
        }
    }

    /// Every agent with its current task, ordered by ID
    pub async fn agents(&self) -> Vec<(Agent, Option<AgentTask>)> {
        let inner = self.inner.lock().await;
        let mut agents: Vec<_> = inner
            .agents
            .values()
            .map(|a| (a.clone(), inner.tasks.get(&a.id).cloned()))
            .collect();
        agents.sort_by_key(|(a, _)| a.id);
        agents
    }

    pub async fn is_busy(&self, agent_id: AgentId) -> bool {
        self.inner.lock().await.busy.contains(&agent_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.agents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn available_count(&self) -> usize {
        self.inner.lock().await.available.len()
    }

    pub fn capacity(&self) -> usize {
        self.max_agents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> Agent {
        Agent::new("worker", "sonnet")
    }

    #[tokio::test]
    async fn acquire_respects_cap() {
        let pool = AgentPool::new(2);
        assert!(pool.acquire(worker).await.unwrap().fresh);
        assert!(pool.acquire(worker).await.unwrap().fresh);
        assert!(pool.acquire(worker).await.is_none());
        assert_eq!(pool.len().await, 2);
    }

    #[tokio::test]
    async fn released_agent_is_reused() {
        let pool = AgentPool::new(1);
        let first = pool.acquire(worker).await.unwrap();
        pool.set_task(first.agent.id, AgentTask::new("t", "p")).await;
        pool.release(first.agent.id).await;
        assert!(pool.task(first.agent.id).await.is_none());

        let again = pool.acquire(worker).await.unwrap();
        assert!(!again.fresh);
        assert_eq!(again.agent.id, first.agent.id);
        assert!(pool.is_busy(first.agent.id).await);
    }

    #[tokio::test]
    async fn remove_frees_a_slot() {
        let pool = AgentPool::new(1);
        let a = pool.acquire(worker).await.unwrap();
        assert!(pool.acquire(worker).await.is_none());
        pool.remove(a.agent.id).await;
        assert!(pool.acquire(worker).await.unwrap().fresh);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let pool = AgentPool::new(2);
        let a = pool.acquire(worker).await.unwrap();
        pool.release(a.agent.id).await;
        pool.release(a.agent.id).await;
        assert_eq!(pool.available_count().await, 1);
    }

    #[tokio::test]
    async fn insert_restores_agent_and_task() {
        let pool = AgentPool::new(1);
        let agent = worker();
        let task = AgentTask::new("t", "p");
        pool.insert(agent.clone(), Some(task.clone())).await;

        assert_eq!(pool.get(agent.id).await, Some(agent.clone()));
        assert_eq!(pool.task(agent.id).await, Some(task));
        assert!(pool.is_busy(agent.id).await);
        assert!(pool.acquire(worker).await.is_none());
    }

    #[tokio::test]
    async fn update_changes_stored_agent() {
        let pool = AgentPool::new(1);
        let a = pool.acquire(worker).await.unwrap();
        pool.update(a.agent.id, |agent| agent.session_id = Some("s-1".into()))
            .await;
        assert_eq!(
            pool.get(a.agent.id).await.unwrap().session_id.as_deref(),
            Some("s-1")
        );
    }
}
