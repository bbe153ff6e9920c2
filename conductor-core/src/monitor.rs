//! Resource monitor: pressure classification and agent reclaim

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use sysinfo::{ProcessesToUpdate, System};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::AgentId;
use crate::events::ConductorEvent;
use crate::lifecycle::{AgentLifecycleState, LifecycleEvent};
use crate::orchestration::OrchestrationEngine;
use crate::policy::{CleanupPolicy, ResourcePressure, classify};

/// Source of the memory figure fed into pressure classification
pub trait MemorySampler: Send + Sync {
    /// Resident memory in MiB
    fn sample_mb(&self) -> u64;
}

/// Resident memory of this process plus its direct children (the CLI subprocesses)
pub struct SysinfoSampler {
    system: StdMutex<System>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: StdMutex::new(System::new()),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SysinfoSampler {
    fn sample_mb(&self) -> u64 {
        let Ok(pid) = sysinfo::get_current_pid() else {
            return 0;
        };
        let Ok(mut system) = self.system.lock() else {
            return 0;
        };
        system.refresh_processes(ProcessesToUpdate::All, true);
        let bytes: u64 = system
            .processes()
            .values()
            .filter(|p| p.pid() == pid || p.parent() == Some(pid))
            .map(sysinfo::Process::memory)
            .sum();
        bytes / (1024 * 1024)
    }
}

/// What one [`ResourceMonitor::tick`] saw and did
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorReport {
    pub pressure: ResourcePressure,
    pub active_agents: usize,
    pub active_processes: usize,
    pub memory_mb: u64,
    /// Cleanup events that were accepted
    pub reclaimed: Vec<(AgentId, LifecycleEvent)>,
    /// Destroyed agents dropped from the state machine
    pub purged: usize,
    /// Finished runs past their retention
    pub pruned_runs: usize,
}

/// Periodically grades resource pressure and reclaims idle agents
pub struct ResourceMonitor {
    engine: Arc<OrchestrationEngine>,
    sampler: Box<dyn MemorySampler>,
    interval: Duration,
    pressure: Mutex<ResourcePressure>,
}

impl ResourceMonitor {
    pub fn new(engine: Arc<OrchestrationEngine>, sampler: impl MemorySampler + 'static) -> Self {
        let interval = engine.config().monitor.interval;
        Self {
            engine,
            sampler: Box::new(sampler),
            interval,
            pressure: Mutex::new(ResourcePressure::Normal),
        }
    }

    pub async fn pressure(&self) -> ResourcePressure {
        *self.pressure.lock().await
    }

    /// Sample, classify, and apply cleanup to every candidate agent
    pub async fn tick(&self) -> MonitorReport {
        let policy = &self.engine.config().cleanup;
        let agents = self.engine.lifecycle().snapshot().await;
        let active_agents = agents.iter().filter(|(_, s, _)| s.is_active()).count();
        let active_processes = self.engine.processes().active_count().await;
        let memory_mb = self.sampler.sample_mb();
        let pressure = classify(active_agents, active_processes, memory_mb, policy);

        let changed = {
            let mut current = self.pressure.lock().await;
            let from = *current;
            *current = pressure;
            (from != pressure).then_some(from)
        };
        if let Some(from) = changed {
            if pressure > from {
                warn!(%from, to = %pressure, active_agents, active_processes, memory_mb, "Resource pressure rising");
            } else {
                info!(%from, to = %pressure, "Resource pressure easing");
            }
            self.engine
                .events()
                .publish(ConductorEvent::PressureChanged { from, to: pressure })
                .await;
        }

        let mut reclaimed = Vec::new();
        for (agent_id, state, age) in agents {
            let Some(event) = cleanup_event(state, age, pressure, policy) else {
                continue;
            };
            if let Some(outcome) = self.engine.reclaim(agent_id, event).await {
                debug!(agent_id = %agent_id, event = %event, to = %outcome.to, "Agent reclaimed");
                reclaimed.push((agent_id, event));
            }
        }
        let purged = self.engine.lifecycle().purge_destroyed().await;
        let pruned_runs = self.engine.prune_finished().await.len();

        MonitorReport {
            pressure,
            active_agents,
            active_processes,
            memory_mb,
            reclaimed,
            purged,
            pruned_runs,
        }
    }

    /// Tick every interval until `shutdown` fires
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Resource monitor received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = self.tick().await;
                        if !report.reclaimed.is_empty() || report.pruned_runs > 0 {
                            info!(
                                pressure = %report.pressure,
                                reclaimed = report.reclaimed.len(),
                                purged = report.purged,
                                pruned_runs = report.pruned_runs,
                                "Cleanup pass"
                            );
                        }
                    }
                }
            }
        })
    }
}

/// Event to apply to an agent in `state` for `age`, if any
///
/// Critical pressure reclaims every candidate; high pressure evicts the pool;
/// otherwise agents are reclaimed by age.
fn cleanup_event(
    state: AgentLifecycleState,
    age: Duration,
    pressure: ResourcePressure,
    policy: &CleanupPolicy,
) -> Option<LifecycleEvent> {
    use AgentLifecycleState as S;

    if !state.is_cleanup_candidate() {
        return None;
    }
    if pressure == ResourcePressure::Critical {
        return Some(LifecycleEvent::CleanupTriggered);
    }
    match state {
        S::Pooled if pressure >= ResourcePressure::High => Some(LifecycleEvent::PoolEviction),
        S::Idle if age >= policy.idle_agent_timeout => Some(LifecycleEvent::IdleTimeout),
        S::Completed if age >= policy.completed_team_cleanup => Some(LifecycleEvent::ReturnToPool),
        S::Error if age >= policy.failed_team_cleanup => Some(LifecycleEvent::CleanupTriggered),
        S::Pooled | S::SuspendedIdle if age >= policy.idle_team_cleanup => {
            Some(LifecycleEvent::IdleTimeout)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConductorConfig;
    use crate::events::{EventBus, MemoryEventBus};
    use crate::lifecycle::AgentLifecycleContext;
    use crate::orchestration::{DECOMPOSITION_MARKER, OrchestrationPhase};
    use crate::process::{MockProcessManager, MockRun};
    use crate::store::MemoryStore;

    struct FixedSampler(u64);

    impl MemorySampler for FixedSampler {
        fn sample_mb(&self) -> u64 {
            self.0
        }
    }

    fn engine() -> (Arc<OrchestrationEngine>, Arc<MemoryEventBus>) {
        let events = Arc::new(MemoryEventBus::new(256));
        let engine = OrchestrationEngine::new(
            ConductorConfig::default(),
            Arc::new(MockProcessManager::new()),
            Arc::new(MemoryStore::new()),
            Arc::clone(&events) as Arc<dyn EventBus>,
        );
        (Arc::new(engine), events)
    }

    async fn agent_in(engine: &OrchestrationEngine, events: &[LifecycleEvent]) -> AgentId {
        let id = AgentId::new();
        let lifecycle = engine.lifecycle();
        lifecycle.create(id).await.unwrap();
        let ctx = AgentLifecycleContext {
            pool_capacity: 4,
            ..Default::default()
        };
        for event in events {
            lifecycle.transition(id, *event, &ctx).await.unwrap();
        }
        id
    }

    fn pressure_changes(events: &[(u64, ConductorEvent)]) -> usize {
        events
            .iter()
            .filter(|(_, e)| matches!(e, ConductorEvent::PressureChanged { .. }))
            .count()
    }

    #[test]
    fn active_agents_are_never_cleanup_targets() {
        let policy = CleanupPolicy::default();
        let old = Duration::from_secs(24 * 60 * 60);
        for state in [
            AgentLifecycleState::Working,
            AgentLifecycleState::WaitingForAnswer,
            AgentLifecycleState::Suspended,
        ] {
            assert_eq!(
                cleanup_event(state, old, ResourcePressure::Critical, &policy),
                None
            );
        }
    }

    #[test]
    fn age_thresholds_pick_the_event() {
        let policy = CleanupPolicy::default();
        let minutes = |m: u64| Duration::from_secs(m * 60);
        let normal = ResourcePressure::Normal;

        assert_eq!(cleanup_event(AgentLifecycleState::Idle, minutes(4), normal, &policy), None);
        assert_eq!(
            cleanup_event(AgentLifecycleState::Idle, minutes(5), normal, &policy),
            Some(LifecycleEvent::IdleTimeout)
        );
        assert_eq!(
            cleanup_event(AgentLifecycleState::Completed, minutes(6), normal, &policy),
            Some(LifecycleEvent::ReturnToPool)
        );
        assert_eq!(cleanup_event(AgentLifecycleState::Error, minutes(6), normal, &policy), None);
        assert_eq!(
            cleanup_event(AgentLifecycleState::Error, minutes(10), normal, &policy),
            Some(LifecycleEvent::CleanupTriggered)
        );
        assert_eq!(cleanup_event(AgentLifecycleState::Pooled, minutes(29), normal, &policy), None);
        assert_eq!(
            cleanup_event(AgentLifecycleState::Pooled, minutes(1), ResourcePressure::High, &policy),
            Some(LifecycleEvent::PoolEviction)
        );
    }

    #[test]
    fn sysinfo_sampler_sees_this_process() {
        assert!(SysinfoSampler::new().sample_mb() > 0);
    }

    #[tokio::test]
    async fn pressure_change_is_published_once() {
        let (engine, events) = engine();
        let monitor = ResourceMonitor::new(Arc::clone(&engine), FixedSampler(5000));

        let report = monitor.tick().await;
        assert_eq!(report.pressure, ResourcePressure::Critical);
        monitor.tick().await;

        assert_eq!(pressure_changes(&events.events_from(0).await), 1);
        assert_eq!(monitor.pressure().await, ResourcePressure::Critical);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_agent_returns_to_pool_after_timeout() {
        let (engine, _) = engine();
        let id = agent_in(&engine, &[LifecycleEvent::ResourcesLoaded]).await;
        let monitor = ResourceMonitor::new(Arc::clone(&engine), FixedSampler(0));

        assert!(monitor.tick().await.reclaimed.is_empty());

        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        let report = monitor.tick().await;
        assert_eq!(report.reclaimed, vec![(id, LifecycleEvent::IdleTimeout)]);
        assert_eq!(
            engine.lifecycle().state(id).await,
            Some(AgentLifecycleState::Pooled)
        );
    }

    #[tokio::test]
    async fn high_pressure_evicts_and_purges_pooled_agents() {
        let (engine, _) = engine();
        let id = agent_in(
            &engine,
            &[LifecycleEvent::ResourcesLoaded, LifecycleEvent::IdleTimeout],
        )
        .await;
        assert_eq!(
            engine.lifecycle().state(id).await,
            Some(AgentLifecycleState::Pooled)
        );

        // 3500 of 4096 MiB is above the 75% mark
        let monitor = ResourceMonitor::new(Arc::clone(&engine), FixedSampler(3500));
        let report = monitor.tick().await;

        assert_eq!(report.pressure, ResourcePressure::High);
        assert_eq!(report.reclaimed, vec![(id, LifecycleEvent::PoolEviction)]);
        assert_eq!(report.purged, 1);
        assert_eq!(engine.lifecycle().state(id).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_runs_are_pruned_after_retention() {
        let mock = Arc::new(MockProcessManager::new());
        mock.script(
            DECOMPOSITION_MARKER,
            vec![
                MockRun::success(
                    serde_json::json!({"subtasks": [{"title": "One", "prompt": "one job"}]})
                        .to_string(),
                ),
                MockRun::success("not a decomposition"),
            ],
        );
        let engine = Arc::new(OrchestrationEngine::new(
            ConductorConfig::default(),
            Arc::clone(&mock) as Arc<dyn crate::process::CliProcessManager>,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryEventBus::new(256)),
        ));
        let done = engine.run("first", AgentId::new()).await.unwrap();
        let failed = engine.run("second", AgentId::new()).await.unwrap();
        assert_eq!(done.phase, OrchestrationPhase::Completed);
        assert_eq!(failed.phase, OrchestrationPhase::Failed);

        let monitor = ResourceMonitor::new(Arc::clone(&engine), FixedSampler(0));
        assert_eq!(monitor.tick().await.pruned_runs, 0);

        // Completed runs go after 5 minutes, failed ones after 10
        tokio::time::advance(Duration::from_secs(6 * 60)).await;
        assert_eq!(monitor.tick().await.pruned_runs, 1);
        assert!(engine.state(done.id).await.is_none());
        assert!(engine.state(failed.id).await.is_some());

        tokio::time::advance(Duration::from_secs(24 * 60 * 60)).await;
        assert_eq!(monitor.tick().await.pruned_runs, 1);
        assert!(engine.states().await.is_empty());
        assert!(engine.snapshot().await.orchestrations.is_empty());
    }
}
