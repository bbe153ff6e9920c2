//! End-to-end orchestration runs against scripted CLI processes
//!
//! These tests drive the public engine API only:
//! - Retries, dependency failure and partial synthesis
//! - Wave ordering as seen on the event bus
//! - Model synthesis and its fallback
//! - Hung processes timing out, and dependency graphs that are not DAGs

use std::sync::Arc;

use serde_json::json;

use conductor_core::error::FailureKind;
use conductor_core::orchestration::{DECOMPOSITION_MARKER, SYNTHESIS_MARKER};
use conductor_core::process::{MockProcessManager, MockRun};
use conductor_core::{
    AgentId, AgentLifecycleState, CliProcessManager, ConductorConfig, ConductorEvent, EventBus,
    LifecycleEvent, MemoryEventBus, MemoryStore, OrchestrationEngine, OrchestrationPhase,
    SubTaskStatus,
};

fn create_engine(
    mock: &Arc<MockProcessManager>,
    config: ConductorConfig,
) -> (OrchestrationEngine, Arc<MemoryEventBus>) {
    let events = Arc::new(MemoryEventBus::new(4096));
    let engine = OrchestrationEngine::new(
        config,
        Arc::clone(mock) as Arc<dyn CliProcessManager>,
        Arc::new(MemoryStore::new()),
        Arc::clone(&events) as Arc<dyn EventBus>,
    );
    (engine, events)
}

fn decomposition(subtasks: serde_json::Value) -> MockRun {
    MockRun::success(json!({ "subtasks": subtasks }).to_string())
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_dependents_and_keep_other_results() {
    let mock = Arc::new(MockProcessManager::new());
    mock.script(
        DECOMPOSITION_MARKER,
        vec![decomposition(json!([
            {"title": "A", "prompt": "migrate the database"},
            {"title": "B", "prompt": "update the docs"},
            {"title": "C", "prompt": "backfill records", "dependencies": [0, 1]}
        ]))],
    );
    mock.script("migrate the database", vec![MockRun::failure("lock timeout")]);
    mock.script("update the docs", vec![MockRun::success("docs updated")]);

    let mut config = ConductorConfig::default();
    config.retry.max_retries = 2;
    let (engine, _) = create_engine(&mock, config);

    let state = engine.run("ship the migration", AgentId::new()).await.unwrap();

    // One initial attempt plus two retries
    assert_eq!(mock.spawns_matching("migrate the database").len(), 3);
    assert!(mock.spawns_matching("backfill records").is_empty());

    assert_eq!(state.phase, OrchestrationPhase::Completed);
    let a = state.subtask(0).unwrap();
    assert_eq!(a.status, SubTaskStatus::Failed);
    assert_eq!(a.error.as_ref().unwrap().kind, FailureKind::Subprocess);
    assert_eq!(a.error.as_ref().unwrap().attempt, 2);

    let c = state.subtask(2).unwrap();
    assert_eq!(c.status, SubTaskStatus::Failed);
    assert_eq!(c.error.as_ref().unwrap().kind, FailureKind::DependencyFailed);

    let synthesis = state.synthesis_result.unwrap();
    assert!(synthesis.contains("## B\n\ndocs updated"));
    assert!(synthesis.contains("- A: Subprocess: lock timeout"));
    assert!(synthesis.contains("- C: DependencyFailed: dependency 0 failed"));
}

#[tokio::test(start_paused = true)]
async fn a_flaky_subtask_recovers_on_retry() {
    let mock = Arc::new(MockProcessManager::new());
    mock.script(
        DECOMPOSITION_MARKER,
        vec![decomposition(json!([{"title": "Build", "prompt": "compile it"}]))],
    );
    mock.script(
        "compile it",
        vec![MockRun::crash(), MockRun::success("binary ready")],
    );

    let (engine, _) = create_engine(&mock, ConductorConfig::default());
    let state = engine.run("build", AgentId::new()).await.unwrap();

    assert_eq!(state.phase, OrchestrationPhase::Completed);
    assert_eq!(state.subtask(0).unwrap().result.as_deref(), Some("binary ready"));
    assert_eq!(mock.spawns_matching("compile it").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn run_fails_when_every_subtask_fails() {
    let mock = Arc::new(MockProcessManager::new());
    mock.script(
        DECOMPOSITION_MARKER,
        vec![decomposition(json!([
            {"title": "X", "prompt": "first attempt"},
            {"title": "Y", "prompt": "second attempt"}
        ]))],
    );
    mock.set_default(MockRun::failure("nope"));

    let mut config = ConductorConfig::default();
    config.retry.max_retries = 0;
    let (engine, _) = create_engine(&mock, config);

    let state = engine.run("impossible", AgentId::new()).await.unwrap();

    assert_eq!(state.phase, OrchestrationPhase::Failed);
    assert!(state.error.is_some());
    assert!(state.synthesis_result.unwrap().contains("## Failed sub-tasks"));
    assert!(state.completed_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn waves_start_in_order_and_phases_progress() {
    let mock = Arc::new(MockProcessManager::new());
    mock.script(
        DECOMPOSITION_MARKER,
        vec![decomposition(json!([
            {"title": "Plan", "prompt": "plan work"},
            {"title": "Do", "prompt": "do work", "dependencies": [0]},
            {"title": "Check", "prompt": "check work", "dependencies": [1]},
            {"title": "Notes", "prompt": "write notes"}
        ]))],
    );

    let (engine, events) = create_engine(&mock, ConductorConfig::default());
    let state = engine.run("pipeline", AgentId::new()).await.unwrap();
    assert_eq!(state.phase, OrchestrationPhase::Completed);
    assert_eq!(state.current_wave, 2);

    let log = events.events_from(0).await;
    let waves: Vec<usize> = log
        .iter()
        .filter_map(|(_, e)| match e {
            ConductorEvent::WaveStarted { wave, .. } => Some(*wave),
            _ => None,
        })
        .collect();
    assert_eq!(waves, vec![0, 1, 2]);

    let phases: Vec<OrchestrationPhase> = log
        .iter()
        .filter_map(|(_, e)| match e {
            ConductorEvent::OrchestrationPhaseChanged { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            OrchestrationPhase::Decomposing,
            OrchestrationPhase::Executing,
            OrchestrationPhase::Synthesizing,
            OrchestrationPhase::Completed,
        ]
    );

    // Wave 1 work never started before wave 0 finished
    let prompts: Vec<String> = mock.spawns().into_iter().map(|r| r.prompt).collect();
    let position = |needle: &str| prompts.iter().position(|p| p.contains(needle)).unwrap();
    assert!(position("plan work") < position("do work"));
    assert!(position("write notes") < position("do work"));
    assert!(position("do work") < position("check work"));
}

#[tokio::test(start_paused = true)]
async fn model_synthesis_replaces_aggregation() {
    let mock = Arc::new(MockProcessManager::new());
    mock.script(
        DECOMPOSITION_MARKER,
        vec![decomposition(json!([
            {"title": "Left", "prompt": "left half"},
            {"title": "Right", "prompt": "right half"}
        ]))],
    );
    mock.script(SYNTHESIS_MARKER, vec![MockRun::success("one merged answer")]);

    let mut config = ConductorConfig::default();
    config.orchestration.synthesize_with_model = true;
    let (engine, _) = create_engine(&mock, config);

    let state = engine.run("split and merge", AgentId::new()).await.unwrap();

    assert_eq!(state.synthesis_result.as_deref(), Some("one merged answer"));
    let request = &mock.spawns_matching(SYNTHESIS_MARKER)[0];
    assert!(request.prompt.contains("split and merge"));
}

#[tokio::test(start_paused = true)]
async fn failed_model_synthesis_falls_back_to_aggregation() {
    let mock = Arc::new(MockProcessManager::new());
    mock.script(
        DECOMPOSITION_MARKER,
        vec![decomposition(json!([{"title": "Only", "prompt": "single job"}]))],
    );
    mock.script("single job", vec![MockRun::success("job output")]);
    mock.script(SYNTHESIS_MARKER, vec![MockRun::failure("model unavailable")]);

    let mut config = ConductorConfig::default();
    config.orchestration.synthesize_with_model = true;
    let (engine, _) = create_engine(&mock, config);

    let state = engine.run("one job", AgentId::new()).await.unwrap();

    assert_eq!(state.phase, OrchestrationPhase::Completed);
    assert_eq!(state.synthesis_result.as_deref(), Some("## Only\n\njob output"));
}

#[tokio::test(start_paused = true)]
async fn hung_process_times_out_and_is_retried() {
    let mock = Arc::new(MockProcessManager::new());
    mock.script(
        DECOMPOSITION_MARKER,
        vec![decomposition(json!([{"title": "Fetch", "prompt": "fetch the data"}]))],
    );
    mock.script(
        "fetch the data",
        vec![MockRun::hang(), MockRun::success("data fetched")],
    );

    let mut config = ConductorConfig::default();
    config.cleanup.process_hang_timeout_seconds = 30;
    let (engine, events) = create_engine(&mock, config);

    let state = engine.run("get data", AgentId::new()).await.unwrap();

    assert_eq!(state.phase, OrchestrationPhase::Completed);
    let fetch = state.subtask(0).unwrap();
    assert_eq!(fetch.result.as_deref(), Some("data fetched"));
    assert_eq!(mock.spawns_matching("fetch the data").len(), 2);

    // The hung attempt was killed rather than left running
    assert_eq!(mock.terminations().len(), 1);
    let timeouts: Vec<_> = events
        .events_from(0)
        .await
        .into_iter()
        .filter_map(|(_, e)| match e {
            ConductorEvent::AgentStateChanged {
                event: LifecycleEvent::Timeout,
                to,
                ..
            } => Some(to),
            _ => None,
        })
        .collect();
    assert_eq!(timeouts, vec![AgentLifecycleState::Error]);
}

#[tokio::test(start_paused = true)]
async fn timeout_failure_is_recorded_when_retries_run_out() {
    let mock = Arc::new(MockProcessManager::new());
    mock.script(
        DECOMPOSITION_MARKER,
        vec![decomposition(json!([{"title": "Stuck", "prompt": "stuck job"}]))],
    );
    mock.script("stuck job", vec![MockRun::hang()]);

    let mut config = ConductorConfig::default();
    config.cleanup.process_hang_timeout_seconds = 30;
    config.retry.max_retries = 0;
    let (engine, _) = create_engine(&mock, config);

    let state = engine.run("wait forever", AgentId::new()).await.unwrap();

    assert_eq!(state.phase, OrchestrationPhase::Failed);
    let error = state.subtask(0).unwrap().error.clone().unwrap();
    assert_eq!(error.kind, FailureKind::Timeout);
    assert!(error.message.contains("30s"));
}

#[tokio::test(start_paused = true)]
async fn forward_dependency_fails_the_run_before_any_subtask() {
    let mock = Arc::new(MockProcessManager::new());
    mock.script(
        DECOMPOSITION_MARKER,
        vec![decomposition(json!([
            {"title": "First", "prompt": "first job", "dependencies": [1]},
            {"title": "Second", "prompt": "second job"}
        ]))],
    );

    let (engine, _) = create_engine(&mock, ConductorConfig::default());
    let state = engine.run("tangled", AgentId::new()).await.unwrap();

    assert_eq!(state.phase, OrchestrationPhase::Failed);
    assert!(
        state
            .error
            .unwrap()
            .contains("Subtask 0 depends on later subtask 1")
    );
    assert_eq!(mock.spawns().len(), 1);
    assert!(mock.spawns_matching("first job").is_empty());
    assert!(mock.spawns_matching("second job").is_empty());
}

#[tokio::test(start_paused = true)]
async fn self_dependency_fails_the_run() {
    let mock = Arc::new(MockProcessManager::new());
    mock.script(
        DECOMPOSITION_MARKER,
        vec![decomposition(json!([
            {"title": "Loop", "prompt": "loop job", "dependencies": [0]}
        ]))],
    );

    let (engine, _) = create_engine(&mock, ConductorConfig::default());
    let state = engine.run("circular", AgentId::new()).await.unwrap();

    assert_eq!(state.phase, OrchestrationPhase::Failed);
    assert!(state.error.unwrap().contains("depends on itself"));
    assert!(mock.spawns_matching("loop job").is_empty());
}
