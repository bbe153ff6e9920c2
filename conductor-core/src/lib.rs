//! conductor-core: agent lifecycle and task orchestration
//!
//! This crate runs a commander prompt as a team of CLI sub-agents:
//!
//! - **Lifecycle** - [`AgentLifecycleStateMachine`] with a validated transition table
//! - **Orchestration** - [`OrchestrationEngine`] decomposes a prompt, runs the
//!   sub-tasks in dependency waves and synthesizes the results
//! - **Queue** - [`SubAgentTaskQueue`] with claims, retries and dependency failure propagation
//! - **Suspension** - [`SuspensionManager`] persists [`ResumeContext`]s so interrupted
//!   agents survive a restart
//! - **Resources** - [`ResourceMonitor`] grades pressure and reclaims idle agents
//! - **Events** - [`EventBus`] trait and [`MemoryEventBus`] for observers
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use conductor_core::process::ClaudeProcessConfig;
//! use conductor_core::{
//!     AgentId, ClaudeProcessManager, ConfigLoader, EventBus, FileStore, MemoryEventBus,
//!     OrchestrationEngine,
//! };
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::load()?;
//!     let processes = Arc::new(ClaudeProcessManager::new(ClaudeProcessConfig {
//!         claude_path: config.process.claude_path.clone(),
//!     }));
//!     let store = Arc::new(FileStore::default_location());
//!     let events: Arc<dyn EventBus> = Arc::new(MemoryEventBus::new(1024));
//!
//!     let engine = OrchestrationEngine::new(config, processes, store, events);
//!     let id = engine.start("Add a caching layer to the API", AgentId::new()).await?;
//!     let state = engine.wait(id).await?;
//!     println!("{}", state.synthesis_result.unwrap_or_default());
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod monitor;
pub mod orchestration;
pub mod policy;
pub mod process;
pub mod queue;
pub mod resume;
pub mod store;

// Re-export key types for convenience
pub use agent::{Agent, AgentId, AgentPool, AgentTask, TaskId};
pub use config::{ConductorConfig, ConfigLoader};
pub use error::{
    ConductorError, ConductorResult, ConfigError, DecompositionError, DependencyError,
    FailureKind, OrchestrationError, ProcessError, QueueError, StoreError, SuspensionError,
    TaskFailure, TransitionError,
};
pub use events::{ConductorEvent, EventBus, MemoryEventBus};
pub use lifecycle::{
    AgentLifecycleContext, AgentLifecycleState, AgentLifecycleStateMachine, LifecycleEffect,
    LifecycleEvent,
};
pub use monitor::{MemorySampler, MonitorReport, ResourceMonitor, SysinfoSampler};
pub use orchestration::{
    OrchestratedSubTask, OrchestrationEngine, OrchestrationId, OrchestrationPhase,
    OrchestrationState, RestoreReport, SubTaskStatus,
};
pub use policy::{CleanupPolicy, ResourcePressure, RetryPolicy};
pub use process::{ClaudeProcessManager, CliProcessManager, MockProcessManager};
pub use queue::{QueueItemStatus, SubAgentTaskQueue, SubAgentTaskQueueItem};
pub use resume::{
    InteractionKind, InteractionResponse, PendingInteraction, ResumeContext, SuspensionManager,
};
pub use store::{FileStore, KeyValueStore, MemoryStore, PersistedSnapshot};
