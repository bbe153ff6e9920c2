//! Task orchestration
//!
//! - [`decompose`]: the decomposition request and its strict JSON response
//! - [`waves`]: wave numbers derived from the dependency graph
//! - [`synthesis`]: aggregating sub-task results into a final answer
//! - [`OrchestrationEngine`]: runs all of it against a pool of sub-agents

pub mod decompose;
pub mod engine;
pub mod synthesis;
pub mod types;
pub mod waves;

pub use decompose::{DECOMPOSITION_MARKER, decomposition_prompt, parse_decomposition};
pub use engine::{OrchestrationEngine, RestoreReport};
pub use synthesis::{SYNTHESIS_MARKER, aggregate, synthesis_prompt};
pub use types::{
    OrchestratedSubTask, OrchestrationId, OrchestrationPhase, OrchestrationState, SubTaskStatus,
};
pub use waves::{compute_waves, group_by_wave};
