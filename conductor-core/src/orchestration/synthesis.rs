//! Aggregating sub-task results into a final answer

use std::fmt::Write as _;

use super::types::{OrchestrationState, SubTaskStatus};

/// Opening line of every model synthesis request
pub const SYNTHESIS_MARKER: &str = "Combine the following sub-task results into one answer.";

/// Deterministic aggregation of a finished run
///
/// Successful results in index order, then one line per failed sub-task with
/// its failure reason.
pub fn aggregate(state: &OrchestrationState) -> String {
    let mut out = String::new();

    for task in state
        .subtasks
        .iter()
        .filter(|t| t.status == SubTaskStatus::Completed)
    {
        let _ = writeln!(out, "## {}\n", task.title);
        let _ = writeln!(out, "{}\n", task.result.as_deref().unwrap_or("").trim());
    }

    let failed: Vec<_> = state
        .subtasks
        .iter()
        .filter(|t| t.status == SubTaskStatus::Failed)
        .collect();
    if !failed.is_empty() {
        let _ = writeln!(out, "## Failed sub-tasks\n");
        for task in failed {
            let reason = task
                .error
                .as_ref()
                .map_or_else(|| "unknown error".to_string(), ToString::to_string);
            let _ = writeln!(out, "- {}: {}", task.title, reason);
        }
    }

    out.trim_end().to_string()
}

/// Prompt asking a model to merge the aggregated results
pub fn synthesis_prompt(state: &OrchestrationState) -> String {
    format!(
        "{SYNTHESIS_MARKER}\n\nOriginal request:\n{}\n\nSub-task results:\n\n{}",
        state.original_prompt,
        aggregate(state)
    )
}
