//! Decomposition request and response parsing

use serde::Deserialize;

use super::types::OrchestratedSubTask;
use crate::error::DecompositionError;

/// Opening line of every decomposition request
pub const DECOMPOSITION_MARKER: &str = "Decompose the following request into sub-tasks.";

/// Build the prompt sent to the decomposition model
pub fn decomposition_prompt(request: &str) -> String {
    format!(
        r#"{DECOMPOSITION_MARKER}

Respond with ONLY a JSON object of this exact shape, no prose:
{{"subtasks":[{{"title":string,"prompt":string,"dependencies":[int],"can_parallel":bool,"estimated_complexity":"low"|"medium"|"high"}}]}}

Rules:
- "dependencies" lists the zero-based indices of sub-tasks that must finish first.
- A sub-task may only depend on sub-tasks listed before it.
- Each "prompt" must be self-contained; the agent running it sees nothing else.

Request:
{request}"#
    )
}

#[derive(Debug, Deserialize)]
struct DecompositionResponse {
    subtasks: Vec<RawSubtask>,
}

#[derive(Debug, Deserialize)]
struct RawSubtask {
    title: String,
    prompt: String,
    #[serde(default)]
    dependencies: Vec<usize>,
    #[serde(default = "default_can_parallel")]
    can_parallel: bool,
    #[serde(default = "default_complexity")]
    estimated_complexity: String,
}

fn default_can_parallel() -> bool {
    true
}

fn default_complexity() -> String {
    "medium".to_string()
}

/// Parse the model's answer into sub-tasks
///
/// Tolerates a Markdown fence or prose around the object; anything that does
/// not deserialize is a hard failure, never a partial result.
pub fn parse_decomposition(text: &str) -> Result<Vec<OrchestratedSubTask>, DecompositionError> {
    let json = extract_object(text)
        .ok_or_else(|| DecompositionError::MalformedJson("no JSON object in response".into()))?;
    let response: DecompositionResponse = serde_json::from_str(json)
        .map_err(|e| DecompositionError::MalformedJson(e.to_string()))?;

    if response.subtasks.is_empty() {
        return Err(DecompositionError::EmptySubtasks);
    }

    Ok(response
        .subtasks
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let mut task = OrchestratedSubTask::new(index, raw.title, raw.prompt);
            task.dependencies = raw.dependencies;
            task.can_parallel = raw.can_parallel;
            task.complexity = raw.estimated_complexity;
            task
        })
        .collect())
}

fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_request_after_marker() {
        let prompt = decomposition_prompt("Add OAuth login");
        assert!(prompt.starts_with(DECOMPOSITION_MARKER));
        assert!(prompt.ends_with("Add OAuth login"));
    }

    #[test]
    fn parses_plain_json() {
        let text = r#"{"subtasks":[
            {"title":"A","prompt":"do a","dependencies":[],"can_parallel":true,"estimated_complexity":"low"},
            {"title":"B","prompt":"do b","dependencies":[0],"can_parallel":false,"estimated_complexity":"high"}
        ]}"#;
        let tasks = parse_decomposition(text).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].index, 1);
        assert_eq!(tasks[1].dependencies, vec![0]);
        assert!(!tasks[1].can_parallel);
        assert_eq!(tasks[1].complexity, "high");
    }

    #[test]
    fn parses_fenced_json_and_fills_defaults() {
        let text = "Here you go:\n```json\n{\"subtasks\":[{\"title\":\"A\",\"prompt\":\"do a\"}]}\n```";
        let tasks = parse_decomposition(text).unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].can_parallel);
        assert!(tasks[0].dependencies.is_empty());
        assert_eq!(tasks[0].complexity, "medium");
    }

    #[test]
    fn empty_list_is_rejected() {
        assert_eq!(
            parse_decomposition(r#"{"subtasks":[]}"#).unwrap_err(),
            DecompositionError::EmptySubtasks
        );
    }

    #[test]
    fn malformed_responses_are_rejected() {
        for text in [
            "I could not split this",
            r#"{"subtasks": "nope"}"#,
            r#"{"subtasks":[{"title":"missing prompt"}]}"#,
            r#"{"subtasks":[{"title":"A","prompt":"p","dependencies":[-1]}]}"#,
        ] {
            assert!(
                matches!(
                    parse_decomposition(text),
                    Err(DecompositionError::MalformedJson(_))
                ),
                "accepted: {text}"
            );
        }
    }
}
