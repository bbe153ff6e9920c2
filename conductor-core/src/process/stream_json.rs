//! Stream-JSON parsing for Claude's output format
//!
//! Claude Code's stream-json format emits one JSON object per line,
//! each with a "type" field identifying the message kind.

use serde::Deserialize;

use super::traits::{ProcessEvent, ProcessResult};

/// Tool the CLI uses to ask the user a question
pub const QUESTION_TOOL: &str = "AskUserQuestion";
/// Tool the CLI uses to hand a finished plan to the user
pub const PLAN_TOOL: &str = "ExitPlanMode";

/// Content block inside an assistant message
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantContent {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

/// Content block inside a user message (tool results)
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserContent {
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload<T> {
    #[serde(default = "Vec::new")]
    pub content: Vec<T>,
}

/// Messages from Claude's stream-json output format
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Startup message carrying the session ID
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },

    Assistant {
        message: MessagePayload<AssistantContent>,
    },

    User {
        message: MessagePayload<UserContent>,
    },

    /// Final result with usage stats
    Result {
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        num_turns: Option<u32>,
        #[serde(default)]
        subtype: Option<String>,
    },

    /// Unknown message type (future-proofing)
    #[serde(other)]
    Unknown,
}

/// Parse a line of stream-json, returning None for unparseable lines
///
/// This is resilient: empty lines, invalid JSON, and missing fields
/// all return None rather than errors.
pub fn parse_line(line: &str) -> Option<StreamMessage> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    serde_json::from_str(trimmed).ok()
}

/// Convert a StreamMessage into the process events it carries
///
/// One assistant message can hold several content blocks, so this yields
/// zero or more events in block order.
pub fn to_process_events(msg: StreamMessage) -> Vec<ProcessEvent> {
    match msg {
        StreamMessage::System {
            session_id: Some(session_id),
            ..
        } => vec![ProcessEvent::SessionStarted { session_id }],
        StreamMessage::System { .. } | StreamMessage::Unknown => Vec::new(),
        StreamMessage::Assistant { message } => message
            .content
            .into_iter()
            .filter_map(|block| match block {
                AssistantContent::Text { text } if !text.is_empty() => {
                    Some(ProcessEvent::Text { text })
                }
                AssistantContent::Thinking { thinking } => {
                    Some(ProcessEvent::Thinking { text: thinking })
                }
                AssistantContent::ToolUse { id, name, input } => Some(match name.as_str() {
                    QUESTION_TOOL => ProcessEvent::QuestionAsked { id, input },
                    PLAN_TOOL => ProcessEvent::PlanProposed { id, input },
                    _ => ProcessEvent::ToolInvoked { id, name, input },
                }),
                AssistantContent::Text { .. } | AssistantContent::Other => None,
            })
            .collect(),
        StreamMessage::User { message } => message
            .content
            .into_iter()
            .filter_map(|block| match block {
                UserContent::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => Some(ProcessEvent::ToolResult {
                    id: tool_use_id,
                    content: content_text(content),
                    is_error,
                }),
                UserContent::Other => None,
            })
            .collect(),
        StreamMessage::Result {
            is_error,
            result,
            session_id,
            total_cost_usd,
            duration_ms,
            num_turns,
            subtype,
        } => {
            let text = result
                .or_else(|| subtype.filter(|_| is_error))
                .unwrap_or_default();
            vec![ProcessEvent::Result(ProcessResult {
                is_error,
                text,
                session_id,
                cost_usd: total_cost_usd,
                duration_ms,
                num_turns,
            })]
        }
    }
}

/// Tool result content is either a string or a list of text blocks
fn content_text(content: serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s,
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
