//! Backend wire types
//!
//! These are NOT domain types - they mirror the OpenAI chat/completions shape
//! closely enough to round-trip client messages without loss.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tool definition advertised to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Tool call emitted by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiToolCall {
    pub id: String,
    pub name: String,
    /// Parsed arguments. Arguments that were not valid JSON are kept verbatim
    /// as a string so the dispatcher can reject them per call.
    pub arguments: Value,
}

/// Message role in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "system" | "developer" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" | "function" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// One conversation message.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMessage {
    pub role: Role,
    /// String, array of content parts, or absent.
    pub content: Option<Value>,
    pub tool_calls: Vec<AiToolCall>,
    /// Set on tool messages: the call this message answers.
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
    /// Fields we do not model, preserved for the backend.
    pub extra: Map<String, Value>,
}

impl ModelMessage {
    fn bare(role: Role, content: Option<Value>) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            extra: Map::new(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::bare(Role::System, Some(Value::String(text.into())))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::bare(Role::User, Some(Value::String(text.into())))
    }

    pub fn assistant(text: Option<String>, tool_calls: Vec<AiToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::bare(Role::Assistant, text.map(Value::String))
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            name: Some(tool_name.into()),
            ..Self::bare(Role::Tool, Some(Value::String(content.into())))
        }
    }

    /// Flattened text content; content-part arrays contribute their text parts.
    pub fn text(&self) -> Option<String> {
        match self.content.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Array(parts) => {
                let text: Vec<&str> = parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect();
                (!text.is_empty()).then(|| text.join("\n"))
            }
            _ => None,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Finish reasons for model generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Other(s) => s,
        }
    }
}

/// Token usage as reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    /// Accumulate usage across rounds.
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// A non-streaming chat request bound for the backend.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ModelMessage>,
    /// Tool definitions in OpenAI `tools` format.
    pub tools: Vec<Value>,
    /// Sampling and other passthrough options (temperature, max_tokens, ...).
    pub options: Map<String, Value>,
}

/// One backend completion, already parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendResponse {
    pub id: Option<String>,
    pub model: Option<String>,
    pub message: ModelMessage,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
}
