//! API request/response types (OpenAI chat/completions wire format)

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use toolgate_core::ai::format::{
    message_to_wire, messages_from_wire, passthrough_options, tool_call_to_wire,
};
use toolgate_core::{Completion, ConversationRequest};

use crate::error::AppError;

/// Chat completion request body. Unknown keys are passed to the backend.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<Value>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub stream: bool,
    /// Ids of pending mutating tool calls the client approved.
    #[serde(default)]
    pub confirmed_tool_calls: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatCompletionRequest {
    pub fn into_conversation(self) -> Result<ConversationRequest, AppError> {
        if self.messages.is_empty() {
            return Err(AppError::BadRequest("messages must not be empty".into()));
        }
        let messages = messages_from_wire(&self.messages).map_err(AppError::BadRequest)?;

        Ok(ConversationRequest {
            messages,
            tools: self.tools.unwrap_or_default(),
            model: self.model,
            options: passthrough_options(&self.extra),
            confirmed_tool_calls: self.confirmed_tool_calls.into_iter().collect(),
        })
    }
}

/// Gateway-specific details attached to a completion.
#[derive(Debug, Serialize)]
pub struct GatewayInfo {
    pub rounds: usize,
    pub tool_calls_executed: usize,
    pub limit_reached: bool,
    pub awaiting_confirmation: bool,
    /// Tool rounds executed by this request, as wire messages. Clients append
    /// them to their history before the returned assistant message.
    pub messages: Vec<Value>,
}

impl GatewayInfo {
    pub fn from_completion(completion: &Completion) -> Self {
        Self {
            rounds: completion.rounds,
            tool_calls_executed: completion.tool_results.len(),
            limit_reached: completion.limit_reached,
            awaiting_confirmation: completion.awaiting_confirmation,
            messages: completion.history.iter().map(message_to_wire).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Value>,
    pub usage: Value,
    pub toolgate: GatewayInfo,
}

impl ChatCompletionResponse {
    pub fn from_completion(completion: &Completion, created: i64) -> Self {
        Self {
            id: completion.id.clone(),
            object: "chat.completion",
            created,
            model: completion.model.clone(),
            choices: vec![json!({
                "index": 0,
                "message": message_to_wire(&completion.message),
                "finish_reason": completion.finish_reason.as_str(),
            })],
            usage: json!(completion.usage),
            toolgate: GatewayInfo::from_completion(completion),
        }
    }
}

/// The `chat.completion.chunk` sequence for a finished completion: role,
/// content, tool calls, then the finish chunk carrying usage and the
/// `toolgate` block.
pub fn completion_chunks(completion: &Completion, created: i64) -> Vec<Value> {
    let chunk = |delta: Value, finish_reason: Value| {
        json!({
            "id": completion.id,
            "object": "chat.completion.chunk",
            "created": created,
            "model": completion.model,
            "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }],
        })
    };

    let mut chunks = vec![chunk(json!({ "role": "assistant" }), Value::Null)];

    if let Some(text) = completion.message.text().filter(|t| !t.is_empty()) {
        chunks.push(chunk(json!({ "content": text }), Value::Null));
    }

    if completion.message.has_tool_calls() {
        let calls: Vec<Value> = completion
            .message
            .tool_calls
            .iter()
            .enumerate()
            .map(|(index, call)| {
                let mut wire = tool_call_to_wire(call);
                wire["index"] = json!(index);
                wire
            })
            .collect();
        chunks.push(chunk(json!({ "tool_calls": calls }), Value::Null));
    }

    let mut finish = chunk(json!({}), json!(completion.finish_reason.as_str()));
    finish["usage"] = json!(completion.usage);
    finish["toolgate"] = json!(GatewayInfo::from_completion(completion));
    chunks.push(finish);
    chunks
}

/// Single-entry model list used when the backend cannot be reached.
pub fn fallback_models(model_name: &str, created: i64) -> Value {
    json!({
        "object": "list",
        "data": [{
            "id": model_name,
            "object": "model",
            "created": created,
            "owned_by": "toolgate",
        }]
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolgate_core::ai::types::{AiToolCall, FinishReason, ModelMessage, Usage};

    fn completion(message: ModelMessage, finish_reason: FinishReason) -> Completion {
        Completion {
            id: "chatcmpl-1".into(),
            model: "m".into(),
            message,
            history: Vec::new(),
            finish_reason,
            usage: Usage::default(),
            rounds: 0,
            tool_results: Vec::new(),
            limit_reached: false,
            awaiting_confirmation: false,
        }
    }

    #[test]
    fn request_splits_gateway_fields_from_options() {
        let body = json!({
            "model": "qwen",
            "messages": [{ "role": "user", "content": "hi" }],
            "stream": true,
            "temperature": 0.1,
            "confirmed_tool_calls": ["call_1"]
        });
        let request: ChatCompletionRequest = serde_json::from_value(body).unwrap();
        assert!(request.stream);

        let conversation = request.into_conversation().unwrap();
        assert_eq!(conversation.model.as_deref(), Some("qwen"));
        assert!(conversation.confirmed_tool_calls.contains("call_1"));
        assert_eq!(conversation.options.len(), 1);
        assert_eq!(conversation.options["temperature"], 0.1);
    }

    #[test]
    fn empty_or_invalid_messages_are_bad_requests() {
        let empty: ChatCompletionRequest =
            serde_json::from_value(json!({ "messages": [] })).unwrap();
        assert!(matches!(empty.into_conversation(), Err(AppError::BadRequest(_))));

        let bad_role: ChatCompletionRequest =
            serde_json::from_value(json!({ "messages": [{ "role": "robot", "content": "x" }] }))
                .unwrap();
        assert!(matches!(bad_role.into_conversation(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn chunks_for_text_answer() {
        let chunks = completion_chunks(
            &completion(
                ModelMessage::assistant(Some("done".into()), Vec::new()),
                FinishReason::Stop,
            ),
            1,
        );
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "done");
        assert_eq!(chunks[2]["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn chunks_carry_pending_tool_calls_with_index() {
        let message = ModelMessage::assistant(
            None,
            vec![AiToolCall {
                id: "w1".into(),
                name: "write_file".into(),
                arguments: json!({ "path": "a" }),
            }],
        );
        let chunks = completion_chunks(&completion(message, FinishReason::ToolCalls), 1);
        assert_eq!(chunks.len(), 3);
        let call = &chunks[1]["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(call["index"], 0);
        assert_eq!(call["id"], "w1");
        assert_eq!(call["function"]["arguments"], "{\"path\":\"a\"}");
        assert_eq!(chunks[2]["choices"][0]["finish_reason"], "tool_calls");
    }

    #[test]
    fn response_carries_executed_rounds_for_resume() {
        let call = AiToolCall {
            id: "l1".into(),
            name: "list_directory".into(),
            arguments: json!({ "path": "." }),
        };
        let pending = ModelMessage::assistant(
            None,
            vec![AiToolCall {
                id: "w1".into(),
                name: "write_file".into(),
                arguments: json!({ "path": "a" }),
            }],
        );
        let mut paused = completion(pending, FinishReason::ToolCalls);
        paused.awaiting_confirmation = true;
        paused.history = vec![
            ModelMessage::assistant(None, vec![call]),
            ModelMessage::tool_result("l1", "list_directory", "{\"ok\":true}"),
        ];

        let body = serde_json::to_value(ChatCompletionResponse::from_completion(&paused, 1)).unwrap();
        let history = body["toolgate"]["messages"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["tool_calls"][0]["id"], "l1");
        assert_eq!(history[1]["role"], "tool");
        assert_eq!(history[1]["tool_call_id"], "l1");
        assert_eq!(body["choices"][0]["message"]["tool_calls"][0]["id"], "w1");

        let chunks = completion_chunks(&paused, 1);
        let finish = chunks.last().unwrap();
        assert_eq!(finish["toolgate"]["messages"][1]["tool_call_id"], "l1");
        assert_eq!(finish["toolgate"]["awaiting_confirmation"], true);
    }
}
