//! OpenAI chat/completions format handling
//!
//! Converts between the wire JSON and [`ModelMessage`]s, builds backend
//! request bodies and parses backend responses.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::ai::types::{
    AiTool, AiToolCall, BackendResponse, ChatRequest, FinishReason, ModelMessage, Role, Usage,
};
use crate::error::GatewayError;

/// Keys the gateway owns in a request body; client values are not forwarded.
const RESERVED_KEYS: [&str; 6] = [
    "model",
    "messages",
    "tools",
    "stream",
    "stream_options",
    "confirmed_tool_calls",
];

/// Tool definitions in Chat Completions shape (nested under "function").
pub fn convert_tools(tools: &[AiTool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema
                }
            })
        })
        .collect()
}

/// Parse the `arguments` of a wire tool call.
///
/// Backends send a JSON-encoded string; some send an object directly. A
/// string that is not valid JSON is kept as-is.
pub fn parse_tool_arguments(raw: Option<&Value>) -> Value {
    match raw {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(Value::String(s)) if s.trim().is_empty() => Value::Object(Map::new()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "Tool call arguments are not valid JSON");
                Value::String(s.clone())
            }
        },
        Some(other) => other.clone(),
    }
}

fn encode_arguments(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

pub fn tool_call_to_wire(call: &AiToolCall) -> Value {
    json!({
        "id": call.id,
        "type": "function",
        "function": {
            "name": call.name,
            "arguments": encode_arguments(&call.arguments)
        }
    })
}

fn tool_call_from_wire(raw: &Value, index: usize) -> Result<AiToolCall, String> {
    let function = raw
        .get("function")
        .ok_or_else(|| format!("tool_calls[{}] has no function", index))?;
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| format!("tool_calls[{}] has no function name", index))?;
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));

    Ok(AiToolCall {
        id,
        name: name.to_string(),
        arguments: parse_tool_arguments(function.get("arguments")),
    })
}

pub fn message_to_wire(message: &ModelMessage) -> Value {
    let mut obj = message.extra.clone();
    obj.insert("role".into(), json!(message.role.as_str()));
    match &message.content {
        Some(content) => {
            obj.insert("content".into(), content.clone());
        }
        // OpenAI requires the key on assistant messages, even when null.
        None => {
            obj.insert("content".into(), Value::Null);
        }
    }
    if !message.tool_calls.is_empty() {
        obj.insert(
            "tool_calls".into(),
            Value::Array(message.tool_calls.iter().map(tool_call_to_wire).collect()),
        );
    }
    if let Some(id) = &message.tool_call_id {
        obj.insert("tool_call_id".into(), json!(id));
    }
    if let Some(name) = &message.name {
        obj.insert("name".into(), json!(name));
    }
    Value::Object(obj)
}

pub fn message_from_wire(raw: &Value) -> Result<ModelMessage, String> {
    let obj = raw
        .as_object()
        .ok_or_else(|| "message must be an object".to_string())?;
    let role_raw = obj
        .get("role")
        .and_then(Value::as_str)
        .ok_or_else(|| "message has no role".to_string())?;
    let role = Role::parse(role_raw).ok_or_else(|| format!("unknown role '{}'", role_raw))?;

    let tool_calls = match obj.get("tool_calls") {
        Some(Value::Array(calls)) => calls
            .iter()
            .enumerate()
            .map(|(i, c)| tool_call_from_wire(c, i))
            .collect::<Result<Vec<_>, _>>()?,
        _ => Vec::new(),
    };

    let mut extra = obj.clone();
    for key in ["role", "content", "tool_calls", "tool_call_id", "name"] {
        extra.remove(key);
    }

    Ok(ModelMessage {
        role,
        content: obj.get("content").filter(|c| !c.is_null()).cloned(),
        tool_calls,
        tool_call_id: obj
            .get("tool_call_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        name: obj.get("name").and_then(Value::as_str).map(str::to_string),
        extra,
    })
}

pub fn messages_from_wire(raw: &[Value]) -> Result<Vec<ModelMessage>, String> {
    raw.iter()
        .enumerate()
        .map(|(i, m)| message_from_wire(m).map_err(|e| format!("messages[{}]: {}", i, e)))
        .collect()
}

/// Passthrough options from a client body, minus the keys the gateway owns.
pub fn passthrough_options(body: &Map<String, Value>) -> Map<String, Value> {
    body.iter()
        .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Non-streaming chat/completions body. The gateway always asks the backend
/// for a complete response because it must inspect tool calls.
pub fn build_request_body(request: &ChatRequest) -> Value {
    let mut body = request.options.clone();
    body.insert("model".into(), json!(request.model));
    body.insert(
        "messages".into(),
        Value::Array(request.messages.iter().map(message_to_wire).collect()),
    );
    if request.tools.is_empty() {
        body.remove("tool_choice");
    } else {
        body.insert("tools".into(), Value::Array(request.tools.clone()));
    }
    body.insert("stream".into(), Value::Bool(false));
    Value::Object(body)
}

/// Parse a chat/completions response body.
pub fn parse_response(body: &Value) -> Result<BackendResponse, GatewayError> {
    let malformed = |msg: &str| GatewayError::MalformedBackendResponse(msg.to_string());

    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or_else(|| malformed("response has no choices"))?;
    let message = choice
        .get("message")
        .ok_or_else(|| malformed("first choice has no message"))?;

    let mut message = message_from_wire(message).map_err(|e| malformed(&e))?;
    if message.role != Role::Assistant {
        debug!(role = message.role.as_str(), "Backend message role coerced to assistant");
        message.role = Role::Assistant;
    }

    let finish_reason = match choice.get("finish_reason").and_then(Value::as_str) {
        Some(raw) => FinishReason::parse(raw),
        None if message.has_tool_calls() => FinishReason::ToolCalls,
        None => FinishReason::Stop,
    };

    let usage = body
        .get("usage")
        .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok());

    Ok(BackendResponse {
        id: body.get("id").and_then(Value::as_str).map(str::to_string),
        model: body.get("model").and_then(Value::as_str).map(str::to_string),
        message,
        finish_reason,
        usage,
    })
}
