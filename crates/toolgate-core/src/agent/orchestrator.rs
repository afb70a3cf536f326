//! Conversation orchestrator - the tool-call mediation loop.
//!
//! An explicit state machine over one request's conversation:
//!
//! ```text
//!   AwaitingBackend ──tool calls──► ExecutingTools ──round < max──► AwaitingBackend
//!        │                              │
//!        │ no tool calls /              │ round == max
//!        │ unconfirmed writes           ▼
//!        └──────────────────────────► Completed
//!
//!   backend error (after network retries) ──► Failed
//! ```
//!
//! The round counter is the only loop bound. Each request owns its state;
//! nothing here is shared across requests except the registry and backend.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::ai::client::ChatBackend;
use crate::ai::format::convert_tools;
use crate::ai::types::{AiToolCall, ChatRequest, FinishReason, ModelMessage, Role, Usage};
use crate::constants::{backend, orchestration};
use crate::error::GatewayError;
use crate::tools::registry::{ToolRegistry, ToolResult};

use super::executor::{execute_round, is_mutating, ApprovalPolicy};

/// Configuration for the orchestrator, fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum tool-call round trips per request.
    pub max_tool_rounds: usize,
    /// Advertise the gateway's tools when the client sends none.
    pub inject_tools: bool,
    /// Run write-category tools without client confirmation.
    pub auto_apply_edits: bool,
    /// Model used when the client omits one.
    pub default_model: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: orchestration::DEFAULT_MAX_TOOL_ROUNDS,
            inject_tools: true,
            auto_apply_edits: false,
            default_model: backend::DEFAULT_MODEL.to_string(),
        }
    }
}

/// One client request, already translated from the wire format.
#[derive(Debug, Clone, Default)]
pub struct ConversationRequest {
    pub messages: Vec<ModelMessage>,
    /// Client-supplied tool definitions (OpenAI format). Empty means none.
    pub tools: Vec<Value>,
    pub model: Option<String>,
    /// Passthrough sampling options.
    pub options: Map<String, Value>,
    /// Call ids the client approved for execution.
    pub confirmed_tool_calls: HashSet<String>,
}

/// Final outcome of a conversation run.
#[derive(Debug, Clone)]
pub struct Completion {
    pub id: String,
    pub model: String,
    /// The assistant message returned to the client. Carries `tool_calls`
    /// when the run paused for confirmation.
    pub message: ModelMessage,
    /// Messages this run appended to the conversation before `message`:
    /// each executed round's assistant tool-call message and its tool
    /// results. A client continuing the conversation (including a
    /// confirmation resume) sends its messages, then these, then `message`.
    pub history: Vec<ModelMessage>,
    pub finish_reason: FinishReason,
    /// Usage summed over every backend call.
    pub usage: Usage,
    /// Tool rounds executed.
    pub rounds: usize,
    /// Every tool result produced during the run, in history order.
    pub tool_results: Vec<ToolResult>,
    /// Set when the round limit cut the loop short.
    pub limit_reached: bool,
    /// Set when mutating calls are waiting for client confirmation.
    pub awaiting_confirmation: bool,
}

/// Orchestration states.
#[derive(Debug)]
enum LoopState {
    AwaitingBackend,
    ExecutingTools {
        calls: Vec<AiToolCall>,
        approvals: ApprovalPolicy,
    },
    Completed(Box<Completion>),
    Failed(GatewayError),
}

impl LoopState {
    fn name(&self) -> &'static str {
        match self {
            LoopState::AwaitingBackend => "awaiting_backend",
            LoopState::ExecutingTools { .. } => "executing_tools",
            LoopState::Completed(_) => "completed",
            LoopState::Failed(_) => "failed",
        }
    }
}

/// Per-request conversation state. Owned by one `run` call.
struct ConversationState {
    messages: Vec<ModelMessage>,
    /// Length of the client-supplied history; everything after it is new.
    initial_len: usize,
    round: usize,
    usage: Usage,
    tool_results: Vec<ToolResult>,
    response_id: Option<String>,
    response_model: Option<String>,
}

pub struct Orchestrator {
    backend: Arc<dyn ChatBackend>,
    registry: Arc<ToolRegistry>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        registry: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            backend,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Tool definitions the gateway advertises, in OpenAI format.
    pub fn advertised_tools(&self) -> Vec<Value> {
        convert_tools(&self.registry.ai_tools())
    }

    /// Drive the conversation to completion.
    ///
    /// Returns `Err` only for orchestration-fatal backend errors; every
    /// tool-level failure is fed back to the model instead.
    pub async fn run(&self, request: ConversationRequest) -> Result<Completion, GatewayError> {
        let model = request
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.config.default_model.clone());
        let tools = if request.tools.is_empty() && self.config.inject_tools {
            self.advertised_tools()
        } else {
            request.tools.clone()
        };

        let initial_len = request.messages.len();
        let mut conversation = ConversationState {
            messages: request.messages,
            initial_len,
            round: 0,
            usage: Usage::default(),
            tool_results: Vec::new(),
            response_id: None,
            response_model: None,
        };

        let mut state = self.initial_state(&conversation.messages, request.confirmed_tool_calls);

        loop {
            debug!(round = conversation.round, state = state.name(), "Orchestrator transition");
            state = match state {
                LoopState::AwaitingBackend => {
                    self.await_backend(&mut conversation, &model, &tools, &request.options)
                        .await
                }
                LoopState::ExecutingTools { calls, approvals } => {
                    self.execute_tools(&mut conversation, &model, calls, approvals)
                        .await
                }
                LoopState::Completed(completion) => {
                    info!(
                        rounds = completion.rounds,
                        finish_reason = completion.finish_reason.as_str(),
                        limit_reached = completion.limit_reached,
                        awaiting_confirmation = completion.awaiting_confirmation,
                        "Conversation completed"
                    );
                    return Ok(*completion);
                }
                LoopState::Failed(error) => {
                    warn!(round = conversation.round, error = %error, "Conversation failed");
                    return Err(error);
                }
            };
        }
    }

    /// A conversation that ends with an assistant message carrying tool
    /// calls is a resume: those calls are executed before the backend is
    /// consulted again.
    fn initial_state(&self, messages: &[ModelMessage], confirmed: HashSet<String>) -> LoopState {
        match messages.last() {
            Some(last) if last.role == Role::Assistant && last.has_tool_calls() => {
                debug!(
                    calls = last.tool_calls.len(),
                    confirmed = confirmed.len(),
                    "Resuming pending tool calls"
                );
                LoopState::ExecutingTools {
                    calls: last.tool_calls.clone(),
                    approvals: self.approval_policy(confirmed),
                }
            }
            _ => LoopState::AwaitingBackend,
        }
    }

    fn approval_policy(&self, confirmed: HashSet<String>) -> ApprovalPolicy {
        if self.config.auto_apply_edits {
            ApprovalPolicy::AutoApply
        } else {
            ApprovalPolicy::Confirmed(confirmed)
        }
    }

    async fn await_backend(
        &self,
        conversation: &mut ConversationState,
        model: &str,
        tools: &[Value],
        options: &Map<String, Value>,
    ) -> LoopState {
        let request = ChatRequest {
            model: model.to_string(),
            messages: conversation.messages.clone(),
            tools: tools.to_vec(),
            options: options.clone(),
        };

        let response = match self.backend.complete(&request).await {
            Ok(response) => response,
            Err(e) => return LoopState::Failed(e),
        };

        if let Some(usage) = &response.usage {
            conversation.usage.add(usage);
        }
        conversation.response_id = response.id.clone().or(conversation.response_id.take());
        conversation.response_model = response
            .model
            .clone()
            .or(conversation.response_model.take());

        let message = response.message;
        if !message.has_tool_calls() {
            return LoopState::Completed(Box::new(self.completion(
                conversation,
                model,
                message,
                response.finish_reason,
            )));
        }

        let needs_confirmation = !self.config.auto_apply_edits
            && message.tool_calls.iter().any(|c| is_mutating(&self.registry, c));
        if needs_confirmation {
            info!(
                round = conversation.round,
                calls = message.tool_calls.len(),
                "Mutating tool calls await client confirmation"
            );
            let mut completion =
                self.completion(conversation, model, message, FinishReason::ToolCalls);
            completion.awaiting_confirmation = true;
            return LoopState::Completed(Box::new(completion));
        }

        let calls = message.tool_calls.clone();
        conversation.messages.push(message);
        LoopState::ExecutingTools {
            calls,
            // Nothing mutating reached this point unconfirmed, so approval
            // only matters when auto-apply is on.
            approvals: self.approval_policy(HashSet::new()),
        }
    }

    async fn execute_tools(
        &self,
        conversation: &mut ConversationState,
        model: &str,
        calls: Vec<AiToolCall>,
        approvals: ApprovalPolicy,
    ) -> LoopState {
        conversation.round += 1;
        let round = conversation.round;
        debug!(round, calls = calls.len(), "Executing tool round");

        let results = execute_round(&self.registry, &calls, round, &approvals).await;
        for result in &results {
            conversation.messages.push(ModelMessage::tool_result(
                result.call_id.clone(),
                result.tool.to_string(),
                result.to_content(),
            ));
        }
        conversation.tool_results.extend(results);

        if round >= self.config.max_tool_rounds {
            warn!(
                rounds = round,
                max_tool_rounds = self.config.max_tool_rounds,
                "Tool round limit reached"
            );
            let notice = format!(
                "Stopped after {} tool-call round{}: the round limit was reached before the \
                 model produced a final answer. The tool results so far are returned with \
                 this response; send them back with a follow-up message to continue.",
                round,
                if round == 1 { "" } else { "s" }
            );
            let mut completion = self.completion(
                conversation,
                model,
                ModelMessage::assistant(Some(notice), Vec::new()),
                FinishReason::Stop,
            );
            completion.limit_reached = true;
            return LoopState::Completed(Box::new(completion));
        }

        LoopState::AwaitingBackend
    }

    fn completion(
        &self,
        conversation: &mut ConversationState,
        model: &str,
        message: ModelMessage,
        finish_reason: FinishReason,
    ) -> Completion {
        Completion {
            id: conversation
                .response_id
                .clone()
                .unwrap_or_else(|| format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())),
            model: conversation
                .response_model
                .clone()
                .unwrap_or_else(|| model.to_string()),
            message,
            history: conversation.messages.split_off(conversation.initial_len),
            finish_reason,
            usage: conversation.usage.clone(),
            rounds: conversation.round,
            tool_results: std::mem::take(&mut conversation.tool_results),
            limit_reached: false,
            awaiting_confirmation: false,
        }
    }
}
