//! Hook system for tool execution
//!
//! Hooks intercept tool calls around the dispatcher.
//!
//! ## Built-in Hooks
//! - `ApprovalHook` - Holds back mutating tools that were not confirmed
//! - `LoggingHook` - Emits one structured event per dispatched call
//!
//! Implement `PreToolHook` or `PostToolHook` for custom behavior.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ErrorCode;
use crate::tools::registry::{Approval, ExecutionContext, ToolCall, ToolCategory, ToolResult};

/// Result of a pre-execution hook
#[derive(Debug, Clone, PartialEq)]
pub enum HookResult {
    /// Continue with execution
    Continue,
    /// Block execution; the code and reason become the tool result
    Block { code: ErrorCode, reason: String },
}

/// Hook called before tool execution
#[async_trait]
pub trait PreToolHook: Send + Sync {
    async fn before_execute(
        &self,
        call: &ToolCall,
        category: ToolCategory,
        ctx: &ExecutionContext,
    ) -> HookResult;
}

/// Hook called after tool execution, including calls that never reached an
/// executor (unsupported, blocked).
#[async_trait]
pub trait PostToolHook: Send + Sync {
    async fn after_execute(&self, call: &ToolCall, result: &ToolResult, duration: Duration);
}

/// Blocks write-category tools unless the call was confirmed.
pub struct ApprovalHook;

#[async_trait]
impl PreToolHook for ApprovalHook {
    async fn before_execute(
        &self,
        call: &ToolCall,
        category: ToolCategory,
        ctx: &ExecutionContext,
    ) -> HookResult {
        if category == ToolCategory::Write && ctx.approval == Approval::Pending {
            return HookResult::Block {
                code: ErrorCode::ApprovalRequired,
                reason: format!(
                    "'{}' modifies files and was not confirmed by the client",
                    call.name
                ),
            };
        }
        HookResult::Continue
    }
}

/// Whether a result reflects a refusal rather than an attempted execution.
fn decision(result: &ToolResult) -> &'static str {
    match result.error_code() {
        Some(ErrorCode::PolicyDenied | ErrorCode::ApprovalRequired | ErrorCode::UnsupportedTool) => {
            "deny"
        }
        _ => "allow",
    }
}

/// Logs every tool execution with timing
pub struct LoggingHook;

impl LoggingHook {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggingHook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PostToolHook for LoggingHook {
    async fn after_execute(&self, call: &ToolCall, result: &ToolResult, duration: Duration) {
        let outcome = result.error_code().map(|c| c.as_str()).unwrap_or("ok");
        tracing::info!(
            tool_call_id = %call.id,
            tool = %call.name,
            turn = call.turn,
            decision = decision(result),
            outcome,
            truncated = result.truncated,
            duration_ms = duration.as_millis() as u64,
            "Tool execution completed"
        );
    }
}
