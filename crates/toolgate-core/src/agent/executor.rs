//! Tool execution for one orchestration round.
//!
//! Calls in a round run concurrently on the runtime; results come back in
//! call order so conversation history is reproducible.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;

use crate::ai::types::AiToolCall;
use crate::error::ErrorCode;
use crate::tools::registry::{
    Approval, ToolCall, ToolCategory, ToolName, ToolOutput, ToolRegistry, ToolResult,
};

/// Which calls in a round may mutate files.
#[derive(Debug, Clone)]
pub enum ApprovalPolicy {
    /// Everything runs (`auto_apply_edits`).
    AutoApply,
    /// Only the listed call ids are approved.
    Confirmed(HashSet<String>),
}

impl ApprovalPolicy {
    pub fn approval_for(&self, call_id: &str) -> Approval {
        match self {
            ApprovalPolicy::AutoApply => Approval::Granted,
            ApprovalPolicy::Confirmed(ids) if ids.contains(call_id) => Approval::Granted,
            ApprovalPolicy::Confirmed(_) => Approval::Pending,
        }
    }
}

/// True when `call` names a registered tool in the write category.
pub fn is_mutating(registry: &ToolRegistry, call: &AiToolCall) -> bool {
    registry.category_of(&ToolName::parse(&call.name)) == Some(ToolCategory::Write)
}

/// Dispatch every call of one round and return results in call order.
///
/// Each call is spawned as its own task. A task that is dropped mid-flight
/// (client disconnect) keeps running to completion, so a started write is
/// never cut short.
pub async fn execute_round(
    registry: &Arc<ToolRegistry>,
    calls: &[AiToolCall],
    turn: usize,
    approvals: &ApprovalPolicy,
) -> Vec<ToolResult> {
    let handles: Vec<_> = calls
        .iter()
        .map(|ai_call| {
            let call = ToolCall::new(
                ai_call.id.clone(),
                &ai_call.name,
                ai_call.arguments.clone(),
                turn,
            );
            let approval = approvals.approval_for(&call.id);
            let registry = Arc::clone(registry);
            let handle = tokio::spawn({
                let call = call.clone();
                async move { registry.dispatch(&call, approval).await }
            });
            (call, handle)
        })
        .collect();

    let (calls, handles): (Vec<ToolCall>, Vec<_>) = handles.into_iter().unzip();
    let joined = join_all(handles).await;

    calls
        .iter()
        .zip(joined)
        .map(|(call, outcome)| match outcome {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(tool_call_id = %call.id, tool = %call.name, error = %e, "Tool task failed");
                ToolResult::from_output(
                    call,
                    ToolOutput::failure(ErrorCode::ToolError, format!("Tool task failed: {}", e)),
                )
            }
        })
        .collect()
}
