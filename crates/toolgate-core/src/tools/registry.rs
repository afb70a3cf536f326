//! Tool registry and dispatcher
//!
//! Routes a [`ToolCall`] to its executor through pre/post hooks and wraps the
//! outcome in a [`ToolResult`] tagged with the originating call id. Unknown
//! names never reach an executor.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agent::hooks::{HookResult, PostToolHook, PreToolHook};
use crate::ai::types::AiTool;
use crate::constants::limits;
use crate::error::ErrorCode;
use crate::policy::{Denial, PolicyEngine};
use crate::tools::path_locks::PathLocks;

/// The closed set of tools the gateway executes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToolName {
    ReadFile,
    WriteFile,
    EditFile,
    DeleteFile,
    ListDirectory,
    SearchFiles,
    Grep,
    RunCommand,
    WebSearch,
    /// Anything the model asked for that is not in the set above.
    Unsupported(String),
}

impl ToolName {
    pub const SUPPORTED: [ToolName; 9] = [
        ToolName::ReadFile,
        ToolName::WriteFile,
        ToolName::EditFile,
        ToolName::DeleteFile,
        ToolName::ListDirectory,
        ToolName::SearchFiles,
        ToolName::Grep,
        ToolName::RunCommand,
        ToolName::WebSearch,
    ];

    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "read_file" => ToolName::ReadFile,
            "write_file" => ToolName::WriteFile,
            "edit_file" => ToolName::EditFile,
            "delete_file" => ToolName::DeleteFile,
            "list_directory" => ToolName::ListDirectory,
            "search_files" => ToolName::SearchFiles,
            "grep" => ToolName::Grep,
            "run_command" => ToolName::RunCommand,
            "web_search" => ToolName::WebSearch,
            other => ToolName::Unsupported(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ToolName::ReadFile => "read_file",
            ToolName::WriteFile => "write_file",
            ToolName::EditFile => "edit_file",
            ToolName::DeleteFile => "delete_file",
            ToolName::ListDirectory => "list_directory",
            ToolName::SearchFiles => "search_files",
            ToolName::Grep => "grep",
            ToolName::RunCommand => "run_command",
            ToolName::WebSearch => "web_search",
            ToolName::Unsupported(name) => name,
        }
    }
}

impl FromStr for ToolName {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ToolName::parse(s))
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ToolName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ToolName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ToolName::parse(&raw))
    }
}

/// Tool category for approval and timeout handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    /// Never modifies state; bounded by the registry timeout.
    ReadOnly,
    /// Mutates files; runs to completion and may need confirmation.
    Write,
    /// Spawns processes; bounds itself.
    Execute,
}

/// A tool invocation emitted by the model. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: ToolName,
    pub arguments: Value,
    /// Round in which the model emitted this call.
    pub turn: usize,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: &str, arguments: Value, turn: usize) -> Self {
        Self {
            id: id.into(),
            name: ToolName::parse(name),
            arguments,
            turn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolError {
    pub code: ErrorCode,
    pub message: String,
}

/// What an executor hands back; the dispatcher adds the call id.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub success: bool,
    pub payload: Value,
    pub error: Option<ToolError>,
    pub truncated: bool,
}

impl ToolOutput {
    pub fn success(payload: Value) -> Self {
        Self {
            success: true,
            payload,
            error: None,
            truncated: false,
        }
    }

    pub fn success_truncated(payload: Value, truncated: bool) -> Self {
        Self {
            truncated,
            ..Self::success(payload)
        }
    }

    pub fn failure(code: ErrorCode, message: impl fmt::Display) -> Self {
        Self {
            success: false,
            payload: Value::Null,
            error: Some(ToolError {
                code,
                message: message.to_string(),
            }),
            truncated: false,
        }
    }

    /// Failure that still carries partial data (e.g. output captured before a timeout).
    pub fn failure_with_data(code: ErrorCode, message: impl fmt::Display, payload: Value) -> Self {
        Self {
            payload,
            ..Self::failure(code, message)
        }
    }

    pub fn invalid_argument(message: impl fmt::Display) -> Self {
        Self::failure(ErrorCode::InvalidArgument, message)
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

impl From<Denial> for ToolOutput {
    fn from(denial: Denial) -> Self {
        ToolOutput::failure(denial.code, denial.reason)
    }
}

/// Parse tool parameters, returning an `invalid_argument` output on failure.
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolOutput> {
    serde_json::from_value(params)
        .map_err(|e| ToolOutput::invalid_argument(format!("Invalid parameters: {}", e)))
}

/// Protocol-agnostic outcome of one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: ToolName,
    pub success: bool,
    pub payload: Value,
    pub error: Option<ToolError>,
    pub truncated: bool,
}

impl ToolResult {
    pub fn from_output(call: &ToolCall, output: ToolOutput) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            success: output.success,
            payload: output.payload,
            error: output.error,
            truncated: output.truncated,
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }

    /// JSON envelope placed in the tool message the model sees.
    pub fn to_content(&self) -> String {
        let mut envelope = serde_json::Map::new();
        envelope.insert("ok".to_string(), Value::Bool(self.success));

        if let Some(error) = &self.error {
            envelope.insert(
                "error".to_string(),
                json!({ "code": error.code, "message": error.message }),
            );
        }
        if !self.payload.is_null() {
            envelope.insert("data".to_string(), self.payload.clone());
        }
        if self.truncated {
            envelope.insert("truncated".to_string(), Value::Bool(true));
        }

        Value::Object(envelope).to_string()
    }
}

/// Process-wide collaborators every execution context is built from.
#[derive(Clone)]
pub struct ToolEnvironment {
    pub working_dir: PathBuf,
    pub policy: Arc<PolicyEngine>,
    pub path_locks: Arc<PathLocks>,
    pub backup_dir: Option<PathBuf>,
}

impl ToolEnvironment {
    pub fn new(working_dir: PathBuf, policy: Arc<PolicyEngine>) -> Self {
        Self {
            working_dir,
            policy,
            path_locks: Arc::new(PathLocks::new()),
            backup_dir: None,
        }
    }

    pub fn with_backup_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.backup_dir = dir;
        self
    }
}

/// Whether a write-category call may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Granted,
    Pending,
}

/// Per-invocation context; lives for one tool call only.
pub struct ExecutionContext {
    pub call_id: String,
    pub working_dir: PathBuf,
    pub policy: Arc<PolicyEngine>,
    pub path_locks: Arc<PathLocks>,
    pub backup_dir: Option<PathBuf>,
    pub approval: Approval,
    pub started: Instant,
    pub budget: Duration,
}

impl ExecutionContext {
    pub fn new(call_id: impl Into<String>, env: &ToolEnvironment, budget: Duration) -> Self {
        Self {
            call_id: call_id.into(),
            working_dir: env.working_dir.clone(),
            policy: Arc::clone(&env.policy),
            path_locks: Arc::clone(&env.path_locks),
            backup_dir: env.backup_dir.clone(),
            approval: Approval::Granted,
            started: Instant::now(),
            budget,
        }
    }

    /// Resolve a path relative to the working directory (absolute paths pass through).
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.working_dir.join(p)
        }
    }

    /// Resolve and authorize in one step; the canonical path is what the
    /// executor must use for the actual filesystem call.
    pub fn authorize_path(&self, path: &str) -> Result<PathBuf, ToolOutput> {
        if path.trim().is_empty() {
            return Err(ToolOutput::invalid_argument("path is empty"));
        }
        self.policy
            .authorize_path(&self.resolve_path(path))
            .map_err(ToolOutput::from)
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }
}

/// Trait for tool implementations
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> ToolName;

    /// Tool description for the model
    fn description(&self) -> &str;

    /// JSON schema for parameters
    fn parameters_schema(&self) -> Value;

    fn category(&self) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    /// Execute the tool. The first thing every implementation does is ask the policy.
    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> ToolOutput;
}

/// Registry for managing tools with hook support
pub struct ToolRegistry {
    tools: HashMap<ToolName, Arc<dyn Tool>>,
    env: ToolEnvironment,
    /// Default timeout for read-only tools
    default_timeout: Duration,
    pre_hooks: Vec<Arc<dyn PreToolHook>>,
    post_hooks: Vec<Arc<dyn PostToolHook>>,
}

impl ToolRegistry {
    pub fn new(env: ToolEnvironment) -> Self {
        Self {
            tools: HashMap::new(),
            env,
            default_timeout: limits::DEFAULT_TOOL_TIMEOUT,
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        tracing::debug!(tool = %name, "Registered tool");
        self.tools.insert(name, tool);
    }

    pub fn add_pre_hook(&mut self, hook: Arc<dyn PreToolHook>) {
        self.pre_hooks.push(hook);
    }

    pub fn add_post_hook(&mut self, hook: Arc<dyn PostToolHook>) {
        self.post_hooks.push(hook);
    }

    pub fn environment(&self) -> &ToolEnvironment {
        &self.env
    }

    pub fn get(&self, name: &ToolName) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn category_of(&self, name: &ToolName) -> Option<ToolCategory> {
        self.tools.get(name).map(|t| t.category())
    }

    /// Registered tools as model-facing definitions, in a stable order.
    pub fn ai_tools(&self) -> Vec<AiTool> {
        ToolName::SUPPORTED
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| AiTool {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters_schema(),
            })
            .collect()
    }

    /// Route one call to its executor.
    pub async fn dispatch(&self, call: &ToolCall, approval: Approval) -> ToolResult {
        let start = Instant::now();
        let tool = match &call.name {
            ToolName::Unsupported(_) => None,
            name => self.get(name),
        };

        let Some(tool) = tool else {
            let result = ToolResult::from_output(
                call,
                ToolOutput::failure(
                    ErrorCode::UnsupportedTool,
                    format!("Tool '{}' is not supported by this gateway", call.name),
                ),
            );
            self.run_post_hooks(call, &result, start.elapsed()).await;
            return result;
        };

        if !call.arguments.is_object() {
            let result = ToolResult::from_output(
                call,
                ToolOutput::invalid_argument("tool arguments must be a JSON object"),
            );
            self.run_post_hooks(call, &result, start.elapsed()).await;
            return result;
        }

        let category = tool.category();
        let budget = match category {
            ToolCategory::Execute => self.env.policy.command_timeout(),
            _ => self.default_timeout,
        };
        let mut ctx = ExecutionContext::new(call.id.clone(), &self.env, budget);
        ctx.approval = approval;

        for hook in &self.pre_hooks {
            if let HookResult::Block { code, reason } =
                hook.before_execute(call, category, &ctx).await
            {
                tracing::info!(tool = %call.name, tool_call_id = %call.id, reason = %reason, "Pre-hook blocked execution");
                let result = ToolResult::from_output(call, ToolOutput::failure(code, reason));
                self.run_post_hooks(call, &result, start.elapsed()).await;
                return result;
            }
        }

        let output = match category {
            ToolCategory::ReadOnly => {
                match tokio::time::timeout(budget, tool.execute(call.arguments.clone(), &ctx)).await
                {
                    Ok(output) => output,
                    Err(_) => {
                        tracing::warn!(
                            tool = %call.name,
                            timeout_secs = budget.as_secs(),
                            "Tool execution timed out"
                        );
                        ToolOutput::failure(
                            ErrorCode::Timeout,
                            format!(
                                "Tool '{}' timed out after {} seconds",
                                call.name,
                                budget.as_secs()
                            ),
                        )
                    }
                }
            }
            // Writes run to completion; commands enforce their own deadline.
            ToolCategory::Write | ToolCategory::Execute => {
                tool.execute(call.arguments.clone(), &ctx).await
            }
        };

        let result = ToolResult::from_output(call, output);
        self.run_post_hooks(call, &result, start.elapsed()).await;
        result
    }

    async fn run_post_hooks(&self, call: &ToolCall, result: &ToolResult, duration: Duration) {
        for hook in &self.post_hooks {
            hook.after_execute(call, result, duration).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn test_env(dir: &TempDir) -> ToolEnvironment {
        let policy = PolicyEngine::new(PolicyConfig::rooted_at(dir.path()));
        ToolEnvironment::new(dir.path().to_path_buf(), Arc::new(policy))
    }

    struct CountingTool {
        calls: Arc<AtomicUsize>,
        category: ToolCategory,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> ToolName {
            match self.category {
                ToolCategory::Write => ToolName::WriteFile,
                _ => ToolName::ListDirectory,
            }
        }

        fn description(&self) -> &str {
            "Test tool"
        }

        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "additionalProperties": false })
        }

        fn category(&self) -> ToolCategory {
            self.category
        }

        async fn execute(&self, _params: Value, _ctx: &ExecutionContext) -> ToolOutput {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ToolOutput::success(json!({ "done": true }))
        }
    }

    struct AlwaysBlockHook;

    #[async_trait]
    impl PreToolHook for AlwaysBlockHook {
        async fn before_execute(
            &self,
            _call: &ToolCall,
            _category: ToolCategory,
            _ctx: &ExecutionContext,
        ) -> HookResult {
            HookResult::Block {
                code: ErrorCode::PolicyDenied,
                reason: "blocked for test".to_string(),
            }
        }
    }

    #[test]
    fn tool_names_round_trip_and_unknown_is_first_class() {
        for name in ToolName::SUPPORTED {
            assert_eq!(ToolName::parse(name.as_str()), name);
        }
        assert_eq!(
            ToolName::parse("launch_missiles"),
            ToolName::Unsupported("launch_missiles".into())
        );
        let parsed: ToolName = serde_json::from_value(json!("grep")).unwrap();
        assert_eq!(parsed, ToolName::Grep);
    }

    #[tokio::test]
    async fn unknown_tool_is_unsupported_without_reaching_executor() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new(test_env(&dir));
        registry.register(Arc::new(CountingTool {
            calls: Arc::clone(&calls),
            category: ToolCategory::ReadOnly,
        }));

        let call = ToolCall::new("call_1", "format_disk", json!({}), 1);
        let result = registry.dispatch(&call, Approval::Granted).await;

        assert!(!result.success);
        assert_eq!(result.call_id, "call_1");
        assert_eq!(result.error_code(), Some(ErrorCode::UnsupportedTool));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn supported_but_unregistered_tool_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let registry = ToolRegistry::new(test_env(&dir));
        let call = ToolCall::new("c", "run_command", json!({"command": "ls"}), 1);
        let result = registry.dispatch(&call, Approval::Granted).await;
        assert_eq!(result.error_code(), Some(ErrorCode::UnsupportedTool));
    }

    #[tokio::test]
    async fn non_object_arguments_are_invalid() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new(test_env(&dir));
        registry.register(Arc::new(CountingTool {
            calls: Arc::clone(&calls),
            category: ToolCategory::ReadOnly,
        }));

        let call = ToolCall::new("c", "list_directory", json!("{not json"), 1);
        let result = registry.dispatch(&call, Approval::Granted).await;
        assert_eq!(result.error_code(), Some(ErrorCode::InvalidArgument));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pre_hook_block_returns_structured_error() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new(test_env(&dir));
        registry.add_pre_hook(Arc::new(AlwaysBlockHook));
        registry.register(Arc::new(CountingTool {
            calls: Arc::clone(&calls),
            category: ToolCategory::ReadOnly,
        }));

        let call = ToolCall::new("c", "list_directory", json!({}), 1);
        let result = registry.dispatch(&call, Approval::Granted).await;

        let parsed: Value = serde_json::from_str(&result.to_content()).unwrap();
        assert_eq!(parsed["ok"], false);
        assert_eq!(parsed["error"]["code"], "policy_denied");
        assert_eq!(parsed["error"]["message"], "blocked for test");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn envelope_includes_truncation_flag() {
        let call = ToolCall::new("c", "grep", json!({}), 1);
        let result = ToolResult::from_output(
            &call,
            ToolOutput::success_truncated(json!({ "matches": [] }), true),
        );
        let parsed: Value = serde_json::from_str(&result.to_content()).unwrap();
        assert_eq!(parsed["ok"], true);
        assert_eq!(parsed["truncated"], true);
        assert!(parsed["data"]["matches"].is_array());
    }

    #[test]
    fn parse_params_maps_to_invalid_argument() {
        #[derive(serde::Deserialize, Debug)]
        struct Params {
            #[allow(dead_code)]
            name: String,
        }

        let err = parse_params::<Params>(json!({ "name": 123 })).unwrap_err();
        assert_eq!(err.error_code(), Some(ErrorCode::InvalidArgument));
        assert!(err.error.unwrap().message.contains("Invalid parameters"));
    }

    #[test]
    fn context_resolves_relative_paths_against_working_dir() {
        let dir = TempDir::new().unwrap();
        let ctx = ExecutionContext::new("c", &test_env(&dir), Duration::from_secs(1));
        assert_eq!(ctx.resolve_path("a/b.txt"), dir.path().join("a/b.txt"));
        assert_eq!(ctx.resolve_path("/etc/hosts"), PathBuf::from("/etc/hosts"));
        assert_eq!(
            ctx.authorize_path("/etc/hosts").unwrap_err().error_code(),
            Some(ErrorCode::PolicyDenied)
        );
    }
}
