//! run_command - Execute an allow-listed shell command in the sandbox
//!
//! The command runs under `sh -c` with a scrubbed environment, in its own
//! process group, inside an allowed working directory. On timeout the whole
//! group is terminated and whatever output was captured is returned.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};

use crate::error::ErrorCode;
use crate::tools::parse_params;
use crate::tools::registry::{ExecutionContext, Tool, ToolCategory, ToolName, ToolOutput};

// Raw capture bounds per stream; the policy clamp is applied afterwards.
const RAW_CAPTURE_MAX_LINES: usize = 8_000;
const RAW_CAPTURE_MAX_BYTES: usize = 2_000_000;
const READER_JOIN_TIMEOUT_MS: u64 = 2_000;
const TIMEOUT_KILL_GRACE_MS: u64 = 800;

/// Host variables every subprocess receives.
const BASE_ENV: [&str; 3] = ["PATH", "HOME", "LANG"];

pub struct RunCommandTool;

#[derive(Deserialize)]
struct Params {
    command: String,
    #[serde(default, alias = "cwd")]
    working_directory: Option<String>,
    /// Can only shorten the configured limit.
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// Keeps the most recent lines of one stream within fixed bounds.
struct TailBuffer {
    lines: VecDeque<String>,
    bytes: usize,
    total_lines: usize,
}

impl TailBuffer {
    fn new() -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            total_lines: 0,
        }
    }

    fn push(&mut self, line: String) {
        self.total_lines += 1;
        self.bytes += line.len();
        self.lines.push_back(line);
        while self.lines.len() > RAW_CAPTURE_MAX_LINES || self.bytes > RAW_CAPTURE_MAX_BYTES {
            match self.lines.pop_front() {
                Some(dropped) => self.bytes -= dropped.len(),
                None => break,
            }
        }
    }

    fn dropped(&self) -> bool {
        self.total_lines > self.lines.len()
    }

    fn text(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

/// Environment for the child: a fixed base plus configured passthrough.
fn sandbox_env(
    passthrough: &[String],
    lookup: impl Fn(&str) -> Option<String>,
) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = BASE_ENV
        .iter()
        .filter_map(|key| lookup(key).map(|v| (key.to_string(), v)))
        .collect();
    env.push(("TERM".into(), "dumb".into()));
    env.push(("NO_COLOR".into(), "1".into()));
    for key in passthrough {
        if env.iter().any(|(k, _)| k == key) {
            continue;
        }
        if let Some(value) = lookup(key) {
            env.push((key.clone(), value));
        }
    }
    env
}

fn build_command(command: &str, working_dir: &Path, env: Vec<(String, String)>) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(working_dir)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    cmd
}

async fn collect_stream<R>(pipe: Option<R>) -> TailBuffer
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buffer = TailBuffer::new();
    let Some(pipe) = pipe else {
        return buffer;
    };
    let mut reader = BufReader::new(pipe).lines();
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => buffer.push(line),
            Ok(None) => break,
            Err(e) => {
                // Non UTF-8 output ends the capture for this stream.
                tracing::debug!(error = %e, "Stopped reading command output");
                break;
            }
        }
    }
    buffer
}

async fn join_reader(mut handle: tokio::task::JoinHandle<TailBuffer>) -> TailBuffer {
    match timeout(Duration::from_millis(READER_JOIN_TIMEOUT_MS), &mut handle).await {
        Ok(Ok(buffer)) => buffer,
        Ok(Err(_)) => TailBuffer::new(),
        Err(_) => {
            handle.abort();
            TailBuffer::new()
        }
    }
}

#[cfg(unix)]
async fn terminate_unix_process_group(pid: u32) {
    let pgid = format!("-{}", pid);

    let group_term_ok = std::process::Command::new("kill")
        .arg("-TERM")
        .arg(&pgid)
        .status()
        .map(|s| s.success())
        .unwrap_or(false);

    if !group_term_ok {
        let _ = std::process::Command::new("kill")
            .arg("-TERM")
            .arg(pid.to_string())
            .status();
    }

    sleep(Duration::from_millis(200)).await;

    let still_running = std::process::Command::new("kill")
        .arg("-0")
        .arg(&pgid)
        .status()
        .map(|s| s.success())
        .unwrap_or(false);

    if still_running {
        let _ = std::process::Command::new("kill")
            .arg("-KILL")
            .arg(&pgid)
            .status();
    }
}

async fn terminate_process_tree(child: &mut Child) {
    let Some(pid) = child.id() else {
        let _ = child.kill().await;
        return;
    };

    #[cfg(unix)]
    terminate_unix_process_group(pid).await;

    #[cfg(not(unix))]
    let _ = pid;

    if timeout(Duration::from_millis(TIMEOUT_KILL_GRACE_MS), child.wait())
        .await
        .is_err()
    {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> ToolName {
        ToolName::RunCommand
    }

    fn description(&self) -> &str {
        "Run a shell command from the allowed command list. Returns exit_code, stdout and \
         stderr. Commands are killed when they exceed the configured timeout. Use write_file \
         or edit_file instead of shell redirection."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command line to execute"
                },
                "working_directory": {
                    "type": "string",
                    "description": "Directory to run in (default: the workspace)"
                },
                "timeout_secs": {
                    "type": "number",
                    "description": "Optional shorter timeout in seconds"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Execute
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> ToolOutput {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        if let Err(denial) = ctx.policy.authorize_command(&params.command) {
            tracing::info!(command = %params.command, reason = %denial.reason, "Command denied");
            return denial.into();
        }

        let requested_dir = params.working_directory.as_deref().unwrap_or(".");
        let working_dir = match ctx.authorize_path(requested_dir) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if !working_dir.is_dir() {
            return ToolOutput::failure(
                ErrorCode::NotFound,
                format!("Working directory not found: {}", requested_dir),
            );
        }

        let limit = match params.timeout_secs {
            Some(0) => return ToolOutput::invalid_argument("timeout_secs must be positive"),
            Some(secs) => Duration::from_secs(secs).min(ctx.budget),
            None => ctx.budget,
        };

        let env = sandbox_env(&ctx.policy.config().env_passthrough, |key| {
            std::env::var(key).ok()
        });
        let mut cmd = build_command(&params.command, &working_dir, env);

        tracing::info!(
            command = %params.command,
            cwd = %working_dir.display(),
            timeout_secs = limit.as_secs(),
            "Executing command"
        );

        let started = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return ToolOutput::failure(
                    ErrorCode::ToolError,
                    format!("Failed to spawn command: {}", e),
                )
            }
        };

        let stdout_handle = tokio::spawn(collect_stream(child.stdout.take()));
        let stderr_handle = tokio::spawn(collect_stream(child.stderr.take()));

        let (exit_code, timed_out) = match timeout(limit, child.wait()).await {
            Ok(Ok(status)) => (Some(exit_code_of(status)), false),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Process wait error");
                (None, false)
            }
            Err(_) => {
                terminate_process_tree(&mut child).await;
                (None, true)
            }
        };

        let stdout = join_reader(stdout_handle).await;
        let stderr = join_reader(stderr_handle).await;

        let stdout_clamped = ctx.policy.clamp_output_tail(&stdout.text());
        let stderr_clamped = ctx.policy.clamp_output_tail(&stderr.text());
        let stdout_truncated = stdout_clamped.truncated || stdout.dropped();
        let stderr_truncated = stderr_clamped.truncated || stderr.dropped();

        let payload = json!({
            "command": params.command,
            "exit_code": exit_code,
            "stdout": stdout_clamped.text,
            "stderr": stderr_clamped.text,
            "stdout_lines": stdout.total_lines,
            "stderr_lines": stderr.total_lines,
            "stdout_truncated": stdout_truncated,
            "stderr_truncated": stderr_truncated,
            "duration_ms": started.elapsed().as_millis() as u64,
        });

        if timed_out {
            return ToolOutput {
                truncated: stdout_truncated || stderr_truncated,
                ..ToolOutput::failure_with_data(
                    ErrorCode::Timeout,
                    format!("Command timed out after {} seconds", limit.as_secs()),
                    payload,
                )
            };
        }
        if exit_code.is_none() {
            return ToolOutput::failure_with_data(
                ErrorCode::ToolError,
                "Failed to collect command exit status",
                payload,
            );
        }

        // A non-zero exit is still a completed execution; the model reads exit_code.
        ToolOutput::success_truncated(payload, stdout_truncated || stderr_truncated)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::policy::{PolicyConfig, PolicyEngine};
    use crate::tools::registry::ToolEnvironment;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ctx_with(dir: &TempDir, configure: impl FnOnce(&mut PolicyConfig)) -> ExecutionContext {
        let mut config = PolicyConfig::rooted_at(dir.path());
        config.allowed_commands = vec![
            "echo".into(),
            "ls".into(),
            "pwd".into(),
            "seq".into(),
            "sleep".into(),
        ];
        config.blocked_commands = vec!["rm -rf".into()];
        configure(&mut config);
        let budget = config.command_timeout;
        let env = ToolEnvironment::new(dir.path().to_path_buf(), Arc::new(PolicyEngine::new(config)));
        ExecutionContext::new("call", &env, budget)
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_with(&dir, |_| {});

        let out = RunCommandTool
            .execute(json!({ "command": "echo hello" }), &ctx)
            .await;

        assert!(out.success, "{:?}", out.error);
        assert_eq!(out.payload["stdout"], "hello");
        assert_eq!(out.payload["exit_code"], 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_failed() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_with(&dir, |_| {});

        let out = RunCommandTool
            .execute(json!({ "command": "ls ./definitely-missing-dir" }), &ctx)
            .await;

        assert!(out.success);
        assert_ne!(out.payload["exit_code"], 0);
        assert!(!out.payload["stderr"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn denied_commands_never_spawn() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_with(&dir, |_| {});

        for command in ["rm -rf /", "python3 -c 'print(1)'", "echo hi && rm -rf ."] {
            let out = RunCommandTool
                .execute(json!({ "command": command }), &ctx)
                .await;
            assert_eq!(out.error_code(), Some(ErrorCode::PolicyDenied), "{command}");
        }
    }

    #[tokio::test]
    async fn timeout_kills_and_returns_partial_output() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_with(&dir, |c| c.command_timeout = Duration::from_secs(1));

        let started = Instant::now();
        let out = RunCommandTool
            .execute(json!({ "command": "echo started; sleep 30" }), &ctx)
            .await;

        assert_eq!(out.error_code(), Some(ErrorCode::Timeout));
        assert_eq!(out.payload["stdout"], "started");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn runs_in_requested_working_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let ctx = ctx_with(&dir, |_| {});

        let out = RunCommandTool
            .execute(json!({ "command": "pwd", "working_directory": "sub" }), &ctx)
            .await;
        assert!(out.payload["stdout"].as_str().unwrap().ends_with("sub"));

        let escape = RunCommandTool
            .execute(json!({ "command": "pwd", "working_directory": "/" }), &ctx)
            .await;
        assert_eq!(escape.error_code(), Some(ErrorCode::PolicyDenied));
    }

    #[tokio::test]
    async fn long_output_keeps_the_tail() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_with(&dir, |c| c.max_output_lines = 10);

        let out = RunCommandTool
            .execute(json!({ "command": "seq 1 50" }), &ctx)
            .await;

        let stdout = out.payload["stdout"].as_str().unwrap();
        assert_eq!(stdout.lines().count(), 10);
        assert!(stdout.ends_with("50"));
        assert_eq!(out.payload["stdout_lines"], 50);
        assert!(out.truncated);
    }

    #[test]
    fn environment_is_scrubbed_except_passthrough() {
        let host = |key: &str| match key {
            "PATH" => Some("/usr/bin".to_string()),
            "AWS_SECRET_ACCESS_KEY" => Some("hunter2".to_string()),
            "CARGO_HOME" => Some("/opt/cargo".to_string()),
            _ => None,
        };
        let env = sandbox_env(&["CARGO_HOME".to_string()], host);
        let keys: Vec<&str> = env.iter().map(|(k, _)| k.as_str()).collect();

        assert!(keys.contains(&"PATH"));
        assert!(keys.contains(&"CARGO_HOME"));
        assert!(keys.contains(&"TERM"));
        assert!(!keys.contains(&"AWS_SECRET_ACCESS_KEY"));
        assert!(!keys.contains(&"HOME"));
    }
}
