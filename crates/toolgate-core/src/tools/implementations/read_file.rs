//! read_file - Read file contents

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::constants::limits;
use crate::error::ErrorCode;
use crate::tools::fs_ops::looks_binary;
use crate::tools::registry::{ExecutionContext, Tool, ToolName, ToolOutput};
use crate::tools::parse_params;

pub struct ReadFileTool;

#[derive(Deserialize)]
struct Params {
    #[serde(alias = "path")]
    file_path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

fn human_size(size: u64) -> String {
    match size {
        0..1024 => format!("{} bytes", size),
        1024..1_048_576 => format!("{:.1} KB", size as f64 / 1024.0),
        _ => format!("{:.1} MB", size as f64 / 1_048_576.0),
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> ToolName {
        ToolName::ReadFile
    }

    fn description(&self) -> &str {
        "Read a text file. Supports a 1-indexed line offset and line limit for large files. \
         Binary files are reported, not dumped."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file, absolute or relative to the workspace"
                },
                "offset": {
                    "type": "number",
                    "description": "The line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "number",
                    "description": "The number of lines to read"
                }
            },
            "required": ["file_path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> ToolOutput {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let path = match ctx.authorize_path(&params.file_path) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ToolOutput::failure(
                    ErrorCode::NotFound,
                    format!("File not found: {}", params.file_path),
                );
            }
            Err(e) => {
                return ToolOutput::failure(ErrorCode::from_io(&e), format!("Cannot stat file: {}", e))
            }
        };

        if !metadata.is_file() {
            return ToolOutput::invalid_argument(format!(
                "Path is not a file: {}",
                path.display()
            ));
        }

        let max_size = ctx.policy.max_file_size();
        if metadata.len() > max_size {
            return ToolOutput::failure(
                ErrorCode::FileTooLarge,
                format!(
                    "File is {} which exceeds the {} limit",
                    human_size(metadata.len()),
                    human_size(max_size)
                ),
            );
        }

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return ToolOutput::failure(ErrorCode::from_io(&e), format!("Failed to read file: {}", e))
            }
        };

        if looks_binary(&bytes, limits::BINARY_SNIFF_BYTES) {
            return ToolOutput::success(json!({
                "path": path.display().to_string(),
                "content": format!("Binary file: {} ({})", path.display(), human_size(bytes.len() as u64)),
                "binary": true,
                "total_lines": 0,
                "lines_returned": 0
            }));
        }

        let content = match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => return ToolOutput::invalid_argument(format!("File is not valid UTF-8: {}", e)),
        };

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();
        let start = params.offset.unwrap_or(1).max(1) - 1;

        if total_lines > 0 && start >= total_lines {
            return ToolOutput::invalid_argument(format!(
                "Start line {} is beyond file length ({})",
                start + 1,
                total_lines
            ));
        }

        let end = match params.limit {
            Some(limit) => start.saturating_add(limit).min(total_lines),
            None => total_lines,
        };
        let window = lines[start.min(end)..end].join("\n");
        let clamped = ctx.policy.clamp_output(&window);

        ToolOutput::success_truncated(
            json!({
                "path": path.display().to_string(),
                "content": clamped.text,
                "total_lines": total_lines,
                "start_line": start + 1,
                "lines_returned": clamped.lines_shown,
                "notice": clamped.notice(),
            }),
            clamped.truncated,
        )
    }
}
