//! write_file - Create or overwrite a file

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::error::ErrorCode;
use crate::tools::fs_ops::{atomic_write, backup_file};
use crate::tools::parse_params;
use crate::tools::registry::{ExecutionContext, Tool, ToolCategory, ToolName, ToolOutput};

pub struct WriteFileTool;

#[derive(Deserialize)]
struct Params {
    #[serde(alias = "path")]
    file_path: String,
    content: String,
    /// Fail instead of overwriting an existing file.
    #[serde(default)]
    create_only: bool,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> ToolName {
        ToolName::WriteFile
    }

    fn description(&self) -> &str {
        "Write a file, creating parent directories as needed. Overwrites existing files \
         unless create_only is true."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file, absolute or relative to the workspace"
                },
                "content": {
                    "type": "string",
                    "description": "Full file content to write"
                },
                "create_only": {
                    "type": "boolean",
                    "description": "Fail with precondition_failed if the file already exists"
                }
            },
            "required": ["file_path", "content"],
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Write
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> ToolOutput {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let max_size = ctx.policy.max_file_size();
        if params.content.len() as u64 > max_size {
            return ToolOutput::failure(
                ErrorCode::FileTooLarge,
                format!(
                    "Content is {} bytes which exceeds the {} byte limit",
                    params.content.len(),
                    max_size
                ),
            );
        }

        let path = match ctx.authorize_path(&params.file_path) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let _guard = ctx.path_locks.lock(&path).await;

        let existing = fs::symlink_metadata(&path).await.ok();
        if let Some(meta) = &existing {
            if meta.is_dir() {
                return ToolOutput::invalid_argument(format!(
                    "Path is a directory: {}",
                    path.display()
                ));
            }
            if params.create_only {
                return ToolOutput::failure(
                    ErrorCode::PreconditionFailed,
                    format!("File already exists: {}", path.display()),
                );
            }
        }

        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                return ToolOutput::failure(
                    ErrorCode::from_io(&e),
                    format!("Failed to create parent directories: {}", e),
                );
            }
        }

        // Re-check once the directories exist: a symlink swapped in since the
        // first check must not redirect the write.
        let path = match ctx.policy.authorize_path(&path) {
            Ok(p) => p,
            Err(denial) => return denial.into(),
        };

        let mut backup = None;
        if existing.is_some() {
            if let Some(dir) = &ctx.backup_dir {
                match backup_file(dir, &path).await {
                    Ok(p) => backup = Some(p.display().to_string()),
                    Err(e) => {
                        return ToolOutput::failure(
                            ErrorCode::ToolError,
                            format!("Failed to back up {}: {}", path.display(), e),
                        )
                    }
                }
            }
        }

        if let Err(e) = atomic_write(&path, params.content.as_bytes()).await {
            return ToolOutput::failure(
                ErrorCode::from_io(&e),
                format!("Failed to write file: {}", e),
            );
        }

        tracing::debug!(path = %path.display(), bytes = params.content.len(), "File written");

        ToolOutput::success(json!({
            "path": path.display().to_string(),
            "bytes_written": params.content.len(),
            "created": existing.is_none(),
            "backup": backup,
        }))
    }
}
