//! delete_file - Remove a single file

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::error::ErrorCode;
use crate::tools::fs_ops::backup_file;
use crate::tools::parse_params;
use crate::tools::registry::{ExecutionContext, Tool, ToolCategory, ToolName, ToolOutput};

pub struct DeleteFileTool;

#[derive(Deserialize)]
struct Params {
    #[serde(alias = "path")]
    file_path: String,
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> ToolName {
        ToolName::DeleteFile
    }

    fn description(&self) -> &str {
        "Delete a single file. Directories are not deleted."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file, absolute or relative to the workspace"
                }
            },
            "required": ["file_path"],
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

        if params.file_path.trim().is_empty() {
            return ToolOutput::invalid_argument("path is empty");
        }
        let requested = ctx.resolve_path(&params.file_path);
        let Some(name) = requested.file_name() else {
            return ToolOutput::invalid_argument(format!(
                "Not a file path: {}",
                params.file_path
            ));
        };

        // The entry to unlink is the last component itself, never a symlink
        // target, so only its parent is canonicalized.
        let parent = match requested.parent() {
            Some(parent) => match ctx.policy.authorize_path(parent) {
                Ok(p) => p,
                Err(denial) => return denial.into(),
            },
            None => {
                return ToolOutput::invalid_argument(format!(
                    "Not a file path: {}",
                    params.file_path
                ))
            }
        };
        let path = parent.join(name);

        let _guard = ctx.path_locks.lock(&path).await;

        if let Err(denial) = ctx.policy.check_canonical(&path) {
            return denial.into();
        }

        let metadata = match fs::symlink_metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ToolOutput::failure(
                    ErrorCode::NotFound,
                    format!("File not found: {}", params.file_path),
                );
            }
            Err(e) => return ToolOutput::failure(ErrorCode::from_io(&e), e),
        };
        if metadata.is_dir() {
            return ToolOutput::invalid_argument(format!(
                "Path is a directory: {}",
                path.display()
            ));
        }
        let is_symlink = metadata.file_type().is_symlink();

        let mut backup = None;
        if let (Some(dir), false) = (&ctx.backup_dir, is_symlink) {
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

        if let Err(e) = fs::remove_file(&path).await {
            return ToolOutput::failure(
                ErrorCode::from_io(&e),
                format!("Failed to delete file: {}", e),
            );
        }

        tracing::debug!(path = %path.display(), "File deleted");

        ToolOutput::success(json!({
            "path": path.display().to_string(),
            "deleted": true,
            "symlink": is_symlink,
            "backup": backup,
        }))
    }
}
