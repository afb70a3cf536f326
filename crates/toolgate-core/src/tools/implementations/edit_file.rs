//! edit_file - Replace a file's content or a line range, guarded by an
//! exact-match precondition

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use similar::TextDiff;
use tokio::fs;

use crate::error::ErrorCode;
use crate::tools::fs_ops::{atomic_write, backup_file};
use crate::tools::parse_params;
use crate::tools::registry::{ExecutionContext, Tool, ToolCategory, ToolName, ToolOutput};

pub struct EditFileTool;

#[derive(Deserialize)]
struct Params {
    #[serde(alias = "path")]
    file_path: String,
    /// Replacement text: the whole file, or the lines of the range.
    content: String,
    #[serde(default)]
    start_line: Option<usize>,
    #[serde(default)]
    end_line: Option<usize>,
    /// What the caller believes is currently there.
    #[serde(default, alias = "expected_content")]
    old_content: Option<String>,
}

fn generate_compact_diff(old: &str, new: &str, path: &std::path::Path) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut output = String::new();
    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        output.push_str(&format!("{}", hunk));
    }
    if output.is_empty() {
        return String::new();
    }
    format!("--- {}\n+++ {}\n{}", path.display(), path.display(), output)
}

fn line_ending(text: &str) -> &'static str {
    if text.contains("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

fn strip_eol(line: &str) -> &str {
    line.strip_suffix("\r\n")
        .or_else(|| line.strip_suffix('\n'))
        .unwrap_or(line)
}

/// Splice `replacement` over 1-based inclusive `start..=end`, keeping the
/// file's line endings. Returns the text that was replaced and the new file.
fn splice_lines(
    current: &str,
    start: usize,
    end: usize,
    replacement: &str,
) -> Result<(String, String), String> {
    let lines: Vec<&str> = current.split_inclusive('\n').collect();
    if start == 0 || end < start || start > lines.len() || end > lines.len() {
        return Err(format!(
            "Invalid line range {}-{} for a file with {} lines",
            start,
            end,
            lines.len()
        ));
    }

    let eol = line_ending(current);
    let replaced = lines[start - 1..end]
        .iter()
        .map(|l| strip_eol(l))
        .collect::<Vec<_>>()
        .join("\n");

    let mut updated = String::with_capacity(current.len() + replacement.len());
    for line in &lines[..start - 1] {
        updated.push_str(line);
    }
    let last_had_eol = lines[end - 1].ends_with('\n');
    let replacement_lines: Vec<&str> = replacement.lines().collect();
    for (i, line) in replacement_lines.iter().enumerate() {
        updated.push_str(line);
        let is_last = i + 1 == replacement_lines.len();
        if !is_last || last_had_eol || end < lines.len() {
            updated.push_str(eol);
        }
    }
    for line in &lines[end..] {
        updated.push_str(line);
    }

    Ok((replaced, updated))
}

fn normalize_expected(expected: &str) -> &str {
    let trimmed = expected.strip_suffix('\n').unwrap_or(expected);
    trimmed.strip_suffix('\r').unwrap_or(trimmed)
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> ToolName {
        ToolName::EditFile
    }

    fn description(&self) -> &str {
        "Edit an existing file. Without start_line/end_line, replaces the whole file. \
         With a 1-indexed inclusive line range, replaces those lines and requires old_content \
         to match them exactly; a mismatch fails with precondition_failed."
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
                    "description": "New content for the whole file or for the line range"
                },
                "start_line": {
                    "type": "number",
                    "description": "First line to replace (1-indexed, inclusive)"
                },
                "end_line": {
                    "type": "number",
                    "description": "Last line to replace (1-indexed, inclusive)"
                },
                "old_content": {
                    "type": "string",
                    "description": "Exact current text being replaced. Required for line-range edits."
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

        let range = match (params.start_line, params.end_line) {
            (None, None) => None,
            (Some(start), Some(end)) => Some((start, end)),
            (Some(start), None) => Some((start, start)),
            (None, Some(_)) => {
                return ToolOutput::invalid_argument("end_line requires start_line");
            }
        };
        if range.is_some() && params.old_content.is_none() {
            return ToolOutput::invalid_argument("Line-range edits require old_content");
        }

        let path = match ctx.authorize_path(&params.file_path) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let _guard = ctx.path_locks.lock(&path).await;

        // Re-validate under the lock, right before the read-modify-write.
        let path = match ctx.policy.authorize_path(&path) {
            Ok(p) => p,
            Err(denial) => return denial.into(),
        };

        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ToolOutput::failure(
                    ErrorCode::NotFound,
                    format!("File not found: {}", params.file_path),
                );
            }
            Err(e) => return ToolOutput::failure(ErrorCode::from_io(&e), e),
        };
        if !metadata.is_file() {
            return ToolOutput::invalid_argument(format!("Path is not a file: {}", path.display()));
        }
        if metadata.len() > ctx.policy.max_file_size() {
            return ToolOutput::failure(
                ErrorCode::FileTooLarge,
                format!("File exceeds the {} byte limit", ctx.policy.max_file_size()),
            );
        }

        let current = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                return ToolOutput::failure(
                    ErrorCode::from_io(&e),
                    format!("Failed to read file: {}", e),
                )
            }
        };

        let updated = match range {
            None => {
                if let Some(expected) = &params.old_content {
                    if expected != &current {
                        return ToolOutput::failure(
                            ErrorCode::PreconditionFailed,
                            "File content does not match old_content; re-read the file and retry",
                        );
                    }
                }
                params.content.clone()
            }
            Some((start, end)) => {
                let (replaced, updated) = match splice_lines(&current, start, end, &params.content)
                {
                    Ok(v) => v,
                    Err(msg) => return ToolOutput::invalid_argument(msg),
                };
                let expected = params.old_content.as_deref().unwrap_or_default();
                if normalize_expected(expected) != replaced {
                    return ToolOutput::failure_with_data(
                        ErrorCode::PreconditionFailed,
                        format!(
                            "Lines {}-{} do not match old_content; re-read the file and retry",
                            start, end
                        ),
                        json!({ "current": replaced }),
                    );
                }
                updated
            }
        };

        if updated.len() as u64 > ctx.policy.max_file_size() {
            return ToolOutput::failure(
                ErrorCode::FileTooLarge,
                format!("Edited file would exceed the {} byte limit", ctx.policy.max_file_size()),
            );
        }

        let mut backup = None;
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

        if let Err(e) = atomic_write(&path, updated.as_bytes()).await {
            return ToolOutput::failure(
                ErrorCode::from_io(&e),
                format!("Failed to write file: {}", e),
            );
        }

        let diff = generate_compact_diff(&current, &updated, &path);
        let clamped = ctx.policy.clamp_output(&diff);

        ToolOutput::success_truncated(
            json!({
                "path": path.display().to_string(),
                "mode": if range.is_some() { "line_range" } else { "full_replace" },
                "diff": clamped.text,
                "backup": backup,
            }),
            clamped.truncated,
        )
    }
}
