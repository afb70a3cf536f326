//! list_directory - Breadth-first directory listing with depth and entry caps

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::constants::limits;
use crate::error::ErrorCode;
use crate::policy::canonicalize_lenient;
use crate::tools::parse_params;
use crate::tools::registry::{ExecutionContext, Tool, ToolName, ToolOutput};

pub struct ListDirectoryTool;

#[derive(Deserialize)]
struct Params {
    #[serde(default = "default_path", alias = "directory")]
    path: String,
    #[serde(default)]
    recursive: bool,
    #[serde(default)]
    max_depth: Option<usize>,
}

fn default_path() -> String {
    ".".to_string()
}

struct Entry {
    name: String,
    path: PathBuf,
    is_dir: bool,
    is_symlink: bool,
    size: u64,
    modified: Option<String>,
}

impl Entry {
    fn to_json(&self, root: &Path) -> Value {
        let relative = self
            .path
            .strip_prefix(root)
            .unwrap_or(&self.path)
            .to_string_lossy()
            .to_string();
        let kind = if self.is_symlink {
            "symlink"
        } else if self.is_dir {
            "directory"
        } else {
            "file"
        };
        json!({
            "name": self.name,
            "path": relative,
            "type": kind,
            "size": self.size,
            "modified": self.modified,
        })
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> ToolName {
        ToolName::ListDirectory
    }

    fn description(&self) -> &str {
        "List a directory. Set recursive to descend into subdirectories up to max_depth \
         (default 3). Directories are listed before files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (default: the workspace)"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Descend into subdirectories (default: false)"
                },
                "max_depth": {
                    "type": "number",
                    "description": "Maximum recursion depth when recursive (default: 3)"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> ToolOutput {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let max_depth = if params.recursive {
            params.max_depth.unwrap_or(limits::DEFAULT_LIST_DEPTH).max(1)
        } else {
            1
        };

        let root = match ctx.authorize_path(&params.path) {
            Ok(p) => p,
            Err(e) => return e,
        };

        match fs::metadata(&root).await {
            Ok(m) if m.is_dir() => {}
            Ok(_) => {
                return ToolOutput::invalid_argument(format!(
                    "Path is not a directory: {}",
                    root.display()
                ))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ToolOutput::failure(
                    ErrorCode::NotFound,
                    format!("Directory not found: {}", params.path),
                )
            }
            Err(e) => return ToolOutput::failure(ErrorCode::from_io(&e), e),
        }

        let mut entries: Vec<Entry> = Vec::new();
        let mut truncated = false;
        let mut queue: VecDeque<(PathBuf, usize)> = VecDeque::new();
        queue.push_back((root.clone(), 1));

        'walk: while let Some((dir, depth)) = queue.pop_front() {
            let mut dir_entries = match fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) => {
                    tracing::debug!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                    continue;
                }
            };

            let mut children: Vec<Entry> = Vec::new();
            while let Ok(Some(entry)) = dir_entries.next_entry().await {
                let entry_path = entry.path();

                // Symlinks pointing out of bounds are silently omitted.
                let Ok(resolved) = canonicalize_lenient(&entry_path) else {
                    continue;
                };
                if !ctx.policy.is_allowed(&resolved) {
                    continue;
                }

                let is_symlink = entry
                    .file_type()
                    .await
                    .map(|ft| ft.is_symlink())
                    .unwrap_or(false);
                let Ok(meta) = fs::metadata(&entry_path).await else {
                    continue;
                };
                let modified = meta
                    .modified()
                    .ok()
                    .map(|t| DateTime::<Utc>::from(t).to_rfc3339());

                children.push(Entry {
                    name: entry.file_name().to_string_lossy().to_string(),
                    path: entry_path,
                    is_dir: meta.is_dir(),
                    is_symlink,
                    size: if meta.is_dir() { 0 } else { meta.len() },
                    modified,
                });
            }

            children.sort_by(|a, b| {
                b.is_dir
                    .cmp(&a.is_dir)
                    .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                    .then_with(|| a.name.cmp(&b.name))
            });

            for child in children {
                if entries.len() >= limits::MAX_LIST_ENTRIES {
                    truncated = true;
                    break 'walk;
                }
                // Never follow symlinked directories; loops would recurse forever.
                if child.is_dir && !child.is_symlink && depth < max_depth {
                    queue.push_back((child.path.clone(), depth + 1));
                }
                entries.push(child);
            }
        }

        let directories = entries.iter().filter(|e| e.is_dir).count();
        let listing: Vec<Value> = entries.iter().map(|e| e.to_json(&root)).collect();

        ToolOutput::success_truncated(
            json!({
                "path": root.display().to_string(),
                "entries": listing,
                "total_entries": entries.len(),
                "directories": directories,
                "files": entries.len() - directories,
            }),
            truncated,
        )
    }
}
