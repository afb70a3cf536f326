//! grep - Regex or literal content search under an allowed root

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::constants::limits;
use crate::error::ErrorCode;
use crate::policy::PolicyEngine;
use crate::tools::fs_ops::{looks_binary, sandboxed_walk};
use crate::tools::parse_params;
use crate::tools::registry::{ExecutionContext, Tool, ToolName, ToolOutput};

/// Lines longer than this are cut in the match payload.
const MAX_LINE_CHARS: usize = 500;

pub struct GrepTool;

fn default_true() -> bool {
    true
}

fn default_path() -> String {
    ".".to_string()
}

#[derive(Deserialize)]
struct Params {
    pattern: String,
    #[serde(default = "default_path", alias = "directory")]
    path: String,
    #[serde(default = "default_true")]
    case_insensitive: bool,
    #[serde(default)]
    literal: bool,
    #[serde(default, alias = "glob", alias = "include")]
    file_pattern: Option<String>,
}

struct Match {
    file: String,
    line_number: usize,
    line: String,
}

struct Scan {
    matches: Vec<Match>,
    files_searched: usize,
    binary_skipped: usize,
    truncated: bool,
}

fn build_regex(pattern: &str, literal: bool, case_insensitive: bool) -> Result<Regex, regex::Error> {
    let source = if literal {
        regex::escape(pattern)
    } else {
        pattern.to_string()
    };
    RegexBuilder::new(&source)
        .case_insensitive(case_insensitive)
        .size_limit(1 << 20)
        .build()
}

fn shorten(line: &str) -> String {
    if line.chars().count() <= MAX_LINE_CHARS {
        return line.to_string();
    }
    let cut: String = line.chars().take(MAX_LINE_CHARS).collect();
    format!("{}...", cut)
}

fn scan_file(path: &Path, display: &str, regex: &Regex, max_size: u64, scan: &mut Scan, cap: usize) {
    let Ok(meta) = std::fs::metadata(path) else {
        return;
    };
    if meta.len() > max_size {
        return;
    }
    let Ok(mut file) = std::fs::File::open(path) else {
        return;
    };

    let mut head = vec![0u8; limits::BINARY_SNIFF_BYTES];
    let Ok(read) = file.read(&mut head) else {
        return;
    };
    head.truncate(read);
    if looks_binary(&head, limits::BINARY_SNIFF_BYTES) {
        scan.binary_skipped += 1;
        return;
    }
    scan.files_searched += 1;

    let reader = BufReader::new(std::io::Cursor::new(head).chain(file));
    for (index, line) in reader.split(b'\n').enumerate() {
        let Ok(bytes) = line else { break };
        let text = String::from_utf8_lossy(&bytes);
        let text = text.strip_suffix('\r').unwrap_or(&text);
        if regex.is_match(text) {
            if scan.matches.len() >= cap {
                scan.truncated = true;
                return;
            }
            scan.matches.push(Match {
                file: display.to_string(),
                line_number: index + 1,
                line: shorten(text),
            });
        }
    }
}

fn run_scan(
    root: &Path,
    policy: Arc<PolicyEngine>,
    regex: &Regex,
    file_pattern: Option<&str>,
    deadline: Instant,
) -> Result<Scan, ignore::Error> {
    let cap = policy.max_output_lines();
    let max_size = policy.max_file_size();
    let mut scan = Scan {
        matches: Vec::new(),
        files_searched: 0,
        binary_skipped: 0,
        truncated: false,
    };

    // A single file is searched directly.
    if root.is_file() {
        let display = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        scan_file(root, &display, regex, max_size, &mut scan, cap);
        return Ok(scan);
    }

    for entry in sandboxed_walk(root, policy, file_pattern)? {
        if scan.truncated {
            break;
        }
        if Instant::now() >= deadline {
            scan.truncated = true;
            break;
        }
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let display = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();
        scan_file(entry.path(), &display, regex, max_size, &mut scan, cap);
    }

    Ok(scan)
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> ToolName {
        ToolName::Grep
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression (or a literal string). \
         Case-insensitive by default. Binary files and ignored paths are skipped."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression, or plain text when literal is true"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search (default: the workspace)"
                },
                "case_insensitive": {
                    "type": "boolean",
                    "description": "Ignore case (default: true)"
                },
                "literal": {
                    "type": "boolean",
                    "description": "Treat pattern as plain text (default: false)"
                },
                "file_pattern": {
                    "type": "string",
                    "description": "Glob restricting which files are searched, e.g. \"*.rs\""
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> ToolOutput {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if params.pattern.is_empty() {
            return ToolOutput::invalid_argument("pattern is empty");
        }

        let regex = match build_regex(&params.pattern, params.literal, params.case_insensitive) {
            Ok(r) => r,
            Err(e) => return ToolOutput::invalid_argument(format!("Invalid regex: {}", e)),
        };

        let root = match ctx.authorize_path(&params.path) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if !root.exists() {
            return ToolOutput::failure(
                ErrorCode::NotFound,
                format!("Path not found: {}", params.path),
            );
        }

        let policy = ctx.policy.clone();
        let deadline = Instant::now() + ctx.remaining();
        let file_pattern = params.file_pattern.clone();
        let walk_root = root.clone();
        let joined = tokio::task::spawn_blocking(move || {
            run_scan(&walk_root, policy, &regex, file_pattern.as_deref(), deadline)
        })
        .await;

        let scan = match joined {
            Ok(Ok(scan)) => scan,
            Ok(Err(e)) => return ToolOutput::invalid_argument(format!("Invalid file_pattern: {}", e)),
            Err(e) => return ToolOutput::failure(ErrorCode::ToolError, e),
        };

        let matches: Vec<Value> = scan
            .matches
            .iter()
            .map(|m| json!({ "file": m.file, "line_number": m.line_number, "line": m.line }))
            .collect();

        ToolOutput::success_truncated(
            json!({
                "pattern": params.pattern,
                "matches": matches,
                "total_matches": matches.len(),
                "files_searched": scan.files_searched,
                "binary_files_skipped": scan.binary_skipped,
            }),
            scan.truncated,
        )
    }
}
