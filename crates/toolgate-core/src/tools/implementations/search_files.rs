//! search_files - Fuzzy file name search under an allowed root

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::constants::limits;
use crate::error::ErrorCode;
use crate::policy::PolicyEngine;
use crate::tools::fs_ops::sandboxed_walk;
use crate::tools::parse_params;
use crate::tools::registry::{ExecutionContext, Tool, ToolName, ToolOutput};

pub struct SearchFilesTool;

#[derive(Deserialize)]
struct Params {
    #[serde(alias = "pattern")]
    query: String,
    #[serde(default = "default_path", alias = "directory")]
    path: String,
    #[serde(default)]
    max_results: Option<usize>,
}

fn default_path() -> String {
    ".".to_string()
}

#[derive(Debug)]
struct Scored {
    relative: String,
    name: String,
    score: i32,
}

/// Subsequence match; consecutive hits score progressively higher.
fn fuzzy_match(text: &str, pattern: &str) -> Option<i32> {
    let mut pattern_chars = pattern.chars();
    let mut current = pattern_chars.next()?;
    let mut score = 0;
    let mut consecutive = 0;

    for ch in text.chars() {
        if ch == current {
            score += 10 + consecutive * 5;
            consecutive += 1;
            match pattern_chars.next() {
                Some(next) => current = next,
                None => return Some(score),
            }
        } else {
            consecutive = 0;
        }
    }

    None
}

/// exact name > name prefix > name substring > path substring > fuzzy
fn score_candidate(name: &str, path: &str, query: &str) -> i32 {
    let name = name.to_lowercase();
    let path = path.to_lowercase();

    if name == query {
        200
    } else if name.starts_with(query) {
        150
    } else if name.contains(query) {
        100
    } else if path.contains(query) {
        80
    } else if let Some(score) = fuzzy_match(&name, query) {
        score.min(79)
    } else if let Some(score) = fuzzy_match(&path, query) {
        (score / 2).min(79)
    } else {
        0
    }
}

fn rank(mut scored: Vec<Scored>, cap: usize) -> Vec<Scored> {
    scored.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.relative.len().cmp(&b.relative.len()))
            .then_with(|| a.relative.cmp(&b.relative))
    });
    scored.truncate(cap);
    scored
}

fn collect_matches(
    root: &Path,
    policy: Arc<PolicyEngine>,
    query: &str,
    deadline: Instant,
) -> Result<(Vec<Scored>, bool), String> {
    let walker = sandboxed_walk(root, policy, None).map_err(|e| e.to_string())?;
    let mut scored = Vec::new();
    let mut timed_out = false;

    for entry in walker {
        if Instant::now() >= deadline {
            timed_out = true;
            break;
        }
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }

        let path: PathBuf = entry.path().to_path_buf();
        let relative = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .to_string();
        let name = entry.file_name().to_string_lossy().to_string();

        let score = score_candidate(&name, &relative, query);
        if score > 0 {
            scored.push(Scored {
                relative,
                name,
                score,
            });
        }
    }

    Ok((scored, timed_out))
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> ToolName {
        ToolName::SearchFiles
    }

    fn description(&self) -> &str {
        "Find files by name using case-insensitive fuzzy matching. Results are ranked: \
         exact name, then name prefix, name substring, path substring, fuzzy."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "File name or fragment to look for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search (default: the workspace)"
                },
                "max_results": {
                    "type": "number",
                    "description": "Maximum number of matches (default and cap: 50)"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> ToolOutput {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let query = params.query.trim().to_lowercase();
        if query.is_empty() {
            return ToolOutput::invalid_argument("query is empty");
        }
        let cap = params
            .max_results
            .unwrap_or(limits::MAX_SEARCH_RESULTS)
            .clamp(1, limits::MAX_SEARCH_RESULTS);

        let root = match ctx.authorize_path(&params.path) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if !root.is_dir() {
            return ToolOutput::failure(
                ErrorCode::NotFound,
                format!("Directory not found: {}", params.path),
            );
        }

        let policy = ctx.policy.clone();
        let deadline = Instant::now() + ctx.remaining();
        let walk_root = root.clone();
        let walk_query = query.clone();
        let joined = tokio::task::spawn_blocking(move || {
            collect_matches(&walk_root, policy, &walk_query, deadline)
        })
        .await;

        let (scored, timed_out) = match joined {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => return ToolOutput::failure(ErrorCode::ToolError, e),
            Err(e) => return ToolOutput::failure(ErrorCode::ToolError, e),
        };
        if timed_out {
            tracing::warn!(query = %query, "File search hit its deadline, returning partial results");
        }

        let total_matches = scored.len();
        let ranked = rank(scored, cap);
        let matches: Vec<Value> = ranked
            .iter()
            .map(|s| json!({ "path": s.relative, "name": s.name, "score": s.score }))
            .collect();

        ToolOutput::success_truncated(
            json!({
                "query": params.query,
                "matches": matches,
                "total_matches": total_matches,
            }),
            total_matches > cap || timed_out,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyConfig;
    use crate::tools::registry::ToolEnvironment;
    use std::time::Duration;
    use tempfile::TempDir;

    fn ctx_for(dir: &TempDir) -> ExecutionContext {
        let policy = PolicyEngine::new(PolicyConfig::rooted_at(dir.path()));
        let env = ToolEnvironment::new(dir.path().to_path_buf(), Arc::new(policy));
        ExecutionContext::new("call", &env, Duration::from_secs(5))
    }

    #[test]
    fn fuzzy_requires_ordered_subsequence() {
        assert!(fuzzy_match("registry.rs", "rgs").is_some());
        assert!(fuzzy_match("registry.rs", "zz").is_none());
        // Consecutive runs beat scattered hits.
        assert!(fuzzy_match("abc", "abc").unwrap() > fuzzy_match("axbxc", "abc").unwrap());
    }

    #[test]
    fn ranking_tiers() {
        let q = "main.rs";
        assert_eq!(score_candidate("main.rs", "src/main.rs", q), 200);
        assert_eq!(score_candidate("main.rs.bak", "main.rs.bak", q), 150);
        assert_eq!(score_candidate("domain.rs", "domain.rs", "main"), 100);
        assert_eq!(score_candidate("mod.rs", "main/mod.rs", "main"), 80);
        assert!(score_candidate("my_awesome_index.txt", "x", "main") < 80);
        assert_eq!(score_candidate("zzz", "yyy", "main"), 0);
    }

    #[test]
    fn ties_break_by_shorter_then_lexicographic_path() {
        let scored = vec![
            Scored { relative: "b/lib.rs".into(), name: "lib.rs".into(), score: 200 },
            Scored { relative: "a/lib.rs".into(), name: "lib.rs".into(), score: 200 },
            Scored { relative: "lib.rs".into(), name: "lib.rs".into(), score: 200 },
        ];
        let ranked: Vec<String> = rank(scored, 10).into_iter().map(|s| s.relative).collect();
        assert_eq!(ranked, vec!["lib.rs", "a/lib.rs", "b/lib.rs"]);
    }

    #[tokio::test]
    async fn finds_and_ranks_files_case_insensitively() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/tools")).unwrap();
        std::fs::write(dir.path().join("src/tools/Registry.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/registry_test.rs"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();
        let ctx = ctx_for(&dir);

        let out = SearchFilesTool
            .execute(json!({ "query": "registry.rs" }), &ctx)
            .await;

        assert!(out.success, "{:?}", out.error);
        let matches = out.payload["matches"].as_array().unwrap();
        assert_eq!(matches[0]["path"], "src/tools/Registry.rs");
        assert!(matches.iter().all(|m| m["name"] != "README.md"));
    }

    #[tokio::test]
    async fn results_are_capped() {
        let dir = TempDir::new().unwrap();
        for i in 0..60 {
            std::fs::write(dir.path().join(format!("file_{i}.txt")), "").unwrap();
        }
        let ctx = ctx_for(&dir);

        let out = SearchFilesTool
            .execute(json!({ "query": "file" }), &ctx)
            .await;

        assert_eq!(out.payload["matches"].as_array().unwrap().len(), 50);
        assert_eq!(out.payload["total_matches"], 60);
        assert!(out.truncated);
    }

    #[tokio::test]
    async fn empty_query_is_invalid() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_for(&dir);
        let out = SearchFilesTool.execute(json!({ "query": "  " }), &ctx).await;
        assert_eq!(out.error_code(), Some(ErrorCode::InvalidArgument));
    }
}
