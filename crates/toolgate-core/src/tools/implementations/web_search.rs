//! web_search - Query a configured search provider
//!
//! The provider is anything that speaks a SearxNG-style JSON API
//! (`GET {endpoint}?q=...&format=json` returning `{"results": [...]}`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::config::WebSearchSection;
use crate::error::ErrorCode;
use crate::tools::parse_params;
use crate::tools::registry::{ExecutionContext, Tool, ToolName, ToolOutput};

const MAX_SNIPPET_CHARS: usize = 500;
const HARD_MAX_RESULTS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

pub struct HttpSearchProvider {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpSearchProvider {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .with_context(|| format!("invalid web search endpoint '{}'", endpoint))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build web search client")?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}...", cut)
}

/// Accepts `results` (SearxNG) or `web.results` (Brave-style) arrays.
fn parse_results(body: &Value, limit: usize) -> Vec<SearchHit> {
    let results = body
        .get("results")
        .or_else(|| body.get("web").and_then(|w| w.get("results")))
        .and_then(Value::as_array);

    let Some(results) = results else {
        return Vec::new();
    };

    results
        .iter()
        .filter_map(|r| {
            let url = r.get("url").and_then(Value::as_str)?;
            let title = r.get("title").and_then(Value::as_str).unwrap_or(url);
            let snippet = ["content", "snippet", "description"]
                .iter()
                .find_map(|k| r.get(*k).and_then(Value::as_str))
                .unwrap_or_default();
            Some(SearchHit {
                title: title.trim().to_string(),
                url: url.to_string(),
                snippet: truncate_chars(snippet.trim(), MAX_SNIPPET_CHARS),
            })
        })
        .take(limit)
        .collect()
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let mut request = self
            .client
            .get(self.endpoint.clone())
            .query(&[("q", query), ("format", "json")]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("search provider returned HTTP {}", status.as_u16()));
        }
        let body: Value = response
            .json()
            .await
            .context("search provider returned invalid JSON")?;

        Ok(parse_results(&body, limit))
    }
}

pub struct WebSearchTool {
    provider: Arc<dyn SearchProvider>,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>, max_results: usize) -> Self {
        Self {
            provider,
            max_results: max_results.clamp(1, HARD_MAX_RESULTS),
        }
    }

    pub fn from_config(section: &WebSearchSection) -> Result<Self> {
        let endpoint = section
            .endpoint
            .as_deref()
            .ok_or_else(|| anyhow!("tools.web_search.endpoint is not set"))?;
        let provider = HttpSearchProvider::new(
            endpoint,
            section.api_key.clone(),
            Duration::from_secs(section.timeout_secs),
        )?;
        Ok(Self::new(Arc::new(provider), section.max_results))
    }
}

#[derive(Deserialize)]
struct Params {
    query: String,
    #[serde(default)]
    num_results: Option<usize>,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> ToolName {
        ToolName::WebSearch
    }

    fn description(&self) -> &str {
        "Search the web. Returns titles, URLs and snippets."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "num_results": {
                    "type": "number",
                    "description": "Number of results to return"
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
        let query = params.query.trim();
        if query.is_empty() {
            return ToolOutput::invalid_argument("query is empty");
        }
        let limit = params
            .num_results
            .unwrap_or(self.max_results)
            .clamp(1, self.max_results);

        tracing::info!(query = %query, limit, "Executing web search");

        let hits = match self.provider.search(query, limit).await {
            Ok(hits) => hits,
            Err(e) => {
                let timed_out = e
                    .downcast_ref::<reqwest::Error>()
                    .is_some_and(|r| r.is_timeout());
                let code = if timed_out {
                    ErrorCode::Timeout
                } else {
                    ErrorCode::ToolError
                };
                return ToolOutput::failure(code, format!("Web search failed: {:#}", e));
            }
        };

        // Cap by rendered lines too, so a provider cannot flood the conversation.
        let max_hits = (ctx.policy.max_output_lines() / 3).max(1);
        let truncated = hits.len() > max_hits;
        let hits: Vec<&SearchHit> = hits.iter().take(max_hits).collect();

        ToolOutput::success_truncated(
            json!({
                "query": query,
                "results": hits,
                "count": hits.len(),
            }),
            truncated,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{PolicyConfig, PolicyEngine};
    use crate::tools::registry::ToolEnvironment;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeProvider {
        seen: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl SearchProvider for FakeProvider {
        async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
            self.seen.lock().unwrap().push((query.to_string(), limit));
            Ok((0..limit)
                .map(|i| SearchHit {
                    title: format!("Result {i}"),
                    url: format!("https://example.com/{i}"),
                    snippet: String::new(),
                })
                .collect())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl SearchProvider for FailingProvider {
        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchHit>> {
            Err(anyhow!("connection refused"))
        }
    }

    fn ctx_for(dir: &TempDir) -> ExecutionContext {
        let policy = PolicyEngine::new(PolicyConfig::rooted_at(dir.path()));
        let env = ToolEnvironment::new(dir.path().to_path_buf(), Arc::new(policy));
        ExecutionContext::new("call", &env, Duration::from_secs(5))
    }

    #[test]
    fn parses_searxng_and_brave_shapes() {
        let searx = json!({
            "results": [
                { "title": "Rust", "url": "https://rust-lang.org", "content": "A language" },
                { "title": "No url" }
            ]
        });
        let hits = parse_results(&searx, 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].snippet, "A language");

        let brave = json!({ "web": { "results": [
            { "title": "T", "url": "https://a.b", "description": "D" }
        ]}});
        assert_eq!(parse_results(&brave, 10)[0].snippet, "D");
        assert!(parse_results(&json!({}), 10).is_empty());
    }

    #[tokio::test]
    async fn requested_count_is_clamped_to_configured_max() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(FakeProvider {
            seen: Mutex::new(Vec::new()),
        });
        let tool = WebSearchTool::new(provider.clone(), 5);

        let out = tool
            .execute(json!({ "query": "tokio", "num_results": 50 }), &ctx_for(&dir))
            .await;

        assert!(out.success);
        assert_eq!(out.payload["count"], 5);
        assert_eq!(provider.seen.lock().unwrap()[0], ("tokio".to_string(), 5));
    }

    #[tokio::test]
    async fn provider_failure_is_a_tool_error() {
        let dir = TempDir::new().unwrap();
        let tool = WebSearchTool::new(Arc::new(FailingProvider), 5);
        let out = tool.execute(json!({ "query": "x" }), &ctx_for(&dir)).await;
        assert_eq!(out.error_code(), Some(ErrorCode::ToolError));
    }

    #[test]
    fn from_config_requires_endpoint() {
        let section = WebSearchSection::default();
        assert!(WebSearchTool::from_config(&section).is_err());
    }
}
