//! HTTP client for the OpenAI-compatible model backend

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::ai::format::{build_request_body, parse_response};
use crate::ai::retry::{with_retry, RetryConfig};
use crate::ai::types::{BackendResponse, ChatRequest};
use crate::config::ModelSection;
use crate::constants::backend;
use crate::error::GatewayError;

/// Longest backend error body echoed into an error message.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// The model side of a conversation. The orchestrator only talks to this
/// trait, so tests can script backend replies.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// One non-streaming chat completion.
    async fn complete(&self, request: &ChatRequest) -> Result<BackendResponse, GatewayError>;

    /// The backend's model list, as returned by `GET /v1/models`.
    async fn list_models(&self) -> Result<Value, GatewayError>;
}

pub struct BackendClient {
    http: reqwest::Client,
    base: Url,
    api_key: Option<String>,
    model_name: String,
    retry: RetryConfig,
}

impl BackendClient {
    pub fn new(section: &ModelSection) -> Result<Self, GatewayError> {
        let base = parse_base_url(&section.endpoint)?;
        let http = reqwest::Client::builder()
            .timeout(section.timeout())
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base,
            api_key: section.api_key.clone().filter(|k| !k.is_empty()),
            model_name: section.model_name.clone(),
            retry: RetryConfig::with_max_retries(section.max_retries),
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn default_model(&self) -> &str {
        &self.model_name
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Absolute URL for a path such as `/v1/models`.
    pub fn url_for(&self, path_and_query: &str) -> Result<Url, GatewayError> {
        self.base
            .join(path_and_query.trim_start_matches('/'))
            .map_err(|e| GatewayError::Config(format!("invalid backend path '{}': {}", path_and_query, e)))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn post_json_once(&self, url: &Url, body: &Value) -> Result<Value, GatewayError> {
        let response = self
            .authorized(self.http.post(url.clone()))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }

    /// Forward a raw request to the backend unchanged. Used for endpoints the
    /// gateway does not interpret; the response is handed back for streaming.
    pub async fn forward(
        &self,
        method: Method,
        path_and_query: &str,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) -> Result<reqwest::Response, GatewayError> {
        let url = self.url_for(path_and_query)?;
        debug!(method = %method, url = %url, "Forwarding request to backend");

        let mut request = self.authorized(self.http.request(method, url));
        if let Some(content_type) = content_type {
            request = request.header(reqwest::header::CONTENT_TYPE, content_type);
        }
        if !body.is_empty() {
            request = request.body(body);
        }
        request.send().await.map_err(transport_error)
    }
}

#[async_trait]
impl ChatBackend for BackendClient {
    async fn complete(&self, request: &ChatRequest) -> Result<BackendResponse, GatewayError> {
        let url = self.url_for(backend::CHAT_COMPLETIONS_PATH)?;
        let body = build_request_body(request);

        info!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Calling backend"
        );

        let raw = with_retry(&self.retry, || self.post_json_once(&url, &body)).await?;
        parse_response(&raw)
    }

    async fn list_models(&self) -> Result<Value, GatewayError> {
        let url = self.url_for(backend::MODELS_PATH)?;
        with_retry(&self.retry, || async {
            let response = self
                .authorized(self.http.get(url.clone()))
                .send()
                .await
                .map_err(transport_error)?;
            read_json(response).await
        })
        .await
    }
}

/// Accepts `http://host:port`, `http://host:port/` and `http://host:port/v1`.
/// The result always ends in `/` so relative joins keep any prefix path.
fn parse_base_url(endpoint: &str) -> Result<Url, GatewayError> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix("/v1").unwrap_or(trimmed);
    Url::parse(&format!("{}/", trimmed))
        .map_err(|e| GatewayError::Config(format!("invalid model endpoint '{}': {}", endpoint, e)))
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::BackendUnavailable(format!("request timed out: {}", e))
    } else if e.is_connect() {
        GatewayError::BackendUnavailable(format!("connection failed: {}", e))
    } else {
        GatewayError::BackendUnavailable(e.to_string())
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, GatewayError> {
    let status = response.status();
    let text = response.text().await.map_err(transport_error)?;

    if !status.is_success() {
        return Err(GatewayError::BackendStatus {
            status: status.as_u16(),
            message: error_message(status, &text),
        });
    }

    serde_json::from_str(&text).map_err(|e| {
        GatewayError::MalformedBackendResponse(format!("response is not valid JSON: {}", e))
    })
}

/// Prefer the OpenAI `error.message` field; fall back to the raw body.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<Value>(body) {
        let message = parsed
            .pointer("/error/message")
            .or_else(|| parsed.get("message"))
            .or_else(|| parsed.get("detail"))
            .and_then(Value::as_str);
        if let Some(message) = message {
            return message.to_string();
        }
    }
    let body = body.trim();
    if body.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("backend error")
            .to_string();
    }
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
