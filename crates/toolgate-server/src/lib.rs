//! toolgate server
//!
//! OpenAI-compatible HTTP surface in front of a model backend. Chat requests
//! run through the core orchestrator, which executes the model's tool calls
//! inside the configured sandbox. Everything else under `/v1` is proxied.
//! The server is started via `start_server()`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{http::Method, middleware, routing::get, Json, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use toolgate_core::agent::build_tool_registry;
use toolgate_core::ai::BackendClient;
use toolgate_core::constants::server::SERVICE_NAME;
use toolgate_core::{GatewayConfig, Orchestrator, OrchestratorConfig};

pub mod auth;
pub mod error;
pub mod routes;
pub mod types;

use types::HealthResponse;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Backend client, also used directly by the models and proxy routes.
    pub backend: Arc<BackendClient>,
    /// Bearer key clients must present. `None` disables auth.
    pub api_key: Option<Arc<str>>,
    pub model_name: Arc<str>,
    pub working_dir: Arc<PathBuf>,
}

/// Build shared state from configuration. Tools operate relative to
/// `working_dir`.
pub fn build_state(config: &GatewayConfig, working_dir: PathBuf) -> anyhow::Result<AppState> {
    let backend = Arc::new(BackendClient::new(&config.model).context("invalid model backend")?);
    let registry = Arc::new(build_tool_registry(config, &working_dir)?);

    let tool_names: Vec<String> = registry.ai_tools().into_iter().map(|t| t.name).collect();
    tracing::info!(
        tools = ?tool_names,
        auto_apply_edits = config.tools.auto_apply_edits,
        max_tool_rounds = config.orchestration.max_tool_rounds,
        "Tool registry ready"
    );

    let orchestrator = Arc::new(Orchestrator::new(
        backend.clone(),
        registry,
        OrchestratorConfig::from_gateway(config),
    ));

    let api_key: Option<Arc<str>> = config
        .server
        .api_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .map(Arc::from);
    if api_key.is_none() {
        tracing::warn!("server.api_key is not set; authentication is disabled");
    }

    Ok(AppState {
        orchestrator,
        backend,
        api_key,
        model_name: Arc::from(config.model.model_name.as_str()),
        working_dir: Arc::new(working_dir),
    })
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .merge(
            routes::api_router().layer(middleware::from_fn_with_state(
                state.clone(),
                auth::auth_middleware,
            )),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway and block until Ctrl-C.
pub async fn start_server(config: GatewayConfig, working_dir: PathBuf) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let state = build_state(&config, working_dir)?;
    tracing::info!(
        backend = %state.backend.base_url(),
        working_dir = %state.working_dir.display(),
        "toolgate listening on http://{}",
        addr
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("toolgate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl+c: {}", e);
        // Without a signal handler the server runs until killed.
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        routing::post,
    };
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Local stand-in for the model backend. The first chat call asks for
    /// `list_directory`; later calls answer with text.
    async fn spawn_fake_backend() -> (String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let app = Router::new()
            .route(
                "/v1/chat/completions",
                post(move |Json(body): Json<Value>| {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(body["stream"], false);
                        let message = if n == 0 {
                            json!({
                                "role": "assistant",
                                "content": null,
                                "tool_calls": [{
                                    "id": "call_ls",
                                    "type": "function",
                                    "function": { "name": "list_directory", "arguments": "{\"path\":\".\"}" }
                                }]
                            })
                        } else {
                            json!({ "role": "assistant", "content": "Found notes.txt" })
                        };
                        Json(json!({
                            "id": "chatcmpl-fake",
                            "object": "chat.completion",
                            "model": "fake-model",
                            "choices": [{ "index": 0, "message": message, "finish_reason": "stop" }],
                            "usage": { "prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6 }
                        }))
                    }
                }),
            )
            .route(
                "/v1/models",
                get(|| async { Json(json!({ "object": "list", "data": [{ "id": "fake-model" }] })) }),
            )
            .route(
                "/v1/embeddings",
                post(|body: String| async move { format!("echo:{}", body) }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), calls)
    }

    fn config_for(endpoint: &str, api_key: Option<&str>) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.model.endpoint = endpoint.to_string();
        config.model.max_retries = 0;
        config.model.timeout_secs = 5;
        config.server.api_key = api_key.map(str::to_string);
        config
    }

    fn app(config: &GatewayConfig, dir: &TempDir) -> Router {
        build_router(build_state(config, dir.path().to_path_buf()).unwrap())
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn chat_request(body: Value, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(key) = key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", key));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let dir = TempDir::new().unwrap();
        let app = app(&config_for("http://127.0.0.1:9", Some("k")), &dir);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "status": "healthy", "service": "toolgate" })
        );
    }

    #[tokio::test]
    async fn api_requires_bearer_key() {
        let dir = TempDir::new().unwrap();
        let app = app(&config_for("http://127.0.0.1:9", Some("secret")), &dir);

        let missing = app
            .clone()
            .oneshot(Request::get("/v1/tools").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(missing).await["error"]["type"],
            "authentication_error"
        );

        let ok = app
            .oneshot(
                Request::get("/v1/tools")
                    .header(header::AUTHORIZATION, "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        let body = json_body(ok).await;
        assert!(body["data"]
            .as_array()
            .unwrap()
            .iter()
            .any(|t| t["function"]["name"] == "grep"));
    }

    #[tokio::test]
    async fn chat_runs_tool_loop_against_backend() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let (endpoint, calls) = spawn_fake_backend().await;
        let app = app(&config_for(&endpoint, None), &dir);

        let response = app
            .oneshot(chat_request(
                json!({ "messages": [{ "role": "user", "content": "list files" }] }),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["choices"][0]["message"]["content"], "Found notes.txt");
        assert_eq!(body["toolgate"]["rounds"], 1);
        let history = body["toolgate"]["messages"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["tool_calls"][0]["id"], "call_ls");
        assert_eq!(history[1]["tool_call_id"], "call_ls");
        assert_eq!(body["usage"]["total_tokens"], 12);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn streaming_chat_ends_with_done() {
        let dir = TempDir::new().unwrap();
        let (endpoint, _calls) = spawn_fake_backend().await;
        let app = app(&config_for(&endpoint, None), &dir);

        let response = app
            .oneshot(chat_request(
                json!({ "stream": true, "messages": [{ "role": "user", "content": "hi" }] }),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("chat.completion.chunk"));
        assert!(text.contains("Found notes.txt"));
        assert!(text.trim_end().ends_with("data: [DONE]"));
    }

    #[tokio::test]
    async fn unreachable_backend_is_bad_gateway() {
        let dir = TempDir::new().unwrap();
        let app = app(&config_for("http://127.0.0.1:9", None), &dir);

        let response = app
            .oneshot(chat_request(
                json!({ "messages": [{ "role": "user", "content": "hi" }] }),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            json_body(response).await["error"]["code"],
            "backend_unavailable"
        );
    }

    #[tokio::test]
    async fn malformed_request_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let app = app(&config_for("http://127.0.0.1:9", None), &dir);

        let response = app
            .oneshot(
                Request::post("/v1/chat/completions")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn models_fall_back_to_configured_model() {
        let dir = TempDir::new().unwrap();
        let mut config = config_for("http://127.0.0.1:9", None);
        config.model.model_name = "local-qwen".into();
        let app = app(&config, &dir);

        let response = app
            .oneshot(Request::get("/v1/models").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["data"][0]["id"], "local-qwen");
    }

    #[tokio::test]
    async fn models_and_unknown_paths_are_proxied() {
        let dir = TempDir::new().unwrap();
        let (endpoint, _calls) = spawn_fake_backend().await;
        let app = app(&config_for(&endpoint, None), &dir);

        let models = app
            .clone()
            .oneshot(Request::get("/v1/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(models).await["data"][0]["id"], "fake-model");

        let proxied = app
            .clone()
            .oneshot(
                Request::post("/v1/embeddings")
                    .header(header::CONTENT_TYPE, "text/plain")
                    .body(Body::from("abc"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(proxied.status(), StatusCode::OK);
        let bytes = to_bytes(proxied.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"echo:abc");

        let outside = app
            .oneshot(Request::get("/admin").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(outside.status(), StatusCode::NOT_FOUND);
    }
}
