//! Pass-through proxy for backend endpoints the gateway does not interpret

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, Method, Uri},
    response::Response,
};

use crate::error::AppError;
use crate::AppState;

/// Forward any other `/v1/*` request verbatim and stream the reply back.
pub async fn forward(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let path = uri.path();
    if !path.starts_with("/v1/") {
        return Err(AppError::NotFound(format!("No route for {} {}", method, path)));
    }
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(path);
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    tracing::debug!(method = %method, path = %path_and_query, "Proxying to backend");

    // reqwest and axum share the `http` crate, so method and status carry over.
    let upstream = state
        .backend
        .forward(method, path_and_query, content_type, body.to_vec())
        .await?;

    let mut builder = Response::builder().status(upstream.status());
    if let Some(content_type) = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| AppError::Internal(format!("Failed to build proxy response: {}", e)))
}
