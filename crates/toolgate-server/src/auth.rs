//! Bearer-token auth middleware.
//!
//! With no `server.api_key` configured every request passes; startup logs a
//! warning in that case.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::AppState;

/// Compare without short-circuiting. A length mismatch does not return
/// early: both inputs are walked to the longer length, so timing depends on
/// that length only, not on where the first differing byte sits.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len = a.len().max(b.len());
    let mut diff = a.len() ^ b.len();
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    diff == 0
}

fn bearer_token(request: &Request) -> Option<&str> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

/// Middleware that rejects requests without the configured bearer key.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };

    let provided = bearer_token(&request).map(str::to_owned);
    if let Some(token) = provided.as_deref() {
        if constant_time_eq(token.as_bytes(), expected.as_bytes()) {
            return next.run(request).await;
        }
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());
    tracing::warn!(
        peer = peer.as_deref().unwrap_or("unknown"),
        path = %request.uri().path(),
        has_token = provided.is_some(),
        "Rejected unauthenticated request"
    );
    let message = if provided.is_some() {
        "Incorrect API key provided"
    } else {
        "Missing bearer token in Authorization header"
    };
    AppError::Unauthorized(message.to_string()).into_response()
}
