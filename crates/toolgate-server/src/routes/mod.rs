//! API routes

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

mod chat;
mod models;
mod proxy;
mod tools;

/// Build the authenticated `/v1` router. Paths without a dedicated handler
/// fall through to the backend proxy.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/models", get(models::list_models))
        .route("/v1/tools", get(tools::list_tools))
        .fallback(proxy::forward)
}
