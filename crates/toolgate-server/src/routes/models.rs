//! Model listing endpoint

use axum::{extract::State, Json};
use serde_json::Value;

use toolgate_core::ai::ChatBackend;

use crate::types::fallback_models;
use crate::AppState;

/// Proxy the backend's model list; fall back to the configured model so
/// clients can still pick something when the backend is down.
pub async fn list_models(State(state): State<AppState>) -> Json<Value> {
    match state.backend.list_models().await {
        Ok(models) => Json(models),
        Err(e) => {
            tracing::warn!(error = %e, "Backend model list unavailable, using configured model");
            Json(fallback_models(
                &state.model_name,
                chrono::Utc::now().timestamp(),
            ))
        }
    }
}
