//! Tool listing endpoint

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// Tool definitions the gateway executes, in OpenAI `tools` format.
pub async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    let tools = state.orchestrator.advertised_tools();
    Json(json!({ "object": "list", "data": tools }))
}
