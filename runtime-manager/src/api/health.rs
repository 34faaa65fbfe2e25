//! Health check endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health - Liveness plus the names of the registered engines.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let engines: Vec<String> = state
        .engines
        .all()
        .await
        .into_iter()
        .map(|entry| entry.engine.name().to_string())
        .collect();

    (StatusCode::OK, Json(json!({ "status": "ok", "engines": engines })))
}
