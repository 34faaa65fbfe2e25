//! Tool call endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use runtime_common::ToolCallResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::AppState;

/// Build the tools router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tools/call", post(call_tool))
        .route("/tools/calls", get(in_flight))
        .route("/tools/cancel/:token", post(cancel_tool_call))
}

#[derive(Debug, Deserialize)]
struct ToolCallRequest {
    tool_name: String,
    #[serde(default)]
    arguments: Value,
    #[serde(default)]
    cancellation_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct ToolCallResponse {
    cancellation_token: String,
    #[serde(flatten)]
    result: ToolCallResult,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    cancellation_token: String,
    cancelled: bool,
}

/// POST /v1/tools/call - Run a tool call to completion.
///
/// Failures are reported inside the result, never as an HTTP error.
async fn call_tool(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ToolCallRequest>,
) -> Json<ToolCallResponse> {
    let pending = state
        .tools
        .call_with_cancellation(
            &request.tool_name,
            request.arguments,
            request.cancellation_token,
        )
        .await;
    let cancellation_token = pending.token.clone();
    let result = pending.result().await;

    Json(ToolCallResponse {
        cancellation_token,
        result,
    })
}

/// GET /v1/tools/calls - Tokens of the calls still running.
async fn in_flight(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.tools.in_flight())
}

/// POST /v1/tools/cancel/:token
async fn cancel_tool_call(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Json<CancelResponse> {
    let cancelled = state.tools.cancel(&token).await;
    Json(CancelResponse {
        cancellation_token: token,
        cancelled,
    })
}
