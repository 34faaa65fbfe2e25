//! Engine, session and planning endpoints.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use runtime_common::{LoadPlan, SessionInfo, SupportVerdict};
use serde::{Deserialize, Serialize};

use crate::engine::{EngineHandleInfo, ModelInfo, ModelSettings};
use crate::error::Result;
use crate::session::StopAllReport;
use crate::state::AppState;

/// Build the engines router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/engines", get(list_engines))
        .route("/engines/:engine/models", get(list_models))
        .route("/engines/:engine/loaded", get(loaded_models))
        .route("/engines/:engine/models/:model_id/start", post(start_model))
        .route("/engines/:engine/models/:model_id/stop", post(stop_model))
        .route("/engines/:engine/models/:model_id/mmproj", get(check_mmproj))
        .route("/engines/:engine/stop-all", post(stop_all))
        .route("/engines/:engine/support", post(classify_support))
        .route("/engines/:engine/plan", post(plan_load))
}

#[derive(Debug, Serialize)]
struct ModelsResponse {
    engine: String,
    models: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
struct LoadedResponse {
    engine: String,
    models: Vec<String>,
}

#[derive(Debug, Serialize)]
struct StartResponse {
    /// False when the model was already loaded.
    started: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<SessionInfo>,
}

#[derive(Debug, Serialize)]
struct StopResponse {
    model_id: String,
    stopped: bool,
}

#[derive(Debug, Deserialize)]
struct SupportRequest {
    model_path: PathBuf,
    #[serde(default)]
    context_length: Option<u64>,
}

#[derive(Debug, Serialize)]
struct SupportResponse {
    verdict: SupportVerdict,
}

#[derive(Debug, Deserialize)]
struct PlanRequest {
    model_path: PathBuf,
    #[serde(default)]
    mmproj_path: Option<PathBuf>,
    #[serde(default)]
    context_length: Option<u64>,
}

#[derive(Debug, Serialize)]
struct MmprojResponse {
    model_id: String,
    exists: bool,
}

/// GET /v1/engines
async fn list_engines(State(state): State<Arc<AppState>>) -> Json<Vec<EngineHandleInfo>> {
    Json(state.engines.describe().await)
}

/// GET /v1/engines/:engine/models
async fn list_models(
    State(state): State<Arc<AppState>>,
    Path(engine): Path<String>,
) -> Result<Json<ModelsResponse>> {
    let models = state.sessions.list_models(&engine).await?;
    Ok(Json(ModelsResponse { engine, models }))
}

/// GET /v1/engines/:engine/loaded
async fn loaded_models(
    State(state): State<Arc<AppState>>,
    Path(engine): Path<String>,
) -> Result<Json<LoadedResponse>> {
    let models = state.sessions.loaded(&engine).await?;
    Ok(Json(LoadedResponse { engine, models }))
}

/// POST /v1/engines/:engine/models/:model_id/start
///
/// The body, if any, is a settings object using generic or engine keys.
async fn start_model(
    State(state): State<Arc<AppState>>,
    Path((engine, model_id)): Path<(String, String)>,
    settings: Option<Json<ModelSettings>>,
) -> Result<Json<StartResponse>> {
    let settings = settings.map(|Json(s)| s).unwrap_or_default();
    let session = state.sessions.start(&engine, &model_id, &settings).await?;

    Ok(Json(StartResponse {
        started: session.is_some(),
        session,
    }))
}

/// POST /v1/engines/:engine/models/:model_id/stop
async fn stop_model(
    State(state): State<Arc<AppState>>,
    Path((engine, model_id)): Path<(String, String)>,
) -> Result<Json<StopResponse>> {
    state.sessions.stop(&engine, &model_id).await?;
    Ok(Json(StopResponse {
        model_id,
        stopped: true,
    }))
}

/// POST /v1/engines/:engine/stop-all
async fn stop_all(
    State(state): State<Arc<AppState>>,
    Path(engine): Path<String>,
) -> Result<Json<StopAllReport>> {
    Ok(Json(state.sessions.stop_all(&engine).await?))
}

/// POST /v1/engines/:engine/support
async fn classify_support(
    State(state): State<Arc<AppState>>,
    Path(engine): Path<String>,
    Json(request): Json<SupportRequest>,
) -> Json<SupportResponse> {
    let verdict = state
        .planner
        .classify_support(&engine, &request.model_path, request.context_length)
        .await;
    Json(SupportResponse { verdict })
}

/// POST /v1/engines/:engine/plan
async fn plan_load(
    State(state): State<Arc<AppState>>,
    Path(engine): Path<String>,
    Json(request): Json<PlanRequest>,
) -> Json<LoadPlan> {
    Json(
        state
            .planner
            .plan_load(
                &engine,
                &request.model_path,
                request.mmproj_path.as_deref(),
                request.context_length,
            )
            .await,
    )
}

/// GET /v1/engines/:engine/models/:model_id/mmproj
async fn check_mmproj(
    State(state): State<Arc<AppState>>,
    Path((engine, model_id)): Path<(String, String)>,
) -> Json<MmprojResponse> {
    let exists = state.planner.check_mmproj_exists(&engine, &model_id).await;
    Json(MmprojResponse { model_id, exists })
}
