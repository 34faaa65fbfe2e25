//! HTTP control API.

pub mod engines;
pub mod health;
pub mod tools;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the `/v1` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(engines::router())
        .merge(tools::router())
}

/// Full application: `/health` plus the `/v1` API.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/v1", router())
        .route("/health", axum::routing::get(health::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
