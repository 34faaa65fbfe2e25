//! Error types for the runtime manager.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Engine not available: {0}")]
    EngineNotAvailable(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Load failed: {0}")]
    LoadFailed(String),

    #[error("Unload failed: {0}")]
    UnloadFailed(String),

    #[error("Failed to spawn engine process: {0}")]
    Spawn(String),

    #[error("Engine config file error: {0}")]
    ConfigFile(String),

    #[error("Invalid GGUF file: {0}")]
    Gguf(String),

    #[error("Hardware probe failed: {0}")]
    Hardware(String),

    #[error("Operation not supported by engine {engine}: {operation}")]
    Unsupported {
        engine: String,
        operation: &'static str,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Engine communication error: {0}")]
    Communication(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Error::EngineNotAvailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "engine_unavailable"),
            Error::ModelNotFound(_) => (StatusCode::NOT_FOUND, "model_not_found"),
            Error::LoadFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "load_failed"),
            Error::UnloadFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "unload_failed"),
            Error::Spawn(_) => (StatusCode::INTERNAL_SERVER_ERROR, "spawn_failed"),
            Error::ConfigFile(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_file_error"),
            Error::Gguf(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_model_file"),
            Error::Hardware(_) => (StatusCode::INTERNAL_SERVER_ERROR, "hardware_probe_failed"),
            Error::Unsupported { .. } => (StatusCode::NOT_IMPLEMENTED, "unsupported"),
            Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Error::Communication(_) => (StatusCode::BAD_GATEWAY, "communication_error"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string()
            }
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
