//! Ollama inference engine implementation.

use async_trait::async_trait;
use reqwest::Client;
use runtime_common::{EngineKind, SessionInfo};
use serde::{Deserialize, Serialize};

use super::{InferenceEngine, ModelInfo, ModelSettings};
use crate::config::OllamaEngineConfig;
use crate::error::{Error, Result};

const ENGINE_NAME: &str = "ollama";

/// Ollama's own names for the generic engine keys.
const KEY_OVERRIDES: &[(&str, &str)] = &[("context_size", "num_ctx"), ("n_gpu_layers", "num_gpu")];

/// Ollama inference engine.
///
/// Talks to an Ollama server that manages its own model processes. Loading
/// warms the model with an empty generate request carrying `keep_alive`.
pub struct OllamaEngine {
    http_client: Client,
    base_url: String,
    keep_alive: String,
}

impl OllamaEngine {
    pub fn new(base_url: &str, keep_alive: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            keep_alive: keep_alive.to_string(),
        }
    }

    pub fn from_config(config: &OllamaEngineConfig) -> Self {
        Self::new(&config.base_url, &config.keep_alive)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Communication(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Communication(format!(
                "Ollama returned {} for {}",
                response.status(),
                endpoint
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Communication(e.to_string()))
    }

    async fn generate(&self, request: &OllamaGenerateRequest<'_>) -> Result<reqwest::Response> {
        let url = format!("{}/api/generate", self.base_url);
        self.http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Communication(e.to_string()))
    }
}

// ============================================================================
// Ollama API types
// ============================================================================

/// Response from /api/tags endpoint.
#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModelInfo>,
}

#[derive(Debug, Deserialize)]
struct OllamaModelInfo {
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    modified_at: Option<String>,
    #[serde(default)]
    details: Option<OllamaModelDetails>,
}

#[derive(Debug, Deserialize)]
struct OllamaModelDetails {
    #[serde(default)]
    quantization_level: Option<String>,
}

/// Response from /api/ps endpoint.
#[derive(Debug, Deserialize)]
struct OllamaPsResponse {
    #[serde(default)]
    models: Vec<OllamaRunningModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaRunningModel {
    name: String,
}

/// Empty generate request used to load or evict a model.
#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    keep_alive: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a ModelSettings>,
}

// ============================================================================
// InferenceEngine implementation
// ============================================================================

#[async_trait]
impl InferenceEngine for OllamaEngine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Remote
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.base_url.clone())
    }

    fn setting_key_overrides(&self) -> &'static [(&'static str, &'static str)] {
        KEY_OVERRIDES
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let tags: OllamaTagsResponse = self.get_json("/api/tags").await?;

        let models = tags
            .models
            .into_iter()
            .map(|m| ModelInfo {
                id: m.name.clone(),
                name: m.name,
                size_bytes: m.size,
                quantization: m.details.and_then(|d| d.quantization_level),
                modified_at: m.modified_at,
            })
            .collect();

        Ok(models)
    }

    async fn loaded_models(&self) -> Result<Vec<String>> {
        let ps: OllamaPsResponse = self.get_json("/api/ps").await?;
        Ok(ps.models.into_iter().map(|m| m.name).collect())
    }

    async fn load_model(&self, model_id: &str, settings: &ModelSettings) -> Result<SessionInfo> {
        let request = OllamaGenerateRequest {
            model: model_id,
            prompt: "",
            stream: false,
            keep_alive: &self.keep_alive,
            options: (!settings.is_empty()).then_some(settings),
        };

        let response = self.generate(&request).await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::LoadFailed(format!(
                "Failed to load model {}: {}",
                model_id, body
            )));
        }

        tracing::info!("Model {} loaded via Ollama (keep_alive {})", model_id, self.keep_alive);
        Ok(SessionInfo::new(ENGINE_NAME, model_id).with_endpoint(self.base_url.clone()))
    }

    async fn unload_model(&self, model_id: &str) -> Result<()> {
        // Ollama unloads models by setting keep_alive to 0
        let request = OllamaGenerateRequest {
            model: model_id,
            prompt: "",
            stream: false,
            keep_alive: "0",
            options: None,
        };

        let response = self.generate(&request).await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UnloadFailed(format!(
                "Failed to unload model {}: {}",
                model_id, body
            )));
        }

        tracing::info!("Model {} unloaded", model_id);
        Ok(())
    }
}
