//! llama.cpp inference engine implementation.
//!
//! This engine runs one llama-server process at a time through the process
//! supervisor. Loading a model replaces whatever model was being served.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use runtime_common::{EngineKind, LoadPlan, SessionInfo, SupportVerdict};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

use super::{Capabilities, EngineCapability, InferenceEngine, ModelInfo, ModelSettings};
use crate::config::LlamaCppEngineConfig;
use crate::error::{Error, Result};
use crate::planner::{self, HardwareProbe, HardwareSnapshot, ModelFootprint};
use crate::supervisor::{
    binary_path, ModelConfig, ProcessSupervisor, SubprocessState, SupervisorConfig,
};

const ENGINE_NAME: &str = "llama_cpp";

/// llama.cpp inference engine.
pub struct LlamaCppEngine {
    config: LlamaCppEngineConfig,
    supervisor: Arc<ProcessSupervisor>,
    probe: Arc<dyn HardwareProbe>,
    /// Cache of discovered model_id -> full file path
    model_paths: RwLock<HashMap<String, PathBuf>>,
}

impl LlamaCppEngine {
    pub fn new(config: LlamaCppEngineConfig, probe: Arc<dyn HardwareProbe>) -> Self {
        let mut supervisor_config = SupervisorConfig::new(
            ENGINE_NAME,
            binary_path(Path::new(&config.binary_dir), &config.binary_name),
            PathBuf::from(&config.config_path),
        );
        supervisor_config.config_arg = config.config_arg.clone();
        // Wrapper arguments (e.g., toolbox run -c llamacpp llama-server)
        // must come before the llama-server specific flags
        supervisor_config.leading_args = config.server_args.clone();
        supervisor_config.readiness_markers = config.readiness_markers.clone();
        supervisor_config.startup_timeout = Duration::from_secs(config.startup_timeout_secs);
        supervisor_config.shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
        supervisor_config.log_output = config.log_server_output;

        Self {
            supervisor: Arc::new(ProcessSupervisor::new(supervisor_config)),
            probe,
            config,
            model_paths: RwLock::new(HashMap::new()),
        }
    }

    /// Recursively discover all GGUF model files in the model directory.
    /// Returns a map of model_id -> full path, filtering out non-primary
    /// shards and multimodal projectors.
    fn discover_models(&self) -> HashMap<String, PathBuf> {
        let mut models = HashMap::new();
        let model_dir = PathBuf::from(&self.config.model_dir);

        if !model_dir.exists() {
            return models;
        }

        Self::scan_directory_recursive(&model_dir, &mut models);
        models
    }

    fn scan_directory_recursive(dir: &Path, models: &mut HashMap<String, PathBuf>) {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let path = entry.path();

            if path.is_dir() {
                Self::scan_directory_recursive(&path, models);
            } else if is_gguf(&path) {
                let filename = match path.file_name().and_then(|s| s.to_str()) {
                    Some(f) => f,
                    None => continue,
                };

                // Skip non-primary shards (e.g., -00002-of-00003.gguf)
                if Self::is_non_primary_shard(filename) || Self::is_mmproj(filename) {
                    continue;
                }

                models.insert(Self::create_model_id(filename), path);
            }
        }
    }

    /// Check if a filename is a non-primary shard (not the first part of a split model).
    fn is_non_primary_shard(filename: &str) -> bool {
        // Primary shards have -00001-of-XXXXX
        if let Some(pos) = filename.find("-of-") {
            let prefix = &filename[..pos];
            if let Some(dash_pos) = prefix.rfind('-') {
                let shard_num = &prefix[dash_pos + 1..];
                if shard_num.chars().all(|c| c.is_ascii_digit()) && shard_num != "00001" {
                    return true;
                }
            }
        }
        false
    }

    fn is_mmproj(filename: &str) -> bool {
        filename.to_lowercase().contains("mmproj")
    }

    /// Create a model ID from a GGUF filename.
    fn create_model_id(filename: &str) -> String {
        let stem = filename
            .strip_suffix(".gguf")
            .or_else(|| filename.strip_suffix(".GGUF"))
            .unwrap_or(filename);

        // Remove shard suffix like -00001-of-00002
        let clean = match stem.find("-00001-of-") {
            Some(pos) => &stem[..pos],
            None => stem,
        };

        clean.to_string()
    }

    /// Extract quantization type from filename (e.g., "model-q4_0.gguf" -> "Q4_0").
    fn extract_quantization(filename: &str) -> Option<String> {
        let patterns = [
            "q2_k", "q3_k_s", "q3_k_m", "q3_k_l", "q4_0", "q4_1", "q4_k_s", "q4_k_m",
            "q5_0", "q5_1", "q5_k_s", "q5_k_m", "q6_k", "q8_0", "f16", "f32",
        ];

        let lower = filename.to_lowercase();
        for pattern in patterns {
            if lower.contains(pattern) {
                return Some(pattern.to_uppercase());
            }
        }
        None
    }

    /// Refresh the model paths cache by scanning the model directory.
    async fn refresh_model_cache(&self) {
        let discovered = self.discover_models();
        let mut paths = self.model_paths.write().await;
        *paths = discovered;
    }

    async fn cached_model_path(&self, model_id: &str) -> Option<PathBuf> {
        let paths = self.model_paths.read().await;
        paths.get(model_id).cloned()
    }

    /// Projector file stored next to the model, if any.
    fn find_mmproj(model_path: &Path) -> Option<PathBuf> {
        let dir = model_path.parent()?;
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
            .ok()?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                is_gguf(path)
                    && path
                        .file_name()
                        .and_then(|s| s.to_str())
                        .is_some_and(Self::is_mmproj)
            })
            .collect();
        candidates.sort();
        candidates.into_iter().next()
    }

    /// Allocate a port for the server.
    async fn allocate_port(&self) -> Result<u16> {
        if let Some(port) = self.config.port {
            return Ok(port);
        }
        // Use OS-assigned port
        let listener = TcpListener::bind((self.config.host.as_str(), 0))
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind for port allocation: {}", e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::Internal(format!("Failed to get local addr: {}", e)))?
            .port();
        drop(listener);
        Ok(port)
    }

    /// llama-server flags for a model and its translated settings.
    fn build_args(
        &self,
        model_path: &Path,
        mmproj_path: Option<&Path>,
        port: u16,
        settings: &ModelSettings,
    ) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            model_path.display().to_string(),
            "--host".to_string(),
            self.config.host.clone(),
            "--port".to_string(),
            port.to_string(),
        ];

        if let Some(ctx_size) = setting_u64(settings, "context_size") {
            args.push("--ctx-size".to_string());
            args.push(ctx_size.to_string());
        }
        if let Some(gpu_layers) = setting_u64(settings, "n_gpu_layers") {
            args.push("-ngl".to_string());
            args.push(gpu_layers.to_string());
        }
        if let Some(batch_size) = setting_u64(settings, "batch_size") {
            args.push("--batch-size".to_string());
            args.push(batch_size.to_string());
        }
        if setting_bool(settings, "no_kv_offload") == Some(true) {
            args.push("--no-kv-offload".to_string());
        }
        if let Some(mmproj) = mmproj_path {
            args.push("--mmproj".to_string());
            args.push(mmproj.display().to_string());
            if setting_bool(settings, "offload_mmproj") == Some(false) {
                args.push("--no-mmproj-offload".to_string());
            }
        }

        // Append extra llama-server arguments (e.g., --flash-attn on --no-mmap)
        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    /// Read the model files and the hardware off the async workers.
    async fn footprint_and_hardware(
        &self,
        model_path: &Path,
        mmproj_path: Option<&Path>,
    ) -> Result<(ModelFootprint, HardwareSnapshot)> {
        let model_path = model_path.to_path_buf();
        let mmproj_path = mmproj_path.map(Path::to_path_buf);
        let probe = self.probe.clone();

        tokio::task::spawn_blocking(move || -> Result<(ModelFootprint, HardwareSnapshot)> {
            let footprint = ModelFootprint::from_files(&model_path, mmproj_path.as_deref())?;
            Ok((footprint, probe.snapshot()))
        })
        .await
        .map_err(|e| Error::Internal(format!("Model inspection task failed: {}", e)))?
    }

    /// Model id of the server process, if one is serving.
    async fn serving_model(&self) -> Option<String> {
        if self.supervisor.state() != SubprocessState::Running {
            return None;
        }
        self.supervisor.current().await.map(|handle| handle.model_id)
    }
}

fn is_gguf(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gguf"))
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn setting_u64(settings: &ModelSettings, key: &str) -> Option<u64> {
    match settings.get(key)? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn setting_bool(settings: &ModelSettings, key: &str) -> Option<bool> {
    match settings.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ============================================================================
// InferenceEngine implementation
// ============================================================================

#[async_trait]
impl InferenceEngine for LlamaCppEngine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Subprocess
    }

    fn endpoint(&self) -> Option<String> {
        self.supervisor.serving()?.endpoint
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none()
            .with(EngineCapability::SupportClassification)
            .with(EngineCapability::LoadPlanning)
            .with(EngineCapability::MmprojDetection)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.refresh_model_cache().await;

        let paths = self.model_paths.read().await;
        let mut models = Vec::new();

        for (model_id, path) in paths.iter() {
            let filename = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown");

            let metadata = std::fs::metadata(path).ok();
            let modified_at = metadata
                .as_ref()
                .and_then(|m| m.modified().ok())
                .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339());

            models.push(ModelInfo {
                id: model_id.clone(),
                name: model_id.clone(),
                size_bytes: metadata.map(|m| m.len()),
                quantization: Self::extract_quantization(filename),
                modified_at,
            });
        }

        // Sort by name for consistent ordering
        models.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(models)
    }

    async fn loaded_models(&self) -> Result<Vec<String>> {
        Ok(self.serving_model().await.into_iter().collect())
    }

    async fn load_model(&self, model_id: &str, settings: &ModelSettings) -> Result<SessionInfo> {
        let model_path = self
            .model_path(model_id)
            .await
            .ok_or_else(|| Error::ModelNotFound(format!("Model not found: {}", model_id)))?;

        if !model_path.exists() {
            return Err(Error::ModelNotFound(format!(
                "Model file not found: {}",
                model_path.display()
            )));
        }

        let mmproj_path = Self::find_mmproj(&model_path);
        let port = self.allocate_port().await?;
        let args = self.build_args(&model_path, mmproj_path.as_deref(), port, settings);
        tracing::debug!("llama-server args for {}: {:?}", model_id, args);

        // The previous server (if any) goes away even if this start fails.
        let handle = self
            .supervisor
            .start(ModelConfig {
                model_id: model_id.to_string(),
                model_path: model_path.clone(),
                args,
                endpoint: Some(format!("http://{}:{}", self.config.host, port)),
            })
            .await?;

        tracing::info!("Model {} loaded via llama.cpp on port {}", model_id, port);

        let mut session = SessionInfo::new(ENGINE_NAME, model_id)
            .with_pid(handle.pid)
            .with_model_path(model_path.display().to_string());
        if let Some(endpoint) = handle.endpoint {
            session = session.with_endpoint(endpoint);
        }
        Ok(session)
    }

    async fn unload_model(&self, model_id: &str) -> Result<()> {
        let serving = self.supervisor.current().await.map(|handle| handle.model_id);
        if serving.as_deref() != Some(model_id) {
            tracing::debug!("Model {} is not being served, nothing to unload", model_id);
            return Ok(());
        }

        self.supervisor.stop().await;
        tracing::info!("Model {} unloaded from llama.cpp", model_id);
        Ok(())
    }

    async fn model_path(&self, model_id: &str) -> Option<PathBuf> {
        if let Some(path) = self.cached_model_path(model_id).await {
            return Some(path);
        }
        self.refresh_model_cache().await;
        self.cached_model_path(model_id).await
    }

    async fn mmproj_path(&self, model_id: &str) -> Option<PathBuf> {
        let model_path = self.model_path(model_id).await?;
        Self::find_mmproj(&model_path)
    }

    async fn is_model_supported(
        &self,
        model_path: &Path,
        requested_ctx: Option<u64>,
    ) -> Result<SupportVerdict> {
        let (footprint, hardware) = self.footprint_and_hardware(model_path, None).await?;
        planner::classify(&footprint, &hardware, requested_ctx)
    }

    async fn plan_model_load(
        &self,
        model_path: &Path,
        mmproj_path: Option<&Path>,
        requested_ctx: Option<u64>,
    ) -> Result<LoadPlan> {
        let (footprint, hardware) = self.footprint_and_hardware(model_path, mmproj_path).await?;
        planner::plan_fit(&footprint, &hardware, requested_ctx)
    }

    async fn check_mmproj_exists(&self, model_id: &str) -> Result<bool> {
        let model_path = self
            .model_path(model_id)
            .await
            .ok_or_else(|| Error::ModelNotFound(format!("Model not found: {}", model_id)))?;
        Ok(Self::find_mmproj(&model_path).is_some())
    }

    async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
