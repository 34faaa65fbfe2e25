//! Inference engine abstraction layer.
//!
//! This module defines the `InferenceEngine` trait that abstracts different
//! inference backends (llama.cpp, Ollama, etc.) behind a common interface.
//! Operations that only some engines provide are declared up front through
//! [`Capabilities`] and resolved once when the engine is registered.

mod llama_cpp;
mod ollama;
mod registry;

pub use llama_cpp::LlamaCppEngine;
pub use ollama::OllamaEngine;
pub use registry::{EngineEntry, EngineRegistry};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use runtime_common::{EngineKind, LoadPlan, SessionInfo, SupportVerdict};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Per-model settings as forwarded to an engine, after key translation.
pub type ModelSettings = serde_json::Map<String, serde_json::Value>;

/// Information about an available model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier (e.g., "llama3.2:3b")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Model size in bytes (if known)
    #[serde(default)]
    pub size_bytes: Option<u64>,
    /// Quantization type (e.g., "Q4_K_M")
    #[serde(default)]
    pub quantization: Option<String>,
    /// When the model was last modified
    #[serde(default)]
    pub modified_at: Option<String>,
}

/// Optional operations an engine may provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineCapability {
    /// `is_model_supported`
    SupportClassification,
    /// `plan_model_load`
    LoadPlanning,
    /// `check_mmproj_exists`
    MmprojDetection,
}

/// The set of optional operations an engine declared at registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Capabilities(BTreeSet<EngineCapability>);

impl Capabilities {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: EngineCapability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn supports(&self, capability: EngineCapability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = EngineCapability> + '_ {
        self.0.iter().copied()
    }
}

/// Snapshot of a registered engine, as reported by the API.
#[derive(Debug, Clone, Serialize)]
pub struct EngineHandleInfo {
    pub name: String,
    pub kind: EngineKind,
    pub endpoint: Option<String>,
    pub loaded_models: Vec<String>,
    pub capabilities: Capabilities,
}

/// Primary trait for inference engines.
///
/// Load and unload are only called by the session registry, which serializes
/// them per `(engine, model)`. Engines do not need their own idempotence.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Provider identifier (e.g., "llama_cpp", "ollama").
    fn name(&self) -> &str;

    fn kind(&self) -> EngineKind;

    /// Address of the engine, if it has one.
    fn endpoint(&self) -> Option<String> {
        None
    }

    /// Optional operations this engine implements. Read once at registration.
    fn capabilities(&self) -> Capabilities {
        Capabilities::none()
    }

    /// Engine-specific setting key renames, applied after the generic table.
    fn setting_key_overrides(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// List all models available through this engine.
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Ids of the models currently loaded.
    async fn loaded_models(&self) -> Result<Vec<String>>;

    /// Load a model with already-translated settings.
    async fn load_model(&self, model_id: &str, settings: &ModelSettings) -> Result<SessionInfo>;

    /// Unload a model. Unloading a model that is not loaded is a no-op.
    async fn unload_model(&self, model_id: &str) -> Result<()>;

    /// Resolve a model id to its artifact on disk, for planning.
    async fn model_path(&self, _model_id: &str) -> Option<PathBuf> {
        None
    }

    /// Resolve the multimodal projector that accompanies a model, if any.
    async fn mmproj_path(&self, _model_id: &str) -> Option<PathBuf> {
        None
    }

    async fn is_model_supported(
        &self,
        _model_path: &Path,
        _requested_ctx: Option<u64>,
    ) -> Result<SupportVerdict> {
        Err(self.unsupported("is_model_supported"))
    }

    async fn plan_model_load(
        &self,
        _model_path: &Path,
        _mmproj_path: Option<&Path>,
        _requested_ctx: Option<u64>,
    ) -> Result<LoadPlan> {
        Err(self.unsupported("plan_model_load"))
    }

    async fn check_mmproj_exists(&self, _model_id: &str) -> Result<bool> {
        Err(self.unsupported("check_mmproj_exists"))
    }

    /// Release everything the engine owns. Must not fail.
    async fn shutdown(&self) {}

    fn unsupported(&self, operation: &'static str) -> Error {
        Error::Unsupported {
            engine: self.name().to_string(),
            operation,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable in-memory engine shared by unit tests.

    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[derive(Default)]
    pub struct MockEngine {
        pub name: String,
        pub capabilities: Capabilities,
        pub loaded: Mutex<HashSet<String>>,
        pub load_calls: AtomicUsize,
        pub active_loads: AtomicUsize,
        pub max_active_loads: AtomicUsize,
        pub unload_calls: Mutex<Vec<String>>,
        pub load_delay: Option<Duration>,
        pub failing_unloads: HashSet<String>,
        pub load_error: Option<String>,
        pub last_settings: Mutex<Option<ModelSettings>>,
        pub paths: HashMap<String, PathBuf>,
        pub plan: Option<std::result::Result<LoadPlan, String>>,
        pub verdict: Option<std::result::Result<SupportVerdict, String>>,
        pub mmproj: Option<std::result::Result<bool, String>>,
    }

    impl MockEngine {
        pub fn named(name: &str) -> Self {
            Self {
                name: name.to_string(),
                ..Default::default()
            }
        }

        pub fn with_loaded(self, ids: &[&str]) -> Self {
            *self.loaded.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
            self
        }

        pub fn load_calls(&self) -> usize {
            self.load_calls.load(Ordering::SeqCst)
        }

        pub fn max_active_loads(&self) -> usize {
            self.max_active_loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InferenceEngine for MockEngine {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> EngineKind {
            EngineKind::InProcess
        }

        fn capabilities(&self) -> Capabilities {
            self.capabilities.clone()
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(vec![])
        }

        async fn loaded_models(&self) -> Result<Vec<String>> {
            let mut ids: Vec<String> = self.loaded.lock().unwrap().iter().cloned().collect();
            ids.sort();
            Ok(ids)
        }

        async fn load_model(&self, model_id: &str, settings: &ModelSettings) -> Result<SessionInfo> {
            self.load_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_settings.lock().unwrap() = Some(settings.clone());
            let active = self.active_loads.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active_loads.fetch_max(active, Ordering::SeqCst);
            if let Some(delay) = self.load_delay {
                tokio::time::sleep(delay).await;
            }
            self.active_loads.fetch_sub(1, Ordering::SeqCst);
            if let Some(ref message) = self.load_error {
                return Err(Error::LoadFailed(message.clone()));
            }
            self.loaded.lock().unwrap().insert(model_id.to_string());
            Ok(SessionInfo::new(&self.name, model_id))
        }

        async fn unload_model(&self, model_id: &str) -> Result<()> {
            self.unload_calls.lock().unwrap().push(model_id.to_string());
            if self.failing_unloads.contains(model_id) {
                return Err(Error::UnloadFailed(format!("{} is stuck", model_id)));
            }
            self.loaded.lock().unwrap().remove(model_id);
            Ok(())
        }

        async fn model_path(&self, model_id: &str) -> Option<PathBuf> {
            self.paths.get(model_id).cloned()
        }

        async fn is_model_supported(
            &self,
            _model_path: &Path,
            _requested_ctx: Option<u64>,
        ) -> Result<SupportVerdict> {
            match &self.verdict {
                Some(Ok(v)) => Ok(*v),
                Some(Err(e)) => Err(Error::Hardware(e.clone())),
                None => Err(self.unsupported("is_model_supported")),
            }
        }

        async fn plan_model_load(
            &self,
            _model_path: &Path,
            _mmproj_path: Option<&Path>,
            _requested_ctx: Option<u64>,
        ) -> Result<LoadPlan> {
            match &self.plan {
                Some(Ok(p)) => Ok(*p),
                Some(Err(e)) => Err(Error::Hardware(e.clone())),
                None => Err(self.unsupported("plan_model_load")),
            }
        }

        async fn check_mmproj_exists(&self, _model_id: &str) -> Result<bool> {
            match &self.mmproj {
                Some(Ok(v)) => Ok(*v),
                Some(Err(e)) => Err(Error::Internal(e.clone())),
                None => Err(self.unsupported("check_mmproj_exists")),
            }
        }
    }
}
