//! Session registry: which models are loaded on which engine.
//!
//! All loads and unloads go through here. Operations on the same
//! `(engine, model)` pair are serialized; different pairs run concurrently.

mod settings;

pub use settings::SettingsKeyMap;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use futures_util::future::join_all;
use runtime_common::{LoadPlan, SessionInfo};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::engine::{EngineCapability, EngineEntry, EngineRegistry, ModelInfo, ModelSettings};
use crate::error::{Error, Result};
use crate::planner::HardwarePlanner;

type SessionKey = (String, String);

/// Per-key async locks. Entries are dropped once nobody holds or waits on them.
#[derive(Default)]
struct KeyedLocks {
    locks: StdMutex<HashMap<SessionKey, Arc<Mutex<()>>>>,
}

struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key: SessionKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    async fn acquire(&self, engine: &str, model_id: &str) -> KeyGuard<'_> {
        let key = (engine.to_string(), model_id.to_string());
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        KeyGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StopFailure {
    pub model_id: String,
    pub error: String,
}

/// Outcome of [`SessionRegistry::stop_all`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct StopAllReport {
    pub stopped: Vec<String>,
    pub failed: Vec<StopFailure>,
}

pub struct SessionRegistry {
    engines: Arc<EngineRegistry>,
    planner: Arc<HardwarePlanner>,
    key_map: SettingsKeyMap,
    locks: KeyedLocks,
}

impl SessionRegistry {
    pub fn new(
        engines: Arc<EngineRegistry>,
        planner: Arc<HardwarePlanner>,
        key_map: SettingsKeyMap,
    ) -> Self {
        Self {
            engines,
            planner,
            key_map,
            locks: KeyedLocks::default(),
        }
    }

    async fn entry(&self, engine: &str) -> Result<EngineEntry> {
        self.engines
            .get(engine)
            .await
            .ok_or_else(|| Error::EngineNotAvailable(format!("Unknown engine: {}", engine)))
    }

    /// Models the engine can load. Engine errors degrade to an empty list.
    pub async fn list_models(&self, engine: &str) -> Result<Vec<ModelInfo>> {
        let entry = self.entry(engine).await?;
        Ok(entry.engine.list_models().await.unwrap_or_else(|e| {
            tracing::warn!("Failed to list models from {} engine: {}", engine, e);
            Vec::new()
        }))
    }

    /// Loaded models. Engine errors degrade to an empty list.
    pub async fn loaded(&self, engine: &str) -> Result<Vec<String>> {
        let entry = self.entry(engine).await?;
        Ok(loaded_models(&entry).await)
    }

    /// Load `model_id` unless it is already loaded.
    ///
    /// Returns `None` when the model was already loaded. Load errors are
    /// returned as the engine reported them.
    pub async fn start(
        &self,
        engine: &str,
        model_id: &str,
        settings: &ModelSettings,
    ) -> Result<Option<SessionInfo>> {
        let entry = self.entry(engine).await?;
        let _guard = self.locks.acquire(engine, model_id).await;

        if loaded_models(&entry).await.iter().any(|id| id == model_id) {
            tracing::info!("Model {} already loaded on {}, skipping", model_id, engine);
            return Ok(None);
        }

        let overrides = entry.engine.setting_key_overrides();
        let mut settings = self.key_map.translate(settings, overrides);

        if entry.capabilities.supports(EngineCapability::LoadPlanning) {
            if let Some(model_path) = entry.engine.model_path(model_id).await {
                let mmproj_path = entry.engine.mmproj_path(model_id).await;
                let ctx_key = self.key_map.engine_key("context_size", overrides);
                let requested_ctx = settings.get(ctx_key).and_then(Value::as_u64);

                let plan = self
                    .planner
                    .plan_load(engine, &model_path, mmproj_path.as_deref(), requested_ctx)
                    .await;
                self.apply_plan(&mut settings, &plan, overrides, model_id);
            }
        }

        tracing::info!("Loading model {} on {}", model_id, engine);
        let session = entry.engine.load_model(model_id, &settings).await?;
        tracing::info!("Model {} loaded on {}", model_id, engine);
        Ok(Some(session))
    }

    /// Fill settings the caller left unset from a runnable plan.
    fn apply_plan(
        &self,
        settings: &mut ModelSettings,
        plan: &LoadPlan,
        overrides: &[(&'static str, &'static str)],
        model_id: &str,
    ) {
        if !plan.is_runnable() {
            tracing::warn!(
                "No runnable plan for {} ({}), loading with the given settings",
                model_id,
                plan.mode
            );
            return;
        }

        let planned = [
            ("context_size", Value::from(plan.max_context_length)),
            ("n_gpu_layers", Value::from(plan.gpu_layers)),
            ("batch_size", Value::from(plan.batch_size)),
            ("no_kv_offload", Value::from(plan.no_offload_kv_cache)),
            ("offload_mmproj", Value::from(plan.offload_mmproj)),
        ];
        for (key, value) in planned {
            let key = self.key_map.engine_key(key, overrides);
            settings.entry(key.to_string()).or_insert(value);
        }
        tracing::debug!("Applied {} plan to {}", plan.mode, model_id);
    }

    /// Unload a model. Unloading a model that is not loaded is not an error.
    pub async fn stop(&self, engine: &str, model_id: &str) -> Result<()> {
        let entry = self.entry(engine).await?;
        let _guard = self.locks.acquire(engine, model_id).await;

        entry.engine.unload_model(model_id).await?;
        tracing::info!("Model {} unloaded from {}", model_id, engine);
        Ok(())
    }

    /// Unload every loaded model independently. Failures are collected and
    /// never stop the other unloads.
    pub async fn stop_all(&self, engine: &str) -> Result<StopAllReport> {
        let entry = self.entry(engine).await?;
        let models = loaded_models(&entry).await;

        let results = join_all(models.iter().map(|id| self.stop(engine, id))).await;

        let mut report = StopAllReport::default();
        for (model_id, result) in models.into_iter().zip(results) {
            match result {
                Ok(()) => report.stopped.push(model_id),
                Err(e) => {
                    tracing::error!("Failed to unload {} from {}: {}", model_id, engine, e);
                    report.failed.push(StopFailure {
                        model_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }
}

async fn loaded_models(entry: &EngineEntry) -> Vec<String> {
    entry.engine.loaded_models().await.unwrap_or_else(|e| {
        tracing::warn!(
            "Failed to get loaded models from {} engine: {}",
            entry.engine.name(),
            e
        );
        Vec::new()
    })
}
