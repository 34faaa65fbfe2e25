//! Engine registry for managing multiple inference engines.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{Capabilities, EngineHandleInfo, InferenceEngine};

/// A registered engine together with the capabilities it declared.
#[derive(Clone)]
pub struct EngineEntry {
    pub engine: Arc<dyn InferenceEngine>,
    pub capabilities: Capabilities,
}

/// Registry of all available inference engines, keyed by provider name.
pub struct EngineRegistry {
    engines: RwLock<HashMap<String, EngineEntry>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            engines: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new engine, replacing any engine with the same name.
    pub async fn register(&self, engine: Arc<dyn InferenceEngine>) {
        let capabilities = engine.capabilities();
        tracing::debug!(
            engine = engine.name(),
            capabilities = ?capabilities,
            "Registering engine"
        );
        let mut engines = self.engines.write().await;
        engines.insert(
            engine.name().to_string(),
            EngineEntry {
                engine,
                capabilities,
            },
        );
    }

    pub async fn unregister(&self, name: &str) -> Option<EngineEntry> {
        let mut engines = self.engines.write().await;
        engines.remove(name)
    }

    pub async fn get(&self, name: &str) -> Option<EngineEntry> {
        let engines = self.engines.read().await;
        engines.get(name).cloned()
    }

    /// Get all registered engines.
    pub async fn all(&self) -> Vec<EngineEntry> {
        let engines = self.engines.read().await;
        let mut all: Vec<EngineEntry> = engines.values().cloned().collect();
        all.sort_by(|a, b| a.engine.name().cmp(b.engine.name()));
        all
    }

    /// Describe every engine. Engines that fail to report their loaded
    /// models are listed with an empty set.
    pub async fn describe(&self) -> Vec<EngineHandleInfo> {
        // Clone engines to avoid holding the lock across async calls
        let entries = self.all().await;

        let mut infos = Vec::with_capacity(entries.len());
        for entry in entries {
            let loaded_models = match entry.engine.loaded_models().await {
                Ok(models) => models,
                Err(e) => {
                    tracing::warn!(
                        "Failed to list loaded models from {} engine: {}",
                        entry.engine.name(),
                        e
                    );
                    Vec::new()
                }
            };
            infos.push(EngineHandleInfo {
                name: entry.engine.name().to_string(),
                kind: entry.engine.kind(),
                endpoint: entry.engine.endpoint(),
                loaded_models,
                capabilities: entry.capabilities,
            });
        }
        infos
    }

    /// Run every engine's shutdown. Used as the process-exit cleanup hook.
    pub async fn shutdown_all(&self) {
        for entry in self.all().await {
            tracing::info!("Shutting down {} engine", entry.engine.name());
            entry.engine.shutdown().await;
        }
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}
