//! Hardware capability planning.
//!
//! [`HardwarePlanner`] is the front door used by the session registry and the
//! API. It delegates to the engine's optional capabilities and turns every
//! failure into a degraded answer instead of an error:
//!
//! | operation             | capability missing | capability fails |
//! |-----------------------|--------------------|------------------|
//! | `classify_support`    | `YELLOW`           | `GREY`           |
//! | `plan_load`           | degraded plan      | degraded plan    |
//! | `check_mmproj_exists` | `false`            | `false`          |
//!
//! The fit algorithm itself lives in [`fit`] and is used by engines that run
//! GGUF files locally.

pub mod fit;
pub mod gguf;
pub mod hardware;

pub use fit::{classify, plan_fit, ModelFootprint, MIN_CONTEXT_LENGTH};
pub use gguf::GgufMetadata;
pub use hardware::{HardwareProbe, HardwareSnapshot, SystemProbe};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use runtime_common::{LoadPlan, SupportVerdict};

use crate::engine::{EngineCapability, EngineRegistry};

pub struct HardwarePlanner {
    engines: Arc<EngineRegistry>,
}

impl HardwarePlanner {
    pub fn new(engines: Arc<EngineRegistry>) -> Self {
        Self { engines }
    }

    pub async fn classify_support(
        &self,
        engine: &str,
        model_path: &Path,
        requested_ctx: Option<u64>,
    ) -> SupportVerdict {
        let entry = match self.engines.get(engine).await {
            Some(entry) if entry.capabilities.supports(EngineCapability::SupportClassification) => entry,
            _ => {
                tracing::debug!(
                    "Engine {} cannot classify support, assuming {}",
                    engine,
                    SupportVerdict::Yellow
                );
                return SupportVerdict::Yellow;
            }
        };

        match entry.engine.is_model_supported(model_path, requested_ctx).await {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(
                    "Support check for {} on {} failed: {}",
                    model_path.display(),
                    engine,
                    e
                );
                SupportVerdict::Grey
            }
        }
    }

    /// Compute a load plan. Never fails; see the module table.
    pub async fn plan_load(
        &self,
        engine: &str,
        model_path: &Path,
        mmproj_path: Option<&Path>,
        requested_ctx: Option<u64>,
    ) -> LoadPlan {
        let entry = match self.engines.get(engine).await {
            Some(entry) if entry.capabilities.supports(EngineCapability::LoadPlanning) => entry,
            _ => {
                tracing::debug!("Engine {} cannot plan loads, using degraded plan", engine);
                return LoadPlan::degraded();
            }
        };

        let model_path = absolute(model_path);
        let mmproj_path = mmproj_path.map(absolute);

        match entry
            .engine
            .plan_model_load(&model_path, mmproj_path.as_deref(), requested_ctx)
            .await
        {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(
                    "Load planning for {} on {} failed, using degraded plan: {}",
                    model_path.display(),
                    engine,
                    e
                );
                LoadPlan::degraded()
            }
        }
    }

    pub async fn check_mmproj_exists(&self, engine: &str, model_id: &str) -> bool {
        let entry = match self.engines.get(engine).await {
            Some(entry) if entry.capabilities.supports(EngineCapability::MmprojDetection) => entry,
            _ => return false,
        };

        entry
            .engine
            .check_mmproj_exists(model_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("mmproj check for {} on {} failed: {}", model_id, engine, e);
                false
            })
    }
}

/// Resolve against the working directory. Falls back to the path as given.
fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
