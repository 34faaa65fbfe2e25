//! Load plan and support verdict types produced by the hardware planner.

use serde::{Deserialize, Serialize};

/// Where a model ends up running once loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ModelMode {
    /// Every layer and the KV cache live in VRAM.
    #[serde(rename = "GPU")]
    Gpu,
    /// Layers split between VRAM and system memory.
    Hybrid,
    /// Everything in system memory.
    #[serde(rename = "CPU")]
    Cpu,
    /// No configuration satisfies the minimum context.
    Unsupported,
}

impl std::fmt::Display for ModelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelMode::Gpu => write!(f, "GPU"),
            ModelMode::Hybrid => write!(f, "Hybrid"),
            ModelMode::Cpu => write!(f, "CPU"),
            ModelMode::Unsupported => write!(f, "Unsupported"),
        }
    }
}

/// How a model should be loaded on the current hardware.
///
/// A plan is a pure function of model metadata, a hardware snapshot and the
/// requested context. It is recomputed on every load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadPlan {
    pub gpu_layers: u64,
    pub max_context_length: u64,
    #[serde(rename = "noOffloadKVCache")]
    pub no_offload_kv_cache: bool,
    pub offload_mmproj: bool,
    pub batch_size: u64,
    pub mode: ModelMode,
}

impl LoadPlan {
    /// Context length used when no plan could be computed.
    pub const DEGRADED_CONTEXT_LENGTH: u64 = 2048;
    /// Batch size used for CPU placements and the degraded plan.
    pub const CPU_BATCH_SIZE: u64 = 64;

    /// CPU-only, minimal-context plan returned when the planner is missing or fails.
    pub fn degraded() -> Self {
        Self {
            gpu_layers: 0,
            max_context_length: Self::DEGRADED_CONTEXT_LENGTH,
            no_offload_kv_cache: true,
            offload_mmproj: false,
            batch_size: Self::CPU_BATCH_SIZE,
            mode: ModelMode::Unsupported,
        }
    }

    pub fn is_runnable(&self) -> bool {
        self.mode != ModelMode::Unsupported && self.max_context_length > 0
    }
}

/// Coarse answer to "will this model run here?".
///
/// `Green > Yellow > Red` for display ordering. `Grey` means the probe
/// itself failed and is never folded into `Red`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SupportVerdict {
    /// Weights and KV cache fit.
    Green,
    /// Weights fit, the KV cache for the requested context does not.
    Yellow,
    /// Weights do not fit.
    Red,
    /// Could not be determined.
    Grey,
}

impl SupportVerdict {
    /// Display rank, higher is better. `Grey` has no rank.
    pub fn rank(&self) -> Option<u8> {
        match self {
            SupportVerdict::Green => Some(2),
            SupportVerdict::Yellow => Some(1),
            SupportVerdict::Red => Some(0),
            SupportVerdict::Grey => None,
        }
    }
}

impl std::fmt::Display for SupportVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupportVerdict::Green => write!(f, "GREEN"),
            SupportVerdict::Yellow => write!(f, "YELLOW"),
            SupportVerdict::Red => write!(f, "RED"),
            SupportVerdict::Grey => write!(f, "GREY"),
        }
    }
}
