//! Hardware fit search.
//!
//! Everything here is a pure function of the model footprint, the hardware
//! snapshot and the requested context, so identical inputs give identical
//! plans.

use std::path::Path;

use runtime_common::{LoadPlan, ModelMode, SupportVerdict};

use super::gguf::{GgufMetadata, MAX_BLOCK_COUNT};
use super::hardware::HardwareSnapshot;
use crate::error::{Error, Result};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
/// VRAM kept free for the driver and other applications.
const VRAM_RESERVE_BYTES: f64 = 0.5 * GIB;
/// Engine scratch buffers.
const ENGINE_OVERHEAD_BYTES: f64 = 0.2 * GIB;
/// Smallest context worth loading a model for.
pub const MIN_CONTEXT_LENGTH: u64 = 1024;

const GPU_BATCH_SIZE: u64 = 2048;
const HYBRID_BATCH_SIZE: u64 = 256;

/// What a model needs, read from its files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelFootprint {
    pub model_bytes: u64,
    pub mmproj_bytes: u64,
    /// Repeating blocks; the output layer adds one more.
    pub block_count: u64,
    pub kv_bytes_per_token: u64,
    /// Trained context length.
    pub max_context: u64,
}

impl ModelFootprint {
    pub fn from_files(model_path: &Path, mmproj_path: Option<&Path>) -> Result<Self> {
        let model_bytes = std::fs::metadata(model_path)?.len();
        let mmproj_bytes = match mmproj_path {
            Some(path) => std::fs::metadata(path)?.len(),
            None => 0,
        };
        let gguf = GgufMetadata::read(model_path)?;

        Ok(Self {
            model_bytes,
            mmproj_bytes,
            block_count: gguf.block_count()?,
            kv_bytes_per_token: gguf.kv_bytes_per_token()?,
            max_context: gguf.context_length(),
        })
    }

    fn total_layers(&self) -> u64 {
        self.block_count.saturating_add(1)
    }

    fn layer_bytes(&self) -> u64 {
        self.model_bytes / self.total_layers()
    }

    fn weights_bytes(&self) -> u64 {
        self.model_bytes.saturating_add(self.mmproj_bytes)
    }
}

/// Memory the planner may hand out.
#[derive(Debug, Clone, Copy)]
struct Budget {
    vram: u64,
    ram: u64,
}

impl Budget {
    fn new(hw: &HardwareSnapshot) -> Self {
        let fraction = hw.memory_mode.usable_fraction();
        let vram = (hw.total_vram_bytes as f64 * fraction - VRAM_RESERVE_BYTES - ENGINE_OVERHEAD_BYTES)
            .max(0.0) as u64;
        let ram = (hw.total_ram_bytes as f64 * fraction).max(0.0) as u64;
        Self { vram, ram }
    }

    fn total(&self) -> u64 {
        self.vram.saturating_add(self.ram)
    }
}

fn unsupported() -> LoadPlan {
    LoadPlan {
        gpu_layers: 0,
        max_context_length: 0,
        no_offload_kv_cache: true,
        offload_mmproj: false,
        batch_size: LoadPlan::CPU_BATCH_SIZE,
        mode: ModelMode::Unsupported,
    }
}

/// Find the fastest placement that leaves room for at least
/// [`MIN_CONTEXT_LENGTH`] tokens of KV cache.
///
/// Tried in order: everything in VRAM, the highest GPU layer count whose KV
/// cache fits across VRAM and RAM, CPU only, then as many GPU layers as VRAM
/// holds with the cache in RAM. A requested context of zero counts as none.
pub fn plan_fit(
    footprint: &ModelFootprint,
    hw: &HardwareSnapshot,
    requested_ctx: Option<u64>,
) -> Result<LoadPlan> {
    if footprint.model_bytes == 0
        || footprint.block_count > MAX_BLOCK_COUNT
        || footprint.layer_bytes() == 0
        || footprint.kv_bytes_per_token == 0
    {
        return Err(Error::Hardware(format!(
            "invalid model footprint: {:?}",
            footprint
        )));
    }

    let budget = Budget::new(hw);
    let target_ctx = requested_ctx
        .filter(|ctx| *ctx > 0)
        .unwrap_or(footprint.max_context)
        .min(footprint.max_context);

    if footprint.weights_bytes() > budget.total() {
        tracing::info!(
            "Model needs {} bytes, only {} usable: unsupported on this system",
            footprint.weights_bytes(),
            budget.total()
        );
        return Ok(unsupported());
    }

    let plan = full_gpu(footprint, budget, target_ctx)
        .or_else(|| hybrid(footprint, budget, target_ctx))
        .unwrap_or_else(|| {
            if footprint.weights_bytes() <= budget.ram {
                cpu_only(footprint, budget, target_ctx)
            } else {
                partial_gpu(footprint, budget, target_ctx)
            }
        });
    let plan = finalize(plan, target_ctx);

    tracing::debug!(
        mode = %plan.mode,
        gpu_layers = plan.gpu_layers,
        max_context_length = plan.max_context_length,
        no_offload_kv_cache = plan.no_offload_kv_cache,
        offload_mmproj = plan.offload_mmproj,
        batch_size = plan.batch_size,
        "Planned model load"
    );
    Ok(plan)
}

fn full_gpu(fp: &ModelFootprint, budget: Budget, target_ctx: u64) -> Option<LoadPlan> {
    let kv_min = MIN_CONTEXT_LENGTH.saturating_mul(fp.kv_bytes_per_token);
    if fp.weights_bytes().saturating_add(kv_min) > budget.vram {
        return None;
    }
    let ctx_by_vram = budget.vram.saturating_sub(fp.model_bytes) / fp.kv_bytes_per_token;
    Some(LoadPlan {
        gpu_layers: fp.total_layers(),
        max_context_length: target_ctx.min(ctx_by_vram),
        no_offload_kv_cache: false,
        offload_mmproj: fp.mmproj_bytes > 0,
        batch_size: GPU_BATCH_SIZE,
        mode: ModelMode::Gpu,
    })
}

fn hybrid(fp: &ModelFootprint, budget: Budget, target_ctx: u64) -> Option<LoadPlan> {
    let total_layers = fp.total_layers();
    let layer = fp.layer_bytes();
    let offload_mmproj = fp.mmproj_bytes > 0;

    for gpu_layers in (0..=total_layers).rev() {
        let vram_for_layers = gpu_layers.saturating_mul(layer);
        if vram_for_layers > budget.vram {
            continue;
        }
        let kv_in_vram = (budget.vram - vram_for_layers) / fp.kv_bytes_per_token;

        // The weights file stays memory-mapped, so it is counted in full on
        // top of the CPU-side layers.
        let cpu_layers = (total_layers - gpu_layers).saturating_mul(layer);
        let mmproj_in_ram = if offload_mmproj { 0 } else { fp.mmproj_bytes };
        let ram_for_model = cpu_layers
            .saturating_add(fp.model_bytes)
            .saturating_add(mmproj_in_ram);
        if ram_for_model > budget.ram {
            continue;
        }
        let kv_in_ram = (budget.ram - ram_for_model) / fp.kv_bytes_per_token;

        let kv_tokens = kv_in_vram.saturating_add(kv_in_ram);
        if kv_tokens < MIN_CONTEXT_LENGTH {
            continue;
        }

        let mode = if gpu_layers == total_layers {
            ModelMode::Gpu
        } else if gpu_layers == 0 && kv_in_vram == 0 {
            ModelMode::Cpu
        } else {
            ModelMode::Hybrid
        };
        return Some(LoadPlan {
            gpu_layers,
            max_context_length: target_ctx.min(kv_tokens),
            no_offload_kv_cache: kv_in_vram == 0,
            offload_mmproj,
            batch_size: GPU_BATCH_SIZE,
            mode,
        });
    }
    None
}

fn cpu_only(fp: &ModelFootprint, budget: Budget, target_ctx: u64) -> LoadPlan {
    let kv_tokens = budget.ram.saturating_sub(fp.weights_bytes()) / fp.kv_bytes_per_token;
    if kv_tokens < MIN_CONTEXT_LENGTH {
        return unsupported();
    }
    LoadPlan {
        gpu_layers: 0,
        max_context_length: target_ctx.min(kv_tokens),
        no_offload_kv_cache: true,
        offload_mmproj: false,
        batch_size: LoadPlan::CPU_BATCH_SIZE,
        mode: ModelMode::Cpu,
    }
}

/// Weights do not fit in RAM: put what VRAM holds on the GPU and keep the
/// KV cache in RAM.
fn partial_gpu(fp: &ModelFootprint, budget: Budget, target_ctx: u64) -> LoadPlan {
    let total_layers = fp.total_layers();
    let layer = fp.layer_bytes();
    let gpu_layers = (budget.vram / layer).min(total_layers);
    if gpu_layers == 0 {
        return unsupported();
    }

    let offload_mmproj = fp.mmproj_bytes > 0;
    let cpu_layers = (total_layers - gpu_layers).saturating_mul(layer);
    let mmproj_in_ram = if offload_mmproj { 0 } else { fp.mmproj_bytes };
    let kv_tokens =
        budget.ram.saturating_sub(cpu_layers.saturating_add(mmproj_in_ram)) / fp.kv_bytes_per_token;
    if kv_tokens < MIN_CONTEXT_LENGTH {
        return unsupported();
    }
    LoadPlan {
        gpu_layers,
        max_context_length: target_ctx.min(kv_tokens),
        no_offload_kv_cache: true,
        offload_mmproj,
        batch_size: HYBRID_BATCH_SIZE,
        mode: ModelMode::Hybrid,
    }
}

fn finalize(mut plan: LoadPlan, target_ctx: u64) -> LoadPlan {
    if plan.mode == ModelMode::Unsupported {
        return plan;
    }

    plan.batch_size = if plan.mode == ModelMode::Hybrid {
        HYBRID_BATCH_SIZE
    } else if plan.mode == ModelMode::Cpu || plan.no_offload_kv_cache {
        LoadPlan::CPU_BATCH_SIZE
    } else {
        GPU_BATCH_SIZE
    };
    if plan.mode == ModelMode::Cpu || plan.no_offload_kv_cache {
        plan.offload_mmproj = false;
    }

    plan.max_context_length = plan.max_context_length.min(target_ctx);
    if plan.max_context_length < MIN_CONTEXT_LENGTH {
        return unsupported();
    }
    plan
}

/// Coarse verdict for a model on this hardware.
///
/// RED when the weights cannot fit anywhere, YELLOW when no runnable plan
/// exists or the requested context exceeds the plan's ceiling, else GREEN.
pub fn classify(
    footprint: &ModelFootprint,
    hw: &HardwareSnapshot,
    requested_ctx: Option<u64>,
) -> Result<SupportVerdict> {
    let budget = Budget::new(hw);
    if footprint.weights_bytes() > budget.total() {
        return Ok(SupportVerdict::Red);
    }

    let plan = plan_fit(footprint, hw, requested_ctx)?;
    if !plan.is_runnable() {
        return Ok(SupportVerdict::Yellow);
    }
    match requested_ctx {
        Some(ctx) if ctx > plan.max_context_length => Ok(SupportVerdict::Yellow),
        _ => Ok(SupportVerdict::Green),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryMode;

    const MIB: u64 = 1024 * 1024;

    /// 4 GiB, 32 layers of 128 MiB, 128 KiB of KV cache per token.
    fn footprint() -> ModelFootprint {
        ModelFootprint {
            model_bytes: 4096 * MIB,
            mmproj_bytes: 0,
            block_count: 31,
            kv_bytes_per_token: 128 * 1024,
            max_context: 8192,
        }
    }

    fn hw(vram_gb: f64, ram_gb: f64, mode: MemoryMode) -> HardwareSnapshot {
        HardwareSnapshot::from_gib(vram_gb, ram_gb, mode)
    }

    #[test]
    fn test_large_gpu_gets_full_offload() {
        let plan = plan_fit(&footprint(), &hw(24.0, 32.0, MemoryMode::High), None).unwrap();

        assert_eq!(plan.mode, ModelMode::Gpu);
        assert_eq!(plan.gpu_layers, 32);
        assert_eq!(plan.max_context_length, 8192);
        assert!(!plan.no_offload_kv_cache);
        assert_eq!(plan.batch_size, 2048);
    }

    #[test]
    fn test_requested_context_caps_plan() {
        let hw = hw(24.0, 32.0, MemoryMode::High);
        let plan = plan_fit(&footprint(), &hw, Some(4096)).unwrap();
        assert_eq!(plan.max_context_length, 4096);

        let plan = plan_fit(&footprint(), &hw, Some(100_000)).unwrap();
        assert_eq!(plan.max_context_length, 8192);
    }

    #[test]
    fn test_no_gpu_is_cpu_plan() {
        let plan = plan_fit(&footprint(), &hw(0.0, 32.0, MemoryMode::Medium), None).unwrap();

        assert_eq!(plan.mode, ModelMode::Cpu);
        assert_eq!(plan.gpu_layers, 0);
        assert!(plan.no_offload_kv_cache);
        assert_eq!(plan.batch_size, 64);
        assert_eq!(plan.max_context_length, 8192);
    }

    #[test]
    fn test_small_gpu_is_hybrid() {
        // 4 GiB * 0.7 - 0.7 GiB = 2.1 GiB usable: 16 layers of 128 MiB.
        let plan = plan_fit(&footprint(), &hw(4.0, 32.0, MemoryMode::High), None).unwrap();

        assert_eq!(plan.mode, ModelMode::Hybrid);
        assert_eq!(plan.gpu_layers, 16);
        assert!(!plan.no_offload_kv_cache);
        assert_eq!(plan.batch_size, 256);
        assert_eq!(plan.max_context_length, 8192);
    }

    #[test]
    fn test_weights_larger_than_ram_use_partial_offload() {
        // 2.1 GiB usable VRAM, 3.5 GiB usable RAM: the 4 GiB file never fits
        // RAM on its own.
        let plan = plan_fit(&footprint(), &hw(4.0, 5.0, MemoryMode::High), None).unwrap();

        assert_eq!(plan.mode, ModelMode::Hybrid);
        assert_eq!(plan.gpu_layers, 16);
        assert!(plan.no_offload_kv_cache);
        assert_eq!(plan.batch_size, 256);
    }

    #[test]
    fn test_model_too_big_is_unsupported_and_red() {
        let mut big = footprint();
        big.model_bytes = 40 * 1024 * MIB;
        let hw = hw(0.0, 16.0, MemoryMode::Medium);

        let plan = plan_fit(&big, &hw, None).unwrap();
        assert_eq!(plan.mode, ModelMode::Unsupported);
        assert_eq!(plan.max_context_length, 0);
        assert!(!plan.is_runnable());

        assert_eq!(classify(&big, &hw, None).unwrap(), SupportVerdict::Red);
    }

    #[test]
    fn test_context_above_ceiling_is_yellow() {
        // 8.25 GiB usable RAM: 8 GiB for the model, 256 MiB = 2048 tokens of cache.
        let hw = hw(0.0, 16.5, MemoryMode::Medium);

        let plan = plan_fit(&footprint(), &hw, Some(8192)).unwrap();
        assert_eq!(plan.mode, ModelMode::Cpu);
        assert_eq!(plan.max_context_length, 2048);

        assert_eq!(classify(&footprint(), &hw, Some(8192)).unwrap(), SupportVerdict::Yellow);
        assert_eq!(classify(&footprint(), &hw, Some(2048)).unwrap(), SupportVerdict::Green);
        assert_eq!(classify(&footprint(), &hw, None).unwrap(), SupportVerdict::Green);
    }

    #[test]
    fn test_weights_fit_but_cache_does_not_is_yellow() {
        // 4.05 GiB usable RAM: the weights fit, 409 tokens of cache do not.
        let hw = hw(0.0, 8.1, MemoryMode::Medium);

        let plan = plan_fit(&footprint(), &hw, None).unwrap();
        assert_eq!(plan.mode, ModelMode::Unsupported);
        assert_eq!(classify(&footprint(), &hw, None).unwrap(), SupportVerdict::Yellow);
    }

    #[test]
    fn test_mmproj_offload_follows_kv_placement() {
        let mut vision = footprint();
        vision.mmproj_bytes = 512 * MIB;

        let gpu = plan_fit(&vision, &hw(24.0, 32.0, MemoryMode::High), None).unwrap();
        assert_eq!(gpu.mode, ModelMode::Gpu);
        assert!(gpu.offload_mmproj);

        let cpu = plan_fit(&vision, &hw(0.0, 32.0, MemoryMode::Medium), None).unwrap();
        assert_eq!(cpu.mode, ModelMode::Cpu);
        assert!(!cpu.offload_mmproj);
    }

    #[test]
    fn test_memory_mode_changes_plan() {
        let high = plan_fit(&footprint(), &hw(6.0, 32.0, MemoryMode::High), None).unwrap();
        let low = plan_fit(&footprint(), &hw(6.0, 32.0, MemoryMode::Low), None).unwrap();
        assert!(high.gpu_layers > low.gpu_layers);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let hw = hw(8.0, 16.0, MemoryMode::Medium);
        let first = plan_fit(&footprint(), &hw, Some(6000)).unwrap();
        let second = plan_fit(&footprint(), &hw, Some(6000)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_huge_cache_per_token_is_unsupported() {
        let mut wide = footprint();
        wide.kv_bytes_per_token = u64::MAX / 2;

        let plan = plan_fit(&wide, &hw(24.0, 64.0, MemoryMode::High), None).unwrap();
        assert_eq!(plan.mode, ModelMode::Unsupported);
        assert_eq!(
            classify(&wide, &hw(24.0, 64.0, MemoryMode::High), None).unwrap(),
            SupportVerdict::Yellow
        );
    }

    #[test]
    fn test_too_many_blocks_is_error() {
        let mut deep = footprint();
        deep.block_count = u64::MAX;
        assert!(plan_fit(&deep, &hw(8.0, 16.0, MemoryMode::Medium), None).is_err());

        deep.block_count = MAX_BLOCK_COUNT + 1;
        assert!(plan_fit(&deep, &hw(8.0, 16.0, MemoryMode::Medium), None).is_err());
    }

    #[test]
    fn test_invalid_footprint_is_error() {
        let mut empty = footprint();
        empty.model_bytes = 0;
        assert!(plan_fit(&empty, &hw(8.0, 16.0, MemoryMode::Medium), None).is_err());
    }
}
