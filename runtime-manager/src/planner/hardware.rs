//! Hardware snapshot used for load planning.

use sysinfo::System;

use crate::config::{HardwareConfig, MemoryMode};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Memory available to the planner, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareSnapshot {
    pub total_vram_bytes: u64,
    pub total_ram_bytes: u64,
    pub memory_mode: MemoryMode,
}

impl HardwareSnapshot {
    pub fn from_gib(vram_gb: f64, ram_gb: f64, memory_mode: MemoryMode) -> Self {
        Self {
            total_vram_bytes: gib_to_bytes(vram_gb),
            total_ram_bytes: gib_to_bytes(ram_gb),
            memory_mode,
        }
    }
}

fn gib_to_bytes(gb: f64) -> u64 {
    (gb.max(0.0) * GIB) as u64
}

/// Source of hardware snapshots. Called on every planning request, so
/// hardware changes are picked up without restarting.
pub trait HardwareProbe: Send + Sync {
    fn snapshot(&self) -> HardwareSnapshot;
}

/// Configured GPUs plus probed (or configured) system RAM.
pub struct SystemProbe {
    config: HardwareConfig,
}

impl SystemProbe {
    pub fn new(config: HardwareConfig) -> Self {
        Self { config }
    }
}

impl HardwareProbe for SystemProbe {
    fn snapshot(&self) -> HardwareSnapshot {
        let vram_gb: f64 = self.config.gpu_vram_gb.iter().sum();
        let total_ram_bytes = match self.config.ram_gb {
            Some(ram_gb) => gib_to_bytes(ram_gb),
            None => {
                let mut system = System::new();
                system.refresh_memory();
                system.total_memory()
            }
        };

        let snapshot = HardwareSnapshot {
            total_vram_bytes: gib_to_bytes(vram_gb),
            total_ram_bytes,
            memory_mode: self.config.memory_mode,
        };
        tracing::debug!(
            vram_bytes = snapshot.total_vram_bytes,
            ram_bytes = snapshot.total_ram_bytes,
            "Hardware snapshot"
        );
        snapshot
    }
}

/// Fixed snapshot.
impl HardwareProbe for HardwareSnapshot {
    fn snapshot(&self) -> HardwareSnapshot {
        *self
    }
}
