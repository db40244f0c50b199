use super::GenerationOptions;
use crate::assets::OsKind;

/// Decides how many model layers a runner offloads to the GPU.
pub trait GpuLayerPolicy: Send + Sync {
    fn gpu_layers(&self, options: &GenerationOptions) -> i32;
}

/// Always offload the same number of layers, ignoring the options.
#[derive(Debug, Clone, Copy)]
pub struct FixedGpuLayers(pub i32);

impl GpuLayerPolicy for FixedGpuLayers {
    fn gpu_layers(&self, _options: &GenerationOptions) -> i32 {
        self.0
    }
}

/// Picks a layer count from the free VRAM reported by the host.
///
/// An explicit `num_gpu` in the options always wins. Metal builds get a single layer, which is
/// enough to enable GPU execution there. Without a VRAM reading everything stays on the CPU.
#[derive(Debug, Clone, Copy)]
pub struct VramTierPolicy {
    pub free_vram_mib: Option<u64>,
    pub os: OsKind,
}

impl VramTierPolicy {
    pub fn new(free_vram_mib: Option<u64>, os: OsKind) -> Self {
        Self { free_vram_mib, os }
    }

    fn layers_for_vram(vram_mib: u64) -> i32 {
        match vram_mib {
            v if v < 500 => 0,
            v if v < 1000 => 4,
            v if v < 2000 => 8,
            v if v < 4000 => 12,
            v if v < 8000 => 16,
            v if v < 12000 => 24,
            v if v < 16000 => 32,
            _ => 48,
        }
    }
}

impl GpuLayerPolicy for VramTierPolicy {
    fn gpu_layers(&self, options: &GenerationOptions) -> i32 {
        if options.num_gpu >= 0 {
            return options.num_gpu;
        }
        if self.os == OsKind::MacOs {
            return 1;
        }

        match self.free_vram_mib {
            Some(vram) => {
                let layers = Self::layers_for_vram(vram);
                if layers == 0 {
                    log::warn!("Low VRAM detected ({vram} MiB), disabling GPU");
                } else {
                    log::info!("{vram} MiB VRAM available, loading {layers} GPU layers");
                }
                layers
            }
            None => 0,
        }
    }
}
