use image::RgbaImage;
use log::{info, warn};
use stylizer_utils::{
    GpuAvailability, GpuContext, GpuContextOptions, GpuSettings, GpuWarpAffine, PixelAffine,
    warp_affine_rgba,
};

use crate::error::Result;

/// Where image warps execute. Chosen once when the stylizer is built.
#[derive(Debug, Clone, Default)]
pub enum ImageBackend {
    /// Rayon-parallel bilinear warp on the CPU.
    #[default]
    Cpu,
    /// wgpu compute kernel with identical sampling rules.
    Gpu(GpuWarpAffine),
}

impl ImageBackend {
    /// Pick the GPU path when enabled and available, otherwise the CPU path.
    pub fn from_settings(settings: &GpuSettings) -> Self {
        let options = GpuContextOptions::from(settings);
        match GpuContext::init_with_fallback(&options) {
            GpuAvailability::Available(context) => match GpuWarpAffine::new(context) {
                Ok(warp) => {
                    info!("image warps will run on the GPU");
                    ImageBackend::Gpu(warp)
                }
                Err(err) => {
                    warn!("GPU warp pipeline unavailable ({err}); using CPU warps");
                    ImageBackend::Cpu
                }
            },
            GpuAvailability::Disabled { .. } => ImageBackend::Cpu,
            GpuAvailability::Unavailable { error } => {
                warn!("GPU unavailable ({error}); using CPU warps");
                ImageBackend::Cpu
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ImageBackend::Cpu => "cpu",
            ImageBackend::Gpu(_) => "gpu",
        }
    }

    /// Warp `src` into an `out_size` image; `mapping` takes destination pixels to source pixels.
    pub fn warp(
        &self,
        src: &RgbaImage,
        mapping: &PixelAffine,
        out_size: (u32, u32),
    ) -> Result<RgbaImage> {
        let warped = match self {
            ImageBackend::Cpu => warp_affine_rgba(src, mapping, out_size.0, out_size.1)?,
            ImageBackend::Gpu(gpu) => gpu.warp(src, mapping, out_size.0, out_size.1)?,
        };
        Ok(warped)
    }
}
