use std::{fmt, sync::Arc};

use anyhow::{Context, Result};
use bytemuck::{bytes_of, cast_slice};
use image::RgbaImage;
use wgpu::util::DeviceExt;

use crate::{
    compute_buffer_entry, create_gpu_pipeline, gpu_readback, gpu_uniforms,
    image_utils::PixelAffine,
};

use super::{GpuContext, WARP_AFFINE_WGSL, pack_rgba_pixels, unpack_rgba_pixels};

const WORKGROUP_SIZE: u32 = 16;

gpu_uniforms!(WarpUniforms {
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
    m0: f32,
    m1: f32,
    m2: f32,
    m3: f32,
    m4: f32,
    m5: f32,
});

/// Compute pipeline that applies a [`PixelAffine`] warp on the GPU.
///
/// Produces the same pixels as [`crate::image_utils::warp_affine_rgba`] up to float rounding.
#[derive(Clone)]
pub struct GpuWarpAffine {
    context: Arc<GpuContext>,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

impl fmt::Debug for GpuWarpAffine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuWarpAffine")
            .field("adapter", &self.context.adapter_info().name)
            .finish_non_exhaustive()
    }
}

impl GpuWarpAffine {
    pub fn new(context: Arc<GpuContext>) -> Result<Self> {
        let device = context.device();
        let (pipeline, bind_group_layout) = create_gpu_pipeline!(
            device,
            "warp_affine",
            WARP_AFFINE_WGSL,
            [
                compute_buffer_entry!(0, storage_read),
                compute_buffer_entry!(1, storage_write),
                compute_buffer_entry!(2, uniform),
            ]
        );

        Ok(Self {
            context,
            pipeline,
            bind_group_layout,
        })
    }

    /// Warp `src` into an `out_width x out_height` image.
    pub fn warp(
        &self,
        src: &RgbaImage,
        mapping: &PixelAffine,
        out_width: u32,
        out_height: u32,
    ) -> Result<RgbaImage> {
        anyhow::ensure!(
            out_width > 0 && out_height > 0,
            "warp output dimensions must be non-zero (got {out_width}x{out_height})"
        );
        anyhow::ensure!(mapping.is_finite(), "warp mapping contains non-finite values");
        anyhow::ensure!(
            src.width() > 0 && src.height() > 0,
            "GPU warp requires a non-empty source image"
        );

        let device = self.context.device();
        let queue = self.context.queue();

        let packed = pack_rgba_pixels(src.as_raw());
        let source_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("stylizer_warp_source"),
            contents: cast_slice(&packed),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let dst_pixels = out_width as usize * out_height as usize;
        let output_bytes = (dst_pixels * std::mem::size_of::<u32>()) as wgpu::BufferAddress;
        let output_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("stylizer_warp_output"),
            size: output_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("stylizer_warp_readback"),
            size: output_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let [m0, m1, m2, m3, m4, m5] = mapping.m;
        let uniforms = WarpUniforms {
            src_width: src.width(),
            src_height: src.height(),
            dst_width: out_width,
            dst_height: out_height,
            m0,
            m1,
            m2,
            m3,
            m4,
            m5,
            _pad: [0; 2],
        };
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("stylizer_warp_uniforms"),
            contents: bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("stylizer_warp_bg"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: source_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: output_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("stylizer_warp_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("stylizer_warp_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                out_width.div_ceil(WORKGROUP_SIZE),
                out_height.div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        encoder.copy_buffer_to_buffer(&output_buffer, 0, &readback, 0, output_bytes);
        queue.submit(std::iter::once(encoder.finish()));

        let words = gpu_readback!(readback, device, dst_pixels, "warp affine")?;
        RgbaImage::from_raw(out_width, out_height, unpack_rgba_pixels(&words))
            .context("failed to build GPU warp image")
    }
}
