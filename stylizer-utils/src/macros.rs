//! Declarative helpers for the wgpu compute kernels in this workspace.
//!
//! The expansions name `wgpu`, `bytemuck` and `anyhow` directly, so calling crates need those
//! dependencies.

/// Bind group layout entry for a compute-visible buffer.
///
/// ```ignore
/// let entries = [
///     compute_buffer_entry!(0, storage_read),
///     compute_buffer_entry!(1, storage_write),
///     compute_buffer_entry!(2, uniform),
/// ];
/// ```
#[macro_export]
macro_rules! compute_buffer_entry {
    (@entry $binding:expr, $ty:expr) => {
        wgpu::BindGroupLayoutEntry {
            binding: $binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: $ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    };
    ($binding:expr, storage_read) => {
        $crate::compute_buffer_entry!(@entry $binding, wgpu::BufferBindingType::Storage { read_only: true })
    };
    ($binding:expr, storage_write) => {
        $crate::compute_buffer_entry!(@entry $binding, wgpu::BufferBindingType::Storage { read_only: false })
    };
    ($binding:expr, uniform) => {
        $crate::compute_buffer_entry!(@entry $binding, wgpu::BufferBindingType::Uniform)
    };
}

/// Build a compute pipeline whose entry point is `main`.
///
/// Evaluates to `(wgpu::ComputePipeline, wgpu::BindGroupLayout)`.
///
/// ```ignore
/// let (pipeline, layout) = create_gpu_pipeline!(
///     device,
///     "warp_affine",
///     include_str!("warp_affine.wgsl"),
///     [compute_buffer_entry!(0, storage_read), compute_buffer_entry!(1, uniform)]
/// );
/// ```
#[macro_export]
macro_rules! create_gpu_pipeline {
    ($device:expr, $label:literal, $shader_source:expr, [$($entry:expr),* $(,)?]) => {{
        let shader = $device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(concat!("stylizer_", $label, "_shader")),
            source: wgpu::ShaderSource::Wgsl($shader_source.into()),
        });

        let bind_group_layout = $device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(concat!("stylizer_", $label, "_bgl")),
            entries: &[$($entry),*],
        });

        let pipeline_layout = $device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(concat!("stylizer_", $label, "_layout")),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = $device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(concat!("stylizer_", $label, "_pipeline")),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        (pipeline, bind_group_layout)
    }};
}

/// Map a `MAP_READ` buffer, wait for the device, and copy it out as `Vec<u32>`.
///
/// Evaluates to `anyhow::Result<Vec<u32>>`; the element count is checked against `$expected_len`.
#[macro_export]
macro_rules! gpu_readback {
    ($readback:expr, $device:expr, $expected_len:expr, $operation:literal) => {{
        let slice = $readback.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });

        let mapped: anyhow::Result<Vec<u32>> = (|| {
            $device
                .poll(wgpu::PollType::Wait {
                    submission_index: None,
                    timeout: None,
                })
                .map_err(|err| anyhow::anyhow!("device poll failed during {}: {err}", $operation))?;
            receiver
                .recv()
                .map_err(|_| anyhow::anyhow!("GPU {} map callback dropped", $operation))?
                .map_err(|err| anyhow::anyhow!("GPU {} map error: {err}", $operation))?;
            let view = slice.get_mapped_range();
            let words: Vec<u32> = bytemuck::cast_slice(&view).to_vec();
            drop(view);
            $readback.unmap();
            Ok(words)
        })();

        mapped.and_then(|words| {
            anyhow::ensure!(
                words.len() == $expected_len,
                "unexpected GPU {} output size (expected {}, got {})",
                $operation,
                $expected_len,
                words.len()
            );
            Ok(words)
        })
    }};
}

/// Define a `#[repr(C)]` uniform block padded up to a multiple of 16 bytes.
///
/// Fields must be 4-byte scalars; the trailing `_pad` array is sized automatically.
#[macro_export]
macro_rules! gpu_uniforms {
    ($vis:vis $name:ident { $($field:ident: $ty:ty),+ $(,)? }) => {
        #[repr(C)]
        #[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        $vis struct $name {
            $(pub $field: $ty,)+
            pub _pad: [u32; ((16 - (0 $(+ ::core::mem::size_of::<$ty>())+) % 16) % 16) / 4],
        }
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn uniform_blocks_round_up_to_sixteen_bytes() {
        gpu_uniforms!(Three { a: u32, b: u32, c: f32 });
        assert_eq!(std::mem::size_of::<Three>(), 16);

        gpu_uniforms!(Ten {
            a: u32,
            b: u32,
            c: u32,
            d: u32,
            e: f32,
            f: f32,
            g: f32,
            h: f32,
            i: f32,
            j: f32,
        });
        assert_eq!(std::mem::size_of::<Ten>(), 48);

        gpu_uniforms!(Four { a: u32, b: u32, c: f32, d: f32 });
        assert_eq!(std::mem::size_of::<Four>(), 16);
    }

    #[test]
    fn uniform_blocks_are_pod() {
        gpu_uniforms!(Pair { x: u32, y: f32 });
        let value = Pair {
            x: 42,
            y: 1.5,
            _pad: [0; 2],
        };
        let bytes = bytemuck::bytes_of(&value);
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..4], &42u32.to_ne_bytes());
    }
}
