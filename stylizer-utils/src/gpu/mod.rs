//! wgpu device setup for the accelerated warp path.
//!
//! Initialization either yields a shared [`GpuContext`] or explains why the CPU path should be
//! used instead; callers never have to treat a missing adapter as fatal.

/// Bilinear zero-border affine warp over packed RGBA pixels.
pub const WARP_AFFINE_WGSL: &str = include_str!("warp_affine.wgsl");

pub mod warp_affine;
pub use warp_affine::GpuWarpAffine;

use std::sync::Arc;

use log::{debug, info, warn};
use pollster::block_on;
use thiserror::Error;
use wgpu::{
    AdapterInfo, Backends, Device, DeviceDescriptor, ExperimentalFeatures, Features, Instance,
    InstanceDescriptor, InstanceFlags, Limits, PowerPreference, Queue, RequestAdapterError,
    RequestAdapterOptions, RequestDeviceError, Trace,
};

const GPU_TARGET: &str = "stylizer::gpu";

/// Options for creating a [`GpuContext`].
#[derive(Clone, Debug)]
pub struct GpuContextOptions {
    /// Whether GPU support is enabled at all.
    pub enabled: bool,
    /// Allow `WGPU_BACKEND` and friends to override the defaults below.
    pub respect_env: bool,
    pub backends: Backends,
    pub flags: InstanceFlags,
    pub power_preference: PowerPreference,
    /// Force wgpu to pick its software fallback adapter.
    pub force_fallback_adapter: bool,
    /// Features the adapter must support.
    pub required_features: Features,
    /// Debug label for the logical device.
    pub label: Option<String>,
}

impl Default for GpuContextOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            respect_env: true,
            backends: Backends::PRIMARY,
            flags: InstanceFlags::from_build_config(),
            power_preference: PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            required_features: Features::empty(),
            label: Some("stylizer GPU context".to_string()),
        }
    }
}

impl GpuContextOptions {
    /// Options that never touch the GPU.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    fn instance_descriptor(&self) -> InstanceDescriptor {
        let mut descriptor = if self.respect_env {
            InstanceDescriptor::from_env_or_default()
        } else {
            InstanceDescriptor::default()
        };
        descriptor.backends = self.resolved_backends();
        descriptor.flags = if self.respect_env {
            self.flags.with_env()
        } else {
            self.flags
        };
        descriptor
    }

    fn resolved_backends(&self) -> Backends {
        if self.respect_env {
            self.backends.with_env()
        } else {
            self.backends
        }
    }
}

/// Outcome of [`GpuContext::init_with_fallback`].
#[derive(Debug)]
pub enum GpuAvailability {
    /// GPU resources are ready to use.
    Available(Arc<GpuContext>),
    /// GPU use has been switched off by configuration.
    Disabled { reason: String },
    /// Initialization failed; the CPU path should be used.
    Unavailable { error: GpuInitError },
}

/// Device/queue pair plus the adapter it came from.
#[derive(Debug)]
pub struct GpuContext {
    device: Device,
    queue: Queue,
    info: AdapterInfo,
    limits: Limits,
}

impl GpuContext {
    /// Create a device and queue according to `options`.
    pub fn initialize(options: &GpuContextOptions) -> Result<Self, GpuInitError> {
        if !options.enabled {
            return Err(GpuInitError::Disabled);
        }

        let backends = options.resolved_backends();
        let instance = Instance::new(&options.instance_descriptor());
        let adapter = block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: options.power_preference,
            force_fallback_adapter: options.force_fallback_adapter,
            compatible_surface: None,
        }))
        .map_err(|source| GpuInitError::Adapter { backends, source })?;

        let info = adapter.get_info();
        let supported = adapter.features();
        if !supported.contains(options.required_features) {
            return Err(GpuInitError::MissingFeatures {
                requested: options.required_features,
                supported,
            });
        }

        let limits = adapter.limits();
        let (device, queue) = block_on(adapter.request_device(&DeviceDescriptor {
            label: options.label.as_deref(),
            required_features: options.required_features,
            required_limits: limits.clone(),
            experimental_features: ExperimentalFeatures::default(),
            memory_hints: Default::default(),
            trace: Trace::default(),
        }))?;

        info!(
            target: GPU_TARGET,
            "Using GPU adapter '{}' ({:?}/{:?})",
            info.name, info.backend, info.device_type
        );
        debug!(
            target: GPU_TARGET,
            "max storage buffer binding size: {} bytes", limits.max_storage_buffer_binding_size
        );

        Ok(Self {
            device,
            queue,
            info,
            limits,
        })
    }

    /// Attempt to create a context, reporting why the CPU path should be used when that fails.
    pub fn init_with_fallback(options: &GpuContextOptions) -> GpuAvailability {
        match Self::initialize(options) {
            Ok(ctx) => GpuAvailability::Available(Arc::new(ctx)),
            Err(GpuInitError::Disabled) => GpuAvailability::Disabled {
                reason: "GPU acceleration disabled via configuration".to_string(),
            },
            Err(err) => {
                warn!(
                    target: GPU_TARGET,
                    "GPU initialization failed ({err}); falling back to CPU."
                );
                GpuAvailability::Unavailable { error: err }
            }
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> &AdapterInfo {
        &self.info
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }
}

/// Pack RGBA bytes into one little-endian `u32` per pixel (`R | G << 8 | B << 16 | A << 24`).
pub fn pack_rgba_pixels(bytes: &[u8]) -> Vec<u32> {
    debug_assert!(
        bytes.len().is_multiple_of(4),
        "RGBA buffer must have a multiple of 4 elements"
    );
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Inverse of [`pack_rgba_pixels`].
pub fn unpack_rgba_pixels(packed: &[u32]) -> Vec<u8> {
    packed.iter().flat_map(|value| value.to_le_bytes()).collect()
}

/// Reasons a GPU context could not be created.
#[derive(Debug, Error)]
pub enum GpuInitError {
    #[error("GPU adapter request failed for {backends:?}: {source}")]
    Adapter {
        backends: Backends,
        #[source]
        source: RequestAdapterError,
    },
    #[error(
        "GPU adapter missing required features (requested={requested:?}, supported={supported:?})"
    )]
    MissingFeatures {
        requested: Features,
        supported: Features,
    },
    #[error("GPU device creation failed: {0}")]
    Device(#[from] RequestDeviceError),
    #[error("GPU acceleration disabled")]
    Disabled,
}
