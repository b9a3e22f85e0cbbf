//! Common helpers shared across the face stylizer crates.

/// Persisted stylizer settings (model, geometry policy, GPU, telemetry).
pub mod config;
/// Test fixture loading and path resolution.
pub mod fixtures;
/// Shared GPU context initialization and the warp compute kernel.
pub mod gpu;
/// Bilinear zero-border warping.
pub mod image_utils;
/// Declarative helpers for wgpu compute pipelines.
pub mod macros;
/// Small 2D vector type used by the face geometry code.
pub mod point;
/// Instrumentation helpers for optional performance tracing.
pub mod telemetry;

use anyhow::Result;
use log::LevelFilter;

pub use config::{
    FaceRectSettings, GpuSettings, ModelSettings, StylizerSettings, TelemetrySettings,
    TensorRangeSettings,
};
pub use fixtures::{fixture_path, fixtures_dir, load_fixture_json};
pub use gpu::{GpuAvailability, GpuContext, GpuContextOptions, GpuInitError, GpuWarpAffine};
pub use image_utils::{PixelAffine, sample_bilinear_zero, warp_affine_rgba};
pub use point::Point;
pub use telemetry::{
    TimingGuard, configure as configure_telemetry, telemetry_allows, telemetry_enabled,
    telemetry_level, timing_guard, timing_guard_if,
};

/// Initialize logging once for hosts embedding the stylizer.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` is used. Calling this more than once is
/// harmless.
pub fn init_logging(default_filter: LevelFilter) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    );
    builder.filter_module("stylizer::telemetry", LevelFilter::Trace);

    if builder.try_init().is_err() {
        // Logger already initialized; nothing to do.
    }
    Ok(())
}
