//! Shared configuration types consumed across the stylizer workspace.
//!
//! Settings describe the model tensor contract, the face-rect geometry policy, the GPU path and
//! telemetry. They serialize to pretty JSON so hosts can persist them next to the model file.

use crate::gpu::GpuContextOptions;

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Declared value range of a model tensor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TensorRangeSettings {
    /// Floating point tensor whose values span `[min, max]`.
    Float { min: f32, max: f32 },
    /// Integer tensor whose values span `[min, max]`.
    Quantized { min: i64, max: i64 },
}

impl Default for TensorRangeSettings {
    fn default() -> Self {
        TensorRangeSettings::Float { min: 0.0, max: 1.0 }
    }
}

/// Tensor contract of the style model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    /// Model input/output width in pixels.
    pub tensor_width: u32,
    /// Model input/output height in pixels.
    pub tensor_height: u32,
    /// Channel count of the tensors (1, 3 or 4).
    pub channels: u32,
    /// Range the preprocessor scales pixels into.
    pub input_range: TensorRangeSettings,
    /// Range of the model output. Falls back to `input_range` when unset.
    pub output_range: Option<TensorRangeSettings>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            tensor_width: 256,
            tensor_height: 256,
            channels: 3,
            input_range: TensorRangeSettings::default(),
            output_range: None,
        }
    }
}

/// Parameters of the eye/mouth face-rect policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FaceRectSettings {
    /// Multiplier applied to the eye-to-eye distance.
    pub eye_span_scale: f32,
    /// Multiplier applied to the eye-center-to-mouth distance.
    pub eye_mouth_scale: f32,
    /// Fraction of the eye-to-mouth vector the rect center moves down from the eye center.
    pub center_shift: f32,
    /// Smallest rect side as a fraction of the shorter image side.
    pub min_side_fraction: f32,
}

impl Default for FaceRectSettings {
    fn default() -> Self {
        Self {
            eye_span_scale: 2.0,
            eye_mouth_scale: 1.8,
            center_shift: 1.0 / 3.0,
            min_side_fraction: 0.05,
        }
    }
}

/// Settings controlling optional runtime telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Whether stage timing logs are enabled.
    pub enabled: bool,
    /// Logging level for telemetry output (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "debug".to_string(),
        }
    }
}

impl TelemetrySettings {
    /// Resolve the configured level string into a `LevelFilter`.
    ///
    /// Unknown labels fall back to `Debug`.
    pub fn level_filter(&self) -> LevelFilter {
        self.level
            .trim()
            .parse::<LevelFilter>()
            .ok()
            .or_else(|| {
                self.level
                    .trim()
                    .eq_ignore_ascii_case("warning")
                    .then_some(LevelFilter::Warn)
            })
            .unwrap_or(LevelFilter::Debug)
    }

    /// Update the level string from a `LevelFilter` value.
    pub fn set_level(&mut self, level: LevelFilter) {
        self.level = level.as_str().to_ascii_lowercase();
    }
}

/// GPU-specific runtime preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuSettings {
    /// Whether the warp kernels should run on the GPU.
    pub enabled: bool,
    /// Respect `WGPU_*` environment overrides when initializing the backend.
    pub respect_env: bool,
}

impl Default for GpuSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            respect_env: true,
        }
    }
}

impl From<GpuSettings> for GpuContextOptions {
    fn from(settings: GpuSettings) -> Self {
        GpuContextOptions {
            enabled: settings.enabled,
            respect_env: settings.respect_env,
            ..Default::default()
        }
    }
}

impl From<&GpuSettings> for GpuContextOptions {
    fn from(settings: &GpuSettings) -> Self {
        settings.clone().into()
    }
}

/// Persistent stylizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StylizerSettings {
    /// Path to the style model ONNX file.
    pub model_path: Option<String>,
    /// Tensor contract of the model.
    pub model: ModelSettings,
    /// Face-rect geometry policy parameters.
    pub face_rect: FaceRectSettings,
    /// Requested face count. Only one face is supported; `None` means one.
    pub num_faces: Option<u32>,
    /// Telemetry and diagnostics preferences.
    pub telemetry: TelemetrySettings,
    /// GPU runtime preferences.
    pub gpu: GpuSettings,
}

impl Default for StylizerSettings {
    fn default() -> Self {
        Self {
            model_path: Some("models/face_stylizer.onnx".into()),
            model: ModelSettings::default(),
            face_rect: FaceRectSettings::default(),
            num_faces: None,
            telemetry: TelemetrySettings::default(),
            gpu: GpuSettings::default(),
        }
    }
}

impl StylizerSettings {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let settings: StylizerSettings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON at {}", path.display()))?;
        Ok(settings)
    }

    /// Serialize settings to disk in pretty-printed JSON, overwriting any existing file.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }
}
