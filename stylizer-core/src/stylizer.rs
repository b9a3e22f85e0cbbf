//! End-to-end face stylization for a single image.

use std::{fmt, sync::Arc};

use anyhow::Result as AnyResult;
use image::{DynamicImage, RgbaImage};
use log::{Level, debug};
use stylizer_utils::{StylizerSettings, configure_telemetry, timing_guard};

use crate::backend::ImageBackend;
use crate::error::{Result, StylizerError};
use crate::landmarks::{LandmarkList, select_alignment_landmarks};
use crate::model::ModelResources;
use crate::postprocess::{crop_to_rect, inverse_warp, tensor_to_image};
use crate::preprocess::{PreprocessConfig, Preprocessor};
use crate::rect::{EyeMouthRectPolicy, FaceRectPolicy, NormalizedRect, RegionOfInterest};

/// Black-box face landmark detector.
///
/// Returns one landmark list per detected face; an empty vector means no face.
pub trait FaceLandmarker: Send + Sync {
    fn detect(&self, image: &DynamicImage, roi: &NormalizedRect) -> AnyResult<Vec<LandmarkList>>;
}

impl<F> FaceLandmarker for F
where
    F: Fn(&DynamicImage, &NormalizedRect) -> AnyResult<Vec<LandmarkList>> + Send + Sync,
{
    fn detect(&self, image: &DynamicImage, roi: &NormalizedRect) -> AnyResult<Vec<LandmarkList>> {
        self(image, roi)
    }
}

const SINGLE_FACE_ONLY: &str = "face stylizer currently only supports one face";

/// User-facing options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaceStylizerOptions {
    /// Requested number of faces; only `1` (or unset) is accepted.
    pub num_faces: Option<u32>,
}

impl FaceStylizerOptions {
    /// Check the options and return the effective face count.
    pub fn validate(&self) -> Result<u32> {
        match self.num_faces {
            None | Some(1) => Ok(1),
            Some(_) => Err(StylizerError::config(SINGLE_FACE_ONLY)),
        }
    }
}

/// Result of one stylization call.
#[derive(Debug, Clone)]
pub struct StylizeOutput {
    /// Stylized face crop, or `None` when no face or no model output was available.
    pub stylized: Option<DynamicImage>,
    /// The input image, handed back unchanged.
    pub original: DynamicImage,
}

/// Face stylization pipeline: landmarks → face rect → tensor → model → source frame → crop.
pub struct FaceStylizer {
    resources: ModelResources,
    preprocessor: Preprocessor,
    backend: ImageBackend,
    rect_policy: Arc<dyn FaceRectPolicy>,
    landmarker: Option<Arc<dyn FaceLandmarker>>,
}

impl fmt::Debug for FaceStylizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaceStylizer")
            .field("resources", &self.resources)
            .field("backend", &self.backend.label())
            .field("rect_policy", &self.rect_policy)
            .field("has_landmarker", &self.landmarker.is_some())
            .finish()
    }
}

impl FaceStylizer {
    /// Build a stylizer around `resources`. Options are validated before anything else.
    pub fn new(
        resources: ModelResources,
        options: FaceStylizerOptions,
        backend: ImageBackend,
    ) -> Result<Self> {
        options.validate()?;
        resources.metadata().validate()?;
        let preprocessor = Preprocessor::new(
            PreprocessConfig::from(resources.metadata()),
            backend.clone(),
        );
        Ok(Self {
            resources,
            preprocessor,
            backend,
            rect_policy: Arc::new(EyeMouthRectPolicy::default()),
            landmarker: None,
        })
    }

    /// Build from persisted settings: telemetry, GPU path, ONNX model and rect policy.
    pub fn from_settings(settings: &StylizerSettings) -> Result<Self> {
        let options = FaceStylizerOptions {
            num_faces: settings.num_faces,
        };
        options.validate()?;
        configure_telemetry(settings.telemetry.enabled, settings.telemetry.level_filter());

        let model_path = settings
            .model_path
            .as_deref()
            .ok_or_else(|| StylizerError::config("settings do not name a model_path"))?;
        let resources = ModelResources::from_onnx(model_path, &settings.model)?;
        let backend = ImageBackend::from_settings(&settings.gpu);

        Ok(Self::new(resources, options, backend)?
            .with_rect_policy(EyeMouthRectPolicy::from(settings.face_rect)))
    }

    pub fn with_rect_policy(mut self, policy: impl FaceRectPolicy + 'static) -> Self {
        self.rect_policy = Arc::new(policy);
        self
    }

    pub fn with_landmarker(mut self, landmarker: impl FaceLandmarker + 'static) -> Self {
        self.landmarker = Some(Arc::new(landmarker));
        self
    }

    pub fn resources(&self) -> &ModelResources {
        &self.resources
    }

    pub fn backend(&self) -> &ImageBackend {
        &self.backend
    }

    /// Detect landmarks inside `roi` (whole image by default) and stylize the face found.
    pub fn stylize(&self, image: DynamicImage, roi: Option<RegionOfInterest>) -> Result<StylizeOutput> {
        let roi = roi
            .map(|region| region.to_rect())
            .transpose()?
            .unwrap_or(NormalizedRect::FULL_IMAGE);
        let landmarker = self.landmarker.as_ref().ok_or_else(|| {
            StylizerError::config("no face landmarker configured; use stylize_landmarks instead")
        })?;

        let faces = {
            let _guard = timing_guard("stylizer_core::detect_landmarks", Level::Debug);
            landmarker.detect(&image, &roi)?
        };
        self.stylize_landmarks(image, &faces)
    }

    /// Stylize using landmark lists produced elsewhere.
    pub fn stylize_landmarks(
        &self,
        image: DynamicImage,
        faces: &[LandmarkList],
    ) -> Result<StylizeOutput> {
        let _guard = timing_guard("stylizer_core::stylize", Level::Info);
        let image_size = (image.width(), image.height());
        if image_size.0 == 0 || image_size.1 == 0 {
            return Err(StylizerError::config("input image must not be empty"));
        }

        let Some(detection) = select_alignment_landmarks(faces)? else {
            debug!("no face landmarks; returning empty stylization");
            return Ok(StylizeOutput {
                stylized: None,
                original: image,
            });
        };
        let rect = self.rect_policy.estimate(&detection, image_size);
        if !rect.is_valid() {
            return Err(StylizerError::contract(format!(
                "face rect policy produced an invalid rect {rect:?}"
            )));
        }
        debug!("face rect {rect:?}");

        let stylized = self.run_model_on_rect(&image.to_rgba8(), &rect)?;
        Ok(StylizeOutput {
            stylized,
            original: image,
        })
    }

    fn run_model_on_rect(&self, source: &RgbaImage, rect: &NormalizedRect) -> Result<Option<DynamicImage>> {
        let metadata = self.resources.metadata();
        let pre = self.preprocessor.run(source, rect)?;

        let outputs = {
            let _guard = timing_guard("stylizer_core::inference", Level::Debug);
            self.resources.model().run(&pre.tensor)?
        };
        let Some(output) = outputs.into_iter().next().filter(|t| !t.is_empty()) else {
            debug!("style model returned no output; returning empty stylization");
            return Ok(None);
        };

        let expected = metadata.tensor_size;
        if output.width() != expected.width as usize || output.height() != expected.height as usize {
            return Err(StylizerError::contract(format!(
                "model output is {}x{} but the tensor size is {}x{}",
                output.width(),
                output.height(),
                expected.width,
                expected.height
            )));
        }
        let declared = metadata.output_range();
        if output.range() != declared {
            debug!(
                "model output declared {:?}; converting with the model range {:?}",
                output.range(),
                declared
            );
        }
        let output = output.with_range(declared)?;
        let channels = output.channels();

        let pixels = tensor_to_image(&output)?;
        let placed = inverse_warp(&pixels, &pre.transform, source.dimensions(), &self.backend)?;
        let crop = crop_to_rect(&placed, rect, expected, &self.backend)?;

        let crop = DynamicImage::ImageRgba8(crop);
        Ok(Some(if channels == 4 {
            crop
        } else {
            DynamicImage::ImageRgb8(crop.to_rgb8())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn stylizer_can_be_shared_across_threads() {
        assert_send_sync::<FaceStylizer>();
    }

    #[test]
    fn only_single_face_options_are_accepted() {
        assert_eq!(FaceStylizerOptions::default().validate().expect("unset"), 1);
        assert_eq!(
            FaceStylizerOptions { num_faces: Some(1) }
                .validate()
                .expect("one"),
            1
        );
        for n in [0, 2, 5] {
            let err = FaceStylizerOptions { num_faces: Some(n) }
                .validate()
                .expect_err("multi-face");
            assert!(format!("{err}").contains("only supports one face"));
        }
    }

    #[test]
    fn settings_without_model_path_are_rejected() {
        let settings = StylizerSettings {
            model_path: None,
            ..StylizerSettings::default()
        };
        assert!(matches!(
            FaceStylizer::from_settings(&settings),
            Err(StylizerError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn multi_face_settings_fail_before_model_loading() {
        let settings = StylizerSettings {
            model_path: Some("does/not/exist.onnx".into()),
            num_faces: Some(3),
            ..StylizerSettings::default()
        };
        let err = FaceStylizer::from_settings(&settings).expect_err("rejected");
        assert!(matches!(err, StylizerError::InvalidConfiguration(_)));
    }
}
