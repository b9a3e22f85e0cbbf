//! Face-region geometry for face stylization.
//!
//! Landmarks from an external detector are reduced to six alignment anchors, turned into a
//! rotated face rectangle, and used to crop the model input. The model output is warped back
//! into the source frame with the inverse transform and cropped without rotation.

/// CPU/GPU selection for image warps.
pub mod backend;
/// Error taxonomy for the pipeline.
pub mod error;
/// Landmark lists and alignment anchor selection.
pub mod landmarks;
/// Model contract, ONNX adapter and injected model resources.
pub mod model;
/// Tensor-to-image conversion, inverse warp and final crop.
pub mod postprocess;
/// Aspect padding and tensor sampling of the face region.
pub mod preprocess;
/// Rotated rectangles and the face-rect policy.
pub mod rect;
/// The end-to-end stylizer.
pub mod stylizer;
/// Value-ranged image tensors.
pub mod tensor;
/// 4x4 affine transforms between tensor and image space.
pub mod transform;

pub use backend::ImageBackend;
pub use error::{Result, StylizerError};
pub use landmarks::{
    AlignmentDetection, LandmarkList, LandmarkRole, NormalizedLandmark, REQUIRED_LANDMARKS,
    RelativeBounds, select_alignment_landmarks,
};
pub use model::{ModelMetadata, ModelResources, OnnxStylizerModel, StylizerModel};
pub use postprocess::{crop_to_rect, final_output_size, inverse_warp, tensor_to_image};
pub use preprocess::{
    Letterbox, PreprocessConfig, PreprocessOutput, Preprocessor, TensorSize, pad_rect_to_aspect,
};
pub use rect::{
    EyeMouthRectPolicy, FaceRectPolicy, NormalizedRect, PixelRect, RegionOfInterest,
    normalize_radians,
};
pub use stylizer::{FaceLandmarker, FaceStylizer, FaceStylizerOptions, StylizeOutput};
pub use tensor::{ImageTensor, TensorData, ValueRange};
pub use transform::AffineTransform;
