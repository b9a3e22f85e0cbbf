//! Placing the model output back into the source frame and cutting out the final face crop.

use image::RgbaImage;
use log::{Level, trace};
use stylizer_utils::timing_guard;

use crate::backend::ImageBackend;
use crate::error::{Result, StylizerError};
use crate::preprocess::TensorSize;
use crate::rect::{NormalizedRect, PixelRect};
use crate::tensor::ImageTensor;
use crate::transform::AffineTransform;

/// Convert a model output tensor into pixels using its declared value range.
pub fn tensor_to_image(tensor: &ImageTensor) -> Result<RgbaImage> {
    let _guard = timing_guard("stylizer_core::tensor_to_image", Level::Trace);
    tensor.to_image()
}

/// Warp tensor-space pixels back into an `image_size` frame.
///
/// `forward` is the transform recorded by the preprocessor; it is inverted here and a singular
/// matrix is reported as an error.
pub fn inverse_warp(
    stylized: &RgbaImage,
    forward: &AffineTransform,
    image_size: (u32, u32),
    backend: &ImageBackend,
) -> Result<RgbaImage> {
    let _guard = timing_guard("stylizer_core::inverse_warp", Level::Debug);
    let inverse = forward.try_inverse()?;
    let mapping = inverse.pixel_mapping(image_size, stylized.dimensions());
    trace!("inverse warp mapping {:?}", mapping.m);
    backend.warp(stylized, &mapping, image_size)
}

/// Output size for a crop of `rect`, scaled down (never up) to fit within `max`.
pub fn final_output_size(rect: &PixelRect, max: TensorSize) -> (u32, u32) {
    let (rw, rh) = (rect.width.max(f32::MIN_POSITIVE), rect.height.max(f32::MIN_POSITIVE));
    let scale = 1.0f32
        .min(max.width as f32 / rw)
        .min(max.height as f32 / rh);
    let fit = |len: f32, limit: u32| (len * scale).round().clamp(1.0, limit.max(1) as f32) as u32;
    (fit(rw, max.width), fit(rh, max.height))
}

/// Crop `rect` out of `warped` with its rotation removed and resize it to fit `max`.
///
/// The inverse warp has already put the content back at its original orientation, so only
/// the rect's position and size are used.
pub fn crop_to_rect(
    warped: &RgbaImage,
    rect: &NormalizedRect,
    max: TensorSize,
    backend: &ImageBackend,
) -> Result<RgbaImage> {
    let _guard = timing_guard("stylizer_core::final_crop", Level::Debug);
    let image_size = warped.dimensions();
    if image_size.0 == 0 || image_size.1 == 0 {
        return Err(StylizerError::config("cannot crop an empty image"));
    }
    let region = rect.without_rotation().to_pixel_rect(image_size);
    if !(region.width > 0.0 && region.height > 0.0) {
        return Err(StylizerError::config(format!(
            "crop region must have a positive size (got {}x{})",
            region.width, region.height
        )));
    }
    let out_size = final_output_size(&region, max);
    let transform = AffineTransform::from_sub_rect(&region, image_size);
    let mapping = transform.pixel_mapping(out_size, image_size);
    backend.warp(warped, &mapping, out_size)
}
