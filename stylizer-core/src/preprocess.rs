//! Cropping the face rectangle out of the source image into the model tensor.
//!
//! The rectangle is first padded to the tensor aspect ratio (letterboxing), then the rotated
//! region is warped into the tensor grid with bilinear sampling and a zero border. The forward
//! transform that maps tensor coordinates back onto the image is returned alongside the tensor.

use image::RgbaImage;
use log::Level;
use stylizer_utils::timing_guard;

use crate::backend::ImageBackend;
use crate::error::{Result, StylizerError};
use crate::model::ModelMetadata;
use crate::rect::{NormalizedRect, PixelRect};
use crate::tensor::{ImageTensor, ValueRange};
use crate::transform::AffineTransform;

/// Model tensor resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorSize {
    pub width: u32,
    pub height: u32,
}

impl TensorSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn as_tuple(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Settings for turning an image region into a model tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessConfig {
    pub tensor_size: TensorSize,
    pub channels: usize,
    pub input_range: ValueRange,
}

impl From<&ModelMetadata> for PreprocessConfig {
    fn from(metadata: &ModelMetadata) -> Self {
        Self {
            tensor_size: metadata.tensor_size,
            channels: metadata.channels,
            input_range: metadata.input_range,
        }
    }
}

/// Padding added around the region, as fractions of the tensor size.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Letterbox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

/// Result of preprocessing one face region.
#[derive(Debug, Clone)]
pub struct PreprocessOutput {
    /// Model input tensor.
    pub tensor: ImageTensor,
    /// Maps normalized tensor coordinates to normalized image coordinates.
    pub transform: AffineTransform,
    pub letterbox: Letterbox,
    /// The aspect-padded region that was sampled, in pixels.
    pub roi: PixelRect,
}

/// Grow `rect` along one axis until its aspect ratio matches the tensor.
pub fn pad_rect_to_aspect(rect: &PixelRect, tensor_size: TensorSize) -> Result<(PixelRect, Letterbox)> {
    if !(rect.width > 0.0 && rect.height > 0.0) || !rect.width.is_finite() || !rect.height.is_finite() {
        return Err(StylizerError::config(format!(
            "region must have a positive size (got {}x{})",
            rect.width, rect.height
        )));
    }
    let tensor_aspect = tensor_size.height as f32 / tensor_size.width as f32;
    let roi_aspect = rect.height / rect.width;

    let (padded, letterbox) = if tensor_aspect > roi_aspect {
        let pad = (1.0 - roi_aspect / tensor_aspect) / 2.0;
        (
            PixelRect {
                height: rect.width * tensor_aspect,
                ..*rect
            },
            Letterbox {
                top: pad,
                bottom: pad,
                ..Letterbox::default()
            },
        )
    } else {
        let pad = (1.0 - tensor_aspect / roi_aspect) / 2.0;
        (
            PixelRect {
                width: rect.height / tensor_aspect,
                ..*rect
            },
            Letterbox {
                left: pad,
                right: pad,
                ..Letterbox::default()
            },
        )
    };
    Ok((padded, letterbox))
}

/// Crop, rotate and resize face regions into tensors.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: PreprocessConfig,
    backend: ImageBackend,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig, backend: ImageBackend) -> Self {
        Self { config, backend }
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Sample `rect` of `image` into the configured tensor.
    pub fn run(&self, image: &RgbaImage, rect: &NormalizedRect) -> Result<PreprocessOutput> {
        let _guard = timing_guard("stylizer_core::preprocess", Level::Debug);
        let tensor_size = self.config.tensor_size;
        let image_size = image.dimensions();
        if tensor_size.width == 0 || tensor_size.height == 0 {
            return Err(StylizerError::config("tensor dimensions must be greater than zero"));
        }
        if image_size.0 == 0 || image_size.1 == 0 {
            return Err(StylizerError::config("input image must not be empty"));
        }

        let (roi, letterbox) = pad_rect_to_aspect(&rect.to_pixel_rect(image_size), tensor_size)?;
        let transform = AffineTransform::from_sub_rect(&roi, image_size);
        // Inverting here catches degenerate regions before any pixels are touched.
        transform.try_inverse()?;

        let mapping = transform.pixel_mapping(tensor_size.as_tuple(), image_size);
        let crop = self.backend.warp(image, &mapping, tensor_size.as_tuple())?;
        let tensor = ImageTensor::from_image(&crop, self.config.channels, self.config.input_range)?;

        Ok(PreprocessOutput {
            tensor,
            transform,
            letterbox,
            roi,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use stylizer_utils::Point;

    fn config(width: u32, height: u32) -> PreprocessConfig {
        PreprocessConfig {
            tensor_size: TensorSize::new(width, height),
            channels: 4,
            input_range: ValueRange::UINT8,
        }
    }

    #[test]
    fn wide_region_is_padded_vertically() {
        let rect = PixelRect {
            center: Point::new(50.0, 50.0),
            width: 40.0,
            height: 20.0,
            rotation: 0.3,
        };
        let (padded, letterbox) = pad_rect_to_aspect(&rect, TensorSize::new(64, 64)).expect("pad");
        assert_eq!(padded.width, 40.0);
        assert_eq!(padded.height, 40.0);
        assert_eq!(padded.rotation, 0.3);
        assert!((letterbox.top - 0.25).abs() < 1e-6);
        assert_eq!(letterbox.left, 0.0);
    }

    #[test]
    fn tall_region_is_padded_horizontally() {
        let rect = PixelRect {
            center: Point::new(10.0, 10.0),
            width: 10.0,
            height: 30.0,
            rotation: 0.0,
        };
        let (padded, letterbox) = pad_rect_to_aspect(&rect, TensorSize::new(20, 30)).expect("pad");
        assert!((padded.width - 20.0).abs() < 1e-5);
        assert_eq!(padded.height, 30.0);
        assert!((letterbox.left - 0.25).abs() < 1e-6);
        assert!((letterbox.right - 0.25).abs() < 1e-6);
    }

    #[test]
    fn zero_sized_region_is_rejected() {
        let rect = PixelRect {
            center: Point::ZERO,
            width: 0.0,
            height: 5.0,
            rotation: 0.0,
        };
        assert!(pad_rect_to_aspect(&rect, TensorSize::new(8, 8)).is_err());
    }

    #[test]
    fn full_image_at_native_size_is_copied_exactly() {
        let image = RgbaImage::from_fn(8, 6, |x, y| Rgba([x as u8 * 30, y as u8 * 40, 9, 255]));
        let pre = Preprocessor::new(config(8, 6), ImageBackend::Cpu);
        let out = pre.run(&image, &NormalizedRect::FULL_IMAGE).expect("preprocess");
        assert_eq!(out.letterbox, Letterbox::default());
        assert_eq!(out.tensor.to_image().expect("image"), image);
    }

    #[test]
    fn letterboxed_rows_are_zero() {
        let image = RgbaImage::from_pixel(8, 4, Rgba([200, 100, 50, 255]));
        let pre = Preprocessor::new(config(8, 8), ImageBackend::Cpu);
        let out = pre.run(&image, &NormalizedRect::FULL_IMAGE).expect("preprocess");
        assert!((out.letterbox.top - 0.25).abs() < 1e-6);

        let crop = out.tensor.to_image().expect("image");
        assert_eq!(crop.get_pixel(3, 0).0, [0, 0, 0, 0]);
        assert_eq!(crop.get_pixel(3, 4).0, [200, 100, 50, 255]);
        assert_eq!(crop.get_pixel(3, 7).0, [0, 0, 0, 0]);
    }

    #[test]
    fn forward_transform_maps_tensor_center_to_rect_center() {
        let image = RgbaImage::new(100, 50);
        let rect = NormalizedRect {
            center_x: 0.3,
            center_y: 0.6,
            width: 0.2,
            height: 0.4,
            rotation: 0.4,
        };
        let pre = Preprocessor::new(config(16, 16), ImageBackend::Cpu);
        let out = pre.run(&image, &rect).expect("preprocess");
        let (x, y) = out.transform.transform_point(0.5, 0.5);
        assert!((x - 0.3).abs() < 1e-5 && (y - 0.6).abs() < 1e-5);
    }

    #[test]
    fn empty_image_is_rejected() {
        let pre = Preprocessor::new(config(4, 4), ImageBackend::Cpu);
        let err = pre
            .run(&RgbaImage::new(0, 0), &NormalizedRect::FULL_IMAGE)
            .expect_err("empty image");
        assert!(matches!(err, StylizerError::InvalidConfiguration(_)));
    }
}
