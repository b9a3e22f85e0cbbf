//! Image-like tensors with an explicit value range.
//!
//! Tensors are HWC (`[height, width, channels]`). The value range says which numeric interval
//! corresponds to the 8-bit pixel interval `[0, 255]`, in both directions.

use image::{Rgba, RgbaImage};
use ndarray::Array3;
use stylizer_utils::TensorRangeSettings;

use crate::error::{Result, StylizerError};

/// Numeric interval a tensor's values span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueRange {
    Float { min: f32, max: f32 },
    Quantized { min: i64, max: i64 },
}

impl ValueRange {
    /// Float tensors in `[0, 1]`.
    pub const UNIT: ValueRange = ValueRange::Float { min: 0.0, max: 1.0 };
    /// Integer tensors holding raw 8-bit levels.
    pub const UINT8: ValueRange = ValueRange::Quantized { min: 0, max: 255 };

    pub fn validate(&self) -> Result<()> {
        let ok = match *self {
            ValueRange::Float { min, max } => min.is_finite() && max.is_finite() && max > min,
            ValueRange::Quantized { min, max } => {
                max > min && min >= i32::MIN as i64 && max <= i32::MAX as i64
            }
        };
        if ok {
            Ok(())
        } else {
            Err(StylizerError::config(format!(
                "value range must satisfy min < max (got {self:?})"
            )))
        }
    }

    fn float_from_level(&self, level: u8) -> f32 {
        match *self {
            ValueRange::Float { min, max } => min + (max - min) * (level as f32 / 255.0),
            ValueRange::Quantized { min, max } => {
                (min as f64 + (max - min) as f64 * level as f64 / 255.0) as f32
            }
        }
    }

    fn quantized_from_level(&self, level: u8) -> i32 {
        match *self {
            ValueRange::Quantized { min, max } => {
                (min as f64 + (max - min) as f64 * level as f64 / 255.0).round() as i32
            }
            ValueRange::Float { .. } => self.float_from_level(level).round() as i32,
        }
    }

    fn level_from_f32(&self, value: f32) -> u8 {
        let scaled = match *self {
            ValueRange::Float { min, max } => (value - min) / (max - min) * 255.0,
            ValueRange::Quantized { min, max } => {
                ((value as f64 - min as f64) * 255.0 / (max - min) as f64) as f32
            }
        };
        to_level(scaled as f64)
    }

    fn level_from_i32(&self, value: i32) -> u8 {
        let scaled = match *self {
            ValueRange::Quantized { min, max } => {
                (value as f64 - min as f64) * 255.0 / (max - min) as f64
            }
            ValueRange::Float { min, max } => {
                (value as f64 - min as f64) * 255.0 / (max as f64 - min as f64)
            }
        };
        to_level(scaled)
    }
}

impl From<TensorRangeSettings> for ValueRange {
    fn from(settings: TensorRangeSettings) -> Self {
        match settings {
            TensorRangeSettings::Float { min, max } => ValueRange::Float { min, max },
            TensorRangeSettings::Quantized { min, max } => ValueRange::Quantized { min, max },
        }
    }
}

fn to_level(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

/// Element storage of an [`ImageTensor`].
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Float(Array3<f32>),
    Quantized(Array3<i32>),
}

impl TensorData {
    fn shape(&self) -> &[usize] {
        match self {
            TensorData::Float(a) => a.shape(),
            TensorData::Quantized(a) => a.shape(),
        }
    }
}

/// HWC tensor plus the value range it was produced with.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: TensorData,
    range: ValueRange,
}

impl ImageTensor {
    pub fn new(data: TensorData, range: ValueRange) -> Result<Self> {
        range.validate()?;
        let channels = data.shape()[2];
        if !matches!(channels, 0 | 1 | 3 | 4) {
            return Err(StylizerError::contract(format!(
                "image tensors must have 1, 3 or 4 channels (got {channels})"
            )));
        }
        Ok(Self { data, range })
    }

    /// Sample an RGBA image into a tensor with `channels` channels in `range`.
    ///
    /// One channel keeps Rec. 709 luma, three keep RGB, four keep RGBA.
    pub fn from_image(image: &RgbaImage, channels: usize, range: ValueRange) -> Result<Self> {
        range.validate()?;
        if !matches!(channels, 1 | 3 | 4) {
            return Err(StylizerError::config(format!(
                "image tensors must have 1, 3 or 4 channels (got {channels})"
            )));
        }
        let (width, height) = image.dimensions();
        let shape = (height as usize, width as usize, channels);
        let level = |y: usize, x: usize, c: usize| -> u8 {
            let Rgba(px) = *image.get_pixel(x as u32, y as u32);
            if channels == 1 {
                let luma = 0.2126 * px[0] as f32 + 0.7152 * px[1] as f32 + 0.0722 * px[2] as f32;
                luma.round().clamp(0.0, 255.0) as u8
            } else {
                px[c]
            }
        };

        let data = match range {
            ValueRange::Float { .. } => TensorData::Float(Array3::from_shape_fn(
                shape,
                |(y, x, c)| range.float_from_level(level(y, x, c)),
            )),
            ValueRange::Quantized { .. } => TensorData::Quantized(Array3::from_shape_fn(
                shape,
                |(y, x, c)| range.quantized_from_level(level(y, x, c)),
            )),
        };
        Ok(Self { data, range })
    }

    /// Convert back to 8-bit RGBA using exactly the declared range.
    ///
    /// Values outside the range saturate. Tensors without an alpha channel come back opaque.
    pub fn to_image(&self) -> Result<RgbaImage> {
        let (height, width, channels) = self.dims();
        if self.is_empty() {
            return Err(StylizerError::contract(format!(
                "cannot convert an empty tensor ({height}x{width}x{channels}) to an image"
            )));
        }
        let w = u32::try_from(width)
            .map_err(|_| StylizerError::contract("tensor width exceeds image limits"))?;
        let h = u32::try_from(height)
            .map_err(|_| StylizerError::contract("tensor height exceeds image limits"))?;

        let level = |y: usize, x: usize, c: usize| -> u8 {
            match &self.data {
                TensorData::Float(a) => self.range.level_from_f32(a[(y, x, c)]),
                TensorData::Quantized(a) => self.range.level_from_i32(a[(y, x, c)]),
            }
        };

        Ok(RgbaImage::from_fn(w, h, |x, y| {
            let (x, y) = (x as usize, y as usize);
            match channels {
                1 => {
                    let v = level(y, x, 0);
                    Rgba([v, v, v, 255])
                }
                3 => Rgba([level(y, x, 0), level(y, x, 1), level(y, x, 2), 255]),
                _ => Rgba([level(y, x, 0), level(y, x, 1), level(y, x, 2), level(y, x, 3)]),
            }
        }))
    }

    /// `(height, width, channels)`.
    pub fn dims(&self) -> (usize, usize, usize) {
        let shape = self.data.shape();
        (shape[0], shape[1], shape[2])
    }

    pub fn width(&self) -> usize {
        self.dims().1
    }

    pub fn height(&self) -> usize {
        self.dims().0
    }

    pub fn channels(&self) -> usize {
        self.dims().2
    }

    pub fn is_empty(&self) -> bool {
        self.data.shape().iter().any(|&d| d == 0)
    }

    pub fn range(&self) -> ValueRange {
        self.range
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Reinterpret the values under a different declared range without touching them.
    pub fn with_range(self, range: ValueRange) -> Result<Self> {
        Self::new(self.data, range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantized_uint8_range_keeps_every_level() {
        let levels = Array3::from_shape_fn((1, 256, 1), |(_, x, _)| x as i32);
        let tensor = ImageTensor::new(TensorData::Quantized(levels), ValueRange::UINT8)
            .expect("tensor");
        let image = tensor.to_image().expect("image");
        for x in 0..256u32 {
            let px = image.get_pixel(x, 0).0;
            assert_eq!(px, [x as u8, x as u8, x as u8, 255]);
        }
    }

    #[test]
    fn float_range_is_used_exactly() {
        let values = Array3::from_shape_vec((1, 3, 3), vec![-1.0, 0.0, 1.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0])
            .expect("shape");
        let range = ValueRange::Float { min: -1.0, max: 1.0 };
        let image = ImageTensor::new(TensorData::Float(values), range)
            .expect("tensor")
            .to_image()
            .expect("image");
        assert_eq!(image.get_pixel(0, 0).0, [0, 128, 255, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [0, 0, 0, 255]);
        assert_eq!(image.get_pixel(2, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn out_of_range_values_saturate() {
        let values = Array3::from_shape_vec((1, 1, 4), vec![-0.5, 1.5, f32::NAN, 0.5]).expect("shape");
        let image = ImageTensor::new(TensorData::Float(values), ValueRange::UNIT)
            .expect("tensor")
            .to_image()
            .expect("image");
        assert_eq!(image.get_pixel(0, 0).0, [0, 255, 0, 128]);
    }

    #[test]
    fn image_round_trips_through_both_range_kinds() {
        let image = RgbaImage::from_fn(5, 4, |x, y| Rgba([(x * 50) as u8, (y * 60) as u8, 7, 200]));
        for range in [
            ValueRange::UNIT,
            ValueRange::Float { min: -1.0, max: 1.0 },
            ValueRange::UINT8,
            ValueRange::Quantized { min: -128, max: 127 },
        ] {
            let tensor = ImageTensor::from_image(&image, 4, range).expect("tensor");
            assert_eq!(tensor.dims(), (4, 5, 4));
            assert_eq!(tensor.data().shape(), &[4, 5, 4]);
            assert_eq!(tensor.to_image().expect("image"), image, "range {range:?}");
        }
    }

    #[test]
    fn rgb_tensors_drop_alpha_and_come_back_opaque() {
        let image = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 40]));
        let tensor = ImageTensor::from_image(&image, 3, ValueRange::UNIT).expect("tensor");
        assert_eq!(tensor.channels(), 3);
        assert_eq!(tensor.to_image().expect("image").get_pixel(1, 1).0, [10, 20, 30, 255]);
    }

    #[test]
    fn channelless_tensor_is_not_an_image() {
        let tensor = ImageTensor::new(TensorData::Float(Array3::zeros((2, 2, 0))), ValueRange::UNIT)
            .expect("empty tensors are accepted");
        assert!(tensor.is_empty());
        assert!(matches!(
            tensor.to_image(),
            Err(StylizerError::ContractViolation(_))
        ));

        let rowless = ImageTensor::new(TensorData::Quantized(Array3::zeros((0, 3, 3))), ValueRange::UINT8)
            .expect("tensor");
        assert!(rowless.to_image().is_err());
    }

    #[test]
    fn invalid_ranges_and_channels_are_rejected() {
        let image = RgbaImage::new(1, 1);
        assert!(ImageTensor::from_image(&image, 3, ValueRange::Float { min: 1.0, max: 1.0 }).is_err());
        assert!(ImageTensor::from_image(&image, 2, ValueRange::UNIT).is_err());
        assert!(ValueRange::Quantized { min: 5, max: 2 }.validate().is_err());
    }
}
