//! Affine bookkeeping between tensor space and image space.
//!
//! Transforms are 4x4 so they compose with the matrices other image pipelines exchange, but only
//! the 2D part is ever non-trivial.

use nalgebra::{Matrix4, Vector4};
use stylizer_utils::PixelAffine;

use crate::error::{Result, StylizerError};
use crate::rect::PixelRect;

/// Affine map between two normalized (`[0, 1]`) coordinate frames.
///
/// The forward transform produced by the preprocessor maps tensor coordinates to image
/// coordinates; its inverse maps image coordinates back into the tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    matrix: Matrix4<f32>,
}

impl AffineTransform {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    pub fn from_matrix(matrix: Matrix4<f32>) -> Self {
        Self { matrix }
    }

    /// Build from 16 row-major values.
    pub fn from_row_major(values: [f32; 16]) -> Self {
        Self {
            matrix: Matrix4::from_row_slice(&values),
        }
    }

    pub fn to_row_major(&self) -> [f32; 16] {
        let mut out = [0.0; 16];
        for (row, chunk) in out.chunks_exact_mut(4).enumerate() {
            for (col, slot) in chunk.iter_mut().enumerate() {
                *slot = self.matrix[(row, col)];
            }
        }
        out
    }

    pub fn matrix(&self) -> &Matrix4<f32> {
        &self.matrix
    }

    /// Map the unit square onto the rotated sub-rectangle `rect` of an image.
    ///
    /// Input coordinates are relative to the rectangle (`(0, 0)` its top-left corner before
    /// rotation); outputs are relative to the full image of `image_size` pixels.
    pub fn from_sub_rect(rect: &PixelRect, image_size: (u32, u32)) -> Self {
        let (a, b) = (rect.width, rect.height);
        let (d, c) = rect.rotation.sin_cos();
        let (e, f) = (rect.center.x, rect.center.y);
        let g = 1.0 / image_size.0 as f32;
        let h = 1.0 / image_size.1 as f32;

        Self::from_row_major([
            a * c * g,
            -b * d * g,
            0.0,
            (-0.5 * a * c + 0.5 * b * d + e) * g,
            a * d * h,
            b * c * h,
            0.0,
            (-0.5 * b * c - 0.5 * a * d + f) * h,
            0.0,
            0.0,
            a * g,
            0.0,
            0.0,
            0.0,
            0.0,
            1.0,
        ])
    }

    /// Exact inverse; fails rather than falling back to identity.
    pub fn try_inverse(&self) -> Result<Self> {
        self.matrix
            .try_inverse()
            .filter(|inverse| inverse.iter().all(|v| v.is_finite()))
            .map(Self::from_matrix)
            .ok_or(StylizerError::SingularTransform)
    }

    /// Apply the transform to a normalized 2D point.
    pub fn transform_point(&self, x: f32, y: f32) -> (f32, f32) {
        let out = self.matrix * Vector4::new(x, y, 0.0, 1.0);
        (out.x, out.y)
    }

    /// Pixel-space sampling map for warping from a `src_size` image into a `dst_size` image.
    ///
    /// `self` must map destination-normalized coordinates to source-normalized coordinates.
    pub fn pixel_mapping(&self, dst_size: (u32, u32), src_size: (u32, u32)) -> PixelAffine {
        let m = &self.matrix;
        let (dw, dh) = (dst_size.0 as f32, dst_size.1 as f32);
        let (sw, sh) = (src_size.0 as f32, src_size.1 as f32);
        PixelAffine::new([
            m[(0, 0)] * sw / dw,
            m[(0, 1)] * sw / dh,
            m[(0, 3)] * sw,
            m[(1, 0)] * sh / dw,
            m[(1, 1)] * sh / dh,
            m[(1, 3)] * sh,
        ])
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stylizer_utils::Point;

    fn rect(cx: f32, cy: f32, w: f32, h: f32, rotation: f32) -> PixelRect {
        PixelRect {
            center: Point::new(cx, cy),
            width: w,
            height: h,
            rotation,
        }
    }

    #[test]
    fn unrotated_sub_rect_maps_corners() {
        let t = AffineTransform::from_sub_rect(&rect(50.0, 40.0, 20.0, 10.0, 0.0), (100, 80));
        let (x, y) = t.transform_point(0.0, 0.0);
        assert!((x - 0.4).abs() < 1e-6 && (y - 0.4375).abs() < 1e-6);
        let (x, y) = t.transform_point(1.0, 1.0);
        assert!((x - 0.6).abs() < 1e-6 && (y - 0.5625).abs() < 1e-6);
    }

    #[test]
    fn rotated_sub_rect_keeps_center_fixed() {
        let t = AffineTransform::from_sub_rect(&rect(30.0, 60.0, 40.0, 40.0, 0.8), (120, 90));
        let (x, y) = t.transform_point(0.5, 0.5);
        assert!((x - 0.25).abs() < 1e-6);
        assert!((y - 60.0 / 90.0).abs() < 1e-6);
    }

    #[test]
    fn inverse_round_trips_points() {
        let t = AffineTransform::from_sub_rect(&rect(210.0, 150.0, 90.0, 120.0, -0.6), (320, 240));
        let inv = t.try_inverse().expect("invertible");
        for &(u, v) in &[(0.0, 0.0), (0.25, 0.75), (1.0, 0.5), (-0.3, 1.4)] {
            let (x, y) = t.transform_point(u, v);
            let (ru, rv) = inv.transform_point(x, y);
            assert!((ru - u).abs() < 1e-4 && (rv - v).abs() < 1e-4);
        }

        let back = inv.try_inverse().expect("invertible");
        for (a, b) in back.to_row_major().iter().zip(t.to_row_major()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn singular_matrix_is_an_error() {
        let t = AffineTransform::from_sub_rect(&rect(10.0, 10.0, 0.0, 5.0, 0.0), (20, 20));
        assert!(matches!(
            t.try_inverse(),
            Err(StylizerError::SingularTransform)
        ));
    }

    #[test]
    fn pixel_mapping_of_full_frame_is_scale() {
        let t = AffineTransform::from_sub_rect(&rect(50.0, 25.0, 100.0, 50.0, 0.0), (100, 50));
        let map = t.pixel_mapping((10, 5), (100, 50));
        let (sx, sy) = map.apply(0.5, 0.5);
        assert!((sx - 5.0).abs() < 1e-4 && (sy - 5.0).abs() < 1e-4);
    }
}
