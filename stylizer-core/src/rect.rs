//! Rotated face rectangles and the policy that derives them from alignment anchors.

use std::f32::consts::{PI, TAU};

use serde::{Deserialize, Serialize};
use stylizer_utils::{FaceRectSettings, Point};

use crate::error::{Result, StylizerError};
use crate::landmarks::AlignmentDetection;

/// Normalize an angle into `(-π, π]`.
pub fn normalize_radians(angle: f32) -> f32 {
    angle - TAU * ((angle - PI) / TAU).ceil()
}

/// Rotated rectangle in image-relative coordinates.
///
/// Centre and size are fractions of the image width/height; `rotation` is in radians, positive
/// values turning clockwise on screen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub rotation: f32,
}

impl NormalizedRect {
    /// The whole image, unrotated.
    pub const FULL_IMAGE: NormalizedRect = NormalizedRect {
        center_x: 0.5,
        center_y: 0.5,
        width: 1.0,
        height: 1.0,
        rotation: 0.0,
    };

    /// Copy with the rotation set to exactly zero.
    pub fn without_rotation(&self) -> NormalizedRect {
        NormalizedRect {
            rotation: 0.0,
            ..*self
        }
    }

    pub fn to_pixel_rect(&self, image_size: (u32, u32)) -> PixelRect {
        let (w, h) = (image_size.0 as f32, image_size.1 as f32);
        PixelRect {
            center: Point::new(self.center_x * w, self.center_y * h),
            width: self.width * w,
            height: self.height * h,
            rotation: self.rotation,
        }
    }

    pub fn is_valid(&self) -> bool {
        [self.center_x, self.center_y, self.width, self.height, self.rotation]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }
}

impl Default for NormalizedRect {
    fn default() -> Self {
        Self::FULL_IMAGE
    }
}

/// Rotated rectangle in pixel units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub center: Point,
    pub width: f32,
    pub height: f32,
    pub rotation: f32,
}

impl PixelRect {
    pub fn to_normalized(&self, image_size: (u32, u32)) -> NormalizedRect {
        let (w, h) = (image_size.0 as f32, image_size.1 as f32);
        NormalizedRect {
            center_x: self.center.x / w,
            center_y: self.center.y / h,
            width: self.width / w,
            height: self.height / h,
            rotation: self.rotation,
        }
    }
}

/// Region of the input image handed to the landmarker, expressed as relative bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionOfInterest {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    /// Counter-clockwise rotation in degrees; must be a multiple of 90.
    pub rotation_degrees: i32,
}

impl Default for RegionOfInterest {
    fn default() -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            right: 1.0,
            bottom: 1.0,
            rotation_degrees: 0,
        }
    }
}

impl RegionOfInterest {
    /// Validate the bounds and convert them into a rectangle.
    pub fn to_rect(&self) -> Result<NormalizedRect> {
        let in_unit = |lo: f32, hi: f32| lo.is_finite() && hi.is_finite() && 0.0 <= lo && lo < hi && hi <= 1.0;
        if !in_unit(self.left, self.right) || !in_unit(self.top, self.bottom) {
            return Err(StylizerError::config(format!(
                "region of interest must satisfy 0 <= left < right <= 1 and 0 <= top < bottom <= 1 (got {self:?})"
            )));
        }
        if self.rotation_degrees % 90 != 0 {
            return Err(StylizerError::config(format!(
                "region of interest rotation must be a multiple of 90 degrees (got {})",
                self.rotation_degrees
            )));
        }
        Ok(NormalizedRect {
            center_x: (self.left + self.right) / 2.0,
            center_y: (self.top + self.bottom) / 2.0,
            width: self.right - self.left,
            height: self.bottom - self.top,
            rotation: normalize_radians(-(self.rotation_degrees as f32).to_radians()),
        })
    }
}

/// Strategy turning the six alignment anchors into the face rectangle.
pub trait FaceRectPolicy: Send + Sync + std::fmt::Debug {
    /// Must return a rect with positive width and height for any finite input.
    fn estimate(&self, detection: &AlignmentDetection, image_size: (u32, u32)) -> NormalizedRect;
}

/// Square face rect sized from the eye span and the eye-to-mouth distance, rotated along the
/// eye line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeMouthRectPolicy {
    pub eye_span_scale: f32,
    pub eye_mouth_scale: f32,
    pub center_shift: f32,
    pub min_side_fraction: f32,
}

impl Default for EyeMouthRectPolicy {
    fn default() -> Self {
        FaceRectSettings::default().into()
    }
}

impl From<FaceRectSettings> for EyeMouthRectPolicy {
    fn from(settings: FaceRectSettings) -> Self {
        Self {
            eye_span_scale: settings.eye_span_scale,
            eye_mouth_scale: settings.eye_mouth_scale,
            center_shift: settings.center_shift,
            min_side_fraction: settings.min_side_fraction,
        }
    }
}

impl EyeMouthRectPolicy {
    fn min_side(&self, image_size: (u32, u32)) -> f32 {
        let shorter = image_size.0.min(image_size.1) as f32;
        (self.min_side_fraction * shorter).max(1.0)
    }
}

impl FaceRectPolicy for EyeMouthRectPolicy {
    fn estimate(&self, detection: &AlignmentDetection, image_size: (u32, u32)) -> NormalizedRect {
        let left_eye = detection.left_eye_center(image_size);
        let right_eye = detection.right_eye_center(image_size);
        let mouth = detection.mouth_center(image_size);

        let eye_center = left_eye.midpoint(right_eye);
        let eye_to_eye = right_eye - left_eye;
        let eye_to_mouth = mouth - eye_center;

        let rotation = if eye_to_eye.length() > 0.0 {
            normalize_radians(eye_to_eye.angle())
        } else {
            0.0
        };
        let center = eye_center + eye_to_mouth * self.center_shift;

        let mut side = (eye_to_eye.length() * self.eye_span_scale)
            .max(eye_to_mouth.length() * self.eye_mouth_scale);
        if !side.is_finite() || side < self.min_side(image_size) {
            side = self.min_side(image_size);
        }

        PixelRect {
            center,
            width: side,
            height: side,
            rotation,
        }
        .to_normalized(image_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::NormalizedLandmark;

    fn detection(points: [(f32, f32); 6]) -> AlignmentDetection {
        AlignmentDetection::from_anchors(points.map(|(x, y)| NormalizedLandmark::new(x, y, 0.0)))
    }

    fn frontal() -> AlignmentDetection {
        // Eye corners on y = 0.4, mouth corners on y = 0.7, mirrored around x = 0.5.
        detection([
            (0.30, 0.40),
            (0.42, 0.40),
            (0.70, 0.40),
            (0.58, 0.40),
            (0.40, 0.70),
            (0.60, 0.70),
        ])
    }

    #[test]
    fn normalize_radians_targets_half_open_range() {
        assert!((normalize_radians(PI) - PI).abs() < 1e-6);
        assert!((normalize_radians(-PI) - PI).abs() < 1e-6);
        assert!((normalize_radians(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-5);
        assert_eq!(normalize_radians(0.25), 0.25);
    }

    #[test]
    fn symmetric_face_is_upright_and_centred_on_anchor_centroid() {
        let policy = EyeMouthRectPolicy::default();
        let image = (400, 400);
        let det = frontal();
        let rect = policy.estimate(&det, image);

        assert_eq!(rect.rotation, 0.0);
        let n = det.anchors().len() as f32;
        let cx = det.anchors().iter().map(|p| p.x).sum::<f32>() / n;
        let cy = det.anchors().iter().map(|p| p.y).sum::<f32>() / n;
        assert!((rect.center_x - cx).abs() < 1e-5);
        assert!((rect.center_y - cy).abs() < 1e-5);

        // Eye span 0.28 * 400 px = 112 px, eye-to-mouth 0.3 * 400 = 120 px.
        let expected = (112.0f32 * 2.0).max(120.0 * 1.8) / 400.0;
        assert!((rect.width - expected).abs() < 1e-5);
        assert_eq!(rect.width, rect.height);
    }

    #[test]
    fn rect_is_square_in_pixels_on_wide_images() {
        let rect = EyeMouthRectPolicy::default().estimate(&frontal(), (800, 400));
        let px = rect.to_pixel_rect((800, 400));
        assert!((px.width - px.height).abs() < 1e-3);
    }

    #[test]
    fn tilted_eye_line_sets_rotation() {
        let angle = 0.3f32;
        let (s, c) = angle.sin_cos();
        let rotate = |x: f32, y: f32| {
            let (dx, dy) = (x - 0.5, y - 0.5);
            (0.5 + dx * c - dy * s, 0.5 + dx * s + dy * c)
        };
        let base = frontal();
        let mut points = [(0.0, 0.0); 6];
        for (slot, p) in points.iter_mut().zip(base.anchors()) {
            *slot = rotate(p.x, p.y);
        }
        let rect = EyeMouthRectPolicy::default().estimate(&detection(points), (500, 500));
        assert!((rect.rotation - angle).abs() < 1e-4);
    }

    #[test]
    fn collinear_anchors_fall_back_to_minimum_side() {
        let det = detection([(0.5, 0.5); 6]);
        let rect = EyeMouthRectPolicy::default().estimate(&det, (640, 480));
        assert!(rect.is_valid());
        let px = rect.to_pixel_rect((640, 480));
        assert!((px.width - 24.0).abs() < 1e-3);
        assert_eq!(rect.rotation, 0.0);

        let tiny = EyeMouthRectPolicy::default().estimate(&det, (4, 4));
        assert!((tiny.to_pixel_rect((4, 4)).width - 1.0).abs() < 1e-6);
    }

    #[test]
    fn estimated_rects_are_valid_across_layouts_and_image_sizes() {
        let mut state = 0x9e37_79b9_7f4a_7c15u64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 40) as f32 / (1u64 << 24) as f32
        };

        let mut layouts: Vec<[(f32, f32); 6]> = vec![
            [(0.5, 0.5); 6],
            [(0.0, 0.0); 6],
            [(1.0, 1.0); 6],
            [(0.1, 0.3), (0.2, 0.3), (0.3, 0.3), (0.4, 0.3), (0.5, 0.3), (0.6, 0.3)],
            [(0.4, 0.1), (0.4, 0.2), (0.4, 0.3), (0.4, 0.4), (0.4, 0.5), (0.4, 0.6)],
            [(0.2, 0.2), (0.2, 0.2), (0.2, 0.2), (0.2, 0.2), (0.9, 0.9), (0.9, 0.9)],
        ];
        for _ in 0..200 {
            let mut points = [(0.0, 0.0); 6];
            for p in &mut points {
                *p = (next() * 1.2 - 0.1, next() * 1.2 - 0.1);
            }
            layouts.push(points);
        }

        let policies = [
            EyeMouthRectPolicy::default(),
            EyeMouthRectPolicy {
                eye_span_scale: 0.0,
                eye_mouth_scale: 0.0,
                ..EyeMouthRectPolicy::default()
            },
        ];
        let sizes = [(1, 1), (1, 480), (640, 1), (3, 4096), (640, 480), (1920, 1080)];

        for policy in &policies {
            for points in &layouts {
                let det = detection(*points);
                for &size in &sizes {
                    let rect = policy.estimate(&det, size);
                    assert!(rect.is_valid(), "{rect:?} from {points:?} on {size:?}");
                    assert_eq!(rect, policy.estimate(&det, size));
                }
            }
        }
    }

    #[test]
    fn without_rotation_zeroes_only_rotation() {
        let rect = NormalizedRect {
            rotation: 1.2,
            ..NormalizedRect::FULL_IMAGE
        };
        let stripped = rect.without_rotation();
        assert_eq!(stripped.rotation, 0.0);
        assert_eq!(stripped.width, rect.width);
    }

    #[test]
    fn region_of_interest_validates_bounds_and_rotation() {
        let roi = RegionOfInterest {
            left: 0.1,
            top: 0.2,
            right: 0.5,
            bottom: 0.6,
            rotation_degrees: -90,
        };
        let rect = roi.to_rect().expect("valid roi");
        assert!((rect.center_x - 0.3).abs() < 1e-6);
        assert!((rect.height - 0.4).abs() < 1e-6);
        assert!((rect.rotation - PI / 2.0).abs() < 1e-6);

        let inverted = RegionOfInterest {
            left: 0.6,
            right: 0.5,
            ..roi
        };
        assert!(matches!(
            inverted.to_rect(),
            Err(StylizerError::InvalidConfiguration(_))
        ));
        let skewed = RegionOfInterest {
            rotation_degrees: 45,
            ..roi
        };
        assert!(skewed.to_rect().is_err());
        assert_eq!(
            RegionOfInterest::default().to_rect().expect("full"),
            NormalizedRect::FULL_IMAGE
        );
    }
}
