//! Face landmark lists and selection of the six alignment anchors.

use log::debug;
use serde::{Deserialize, Serialize};
use stylizer_utils::Point;

use crate::error::{Result, StylizerError};

/// One keypoint in image-relative coordinates (`x`, `y` in `[0, 1]`, `z` relative depth).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedLandmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl NormalizedLandmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Position in pixels for an image of `(width, height)`.
    pub fn to_pixels(&self, image_size: (u32, u32)) -> Point {
        Point::new(self.x * image_size.0 as f32, self.y * image_size.1 as f32)
    }
}

/// All landmarks of one face, indexed by the detector's mesh convention.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LandmarkList(pub Vec<NormalizedLandmark>);

impl LandmarkList {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NormalizedLandmark> {
        self.0.get(index)
    }
}

impl From<Vec<NormalizedLandmark>> for LandmarkList {
    fn from(points: Vec<NormalizedLandmark>) -> Self {
        Self(points)
    }
}

/// Anatomical role of an alignment anchor.
///
/// Left and right follow the detector convention: "left eye" is the subject's right eye as it
/// appears on the left of a frontal image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LandmarkRole {
    LeftEyeOuter,
    LeftEyeInner,
    RightEyeOuter,
    RightEyeInner,
    MouthLeft,
    MouthRight,
}

impl LandmarkRole {
    /// Selection order of the anchors.
    pub const ALL: [LandmarkRole; 6] = [
        LandmarkRole::LeftEyeOuter,
        LandmarkRole::LeftEyeInner,
        LandmarkRole::RightEyeOuter,
        LandmarkRole::RightEyeInner,
        LandmarkRole::MouthLeft,
        LandmarkRole::MouthRight,
    ];

    /// Index of this anchor in a face mesh landmark list.
    pub const fn mesh_index(self) -> usize {
        match self {
            LandmarkRole::LeftEyeOuter => 33,
            LandmarkRole::LeftEyeInner => 133,
            LandmarkRole::RightEyeOuter => 263,
            LandmarkRole::RightEyeInner => 362,
            LandmarkRole::MouthLeft => 61,
            LandmarkRole::MouthRight => 291,
        }
    }

    const fn slot(self) -> usize {
        self as usize
    }
}

/// Smallest landmark list length that contains every anchor.
pub const REQUIRED_LANDMARKS: usize = {
    let mut max = 0;
    let mut i = 0;
    while i < LandmarkRole::ALL.len() {
        let index = LandmarkRole::ALL[i].mesh_index();
        if index > max {
            max = index;
        }
        i += 1;
    }
    max + 1
};

/// Axis-aligned bounds of the anchors in relative coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelativeBounds {
    pub xmin: f32,
    pub ymin: f32,
    pub width: f32,
    pub height: f32,
}

/// The six anchors of one face, used as a synthetic detection for rect estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentDetection {
    anchors: [NormalizedLandmark; 6],
    bounds: RelativeBounds,
}

impl AlignmentDetection {
    /// Build a detection from anchors given in [`LandmarkRole::ALL`] order.
    pub fn from_anchors(anchors: [NormalizedLandmark; 6]) -> Self {
        let (mut xmin, mut ymin) = (f32::INFINITY, f32::INFINITY);
        let (mut xmax, mut ymax) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
        for p in &anchors {
            xmin = xmin.min(p.x);
            ymin = ymin.min(p.y);
            xmax = xmax.max(p.x);
            ymax = ymax.max(p.y);
        }
        Self {
            anchors,
            bounds: RelativeBounds {
                xmin,
                ymin,
                width: xmax - xmin,
                height: ymax - ymin,
            },
        }
    }

    pub fn get(&self, role: LandmarkRole) -> NormalizedLandmark {
        self.anchors[role.slot()]
    }

    /// Anchors in [`LandmarkRole::ALL`] order.
    pub fn anchors(&self) -> &[NormalizedLandmark; 6] {
        &self.anchors
    }

    pub fn relative_bounds(&self) -> RelativeBounds {
        self.bounds
    }

    fn pixel(&self, role: LandmarkRole, image_size: (u32, u32)) -> Point {
        self.get(role).to_pixels(image_size)
    }

    /// Mean of the two left-eye corners, in pixels.
    pub fn left_eye_center(&self, image_size: (u32, u32)) -> Point {
        self.pixel(LandmarkRole::LeftEyeOuter, image_size)
            .midpoint(self.pixel(LandmarkRole::LeftEyeInner, image_size))
    }

    /// Mean of the two right-eye corners, in pixels.
    pub fn right_eye_center(&self, image_size: (u32, u32)) -> Point {
        self.pixel(LandmarkRole::RightEyeOuter, image_size)
            .midpoint(self.pixel(LandmarkRole::RightEyeInner, image_size))
    }

    /// Mean of the two mouth corners, in pixels.
    pub fn mouth_center(&self, image_size: (u32, u32)) -> Point {
        self.pixel(LandmarkRole::MouthLeft, image_size)
            .midpoint(self.pixel(LandmarkRole::MouthRight, image_size))
    }
}

/// Pick the alignment anchors of the first face.
///
/// Returns `Ok(None)` when no face was detected. Only one face is supported, so any further
/// lists are ignored. A list too short to contain every anchor is a detector contract violation.
pub fn select_alignment_landmarks(faces: &[LandmarkList]) -> Result<Option<AlignmentDetection>> {
    let Some(face) = faces.first() else {
        return Ok(None);
    };
    if faces.len() > 1 {
        debug!(
            "landmarker returned {} faces; using the first one only",
            faces.len()
        );
    }
    if face.len() < REQUIRED_LANDMARKS {
        return Err(StylizerError::contract(format!(
            "landmark list has {} points but the alignment anchors need at least {}",
            face.len(),
            REQUIRED_LANDMARKS
        )));
    }

    let mut anchors = [NormalizedLandmark::default(); 6];
    for (slot, role) in anchors.iter_mut().zip(LandmarkRole::ALL) {
        *slot = face.0[role.mesh_index()];
    }
    Ok(Some(AlignmentDetection::from_anchors(anchors)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh(len: usize) -> LandmarkList {
        (0..len)
            .map(|i| NormalizedLandmark::new(i as f32 / 1000.0, 0.5, 0.0))
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn required_length_covers_highest_anchor() {
        assert_eq!(REQUIRED_LANDMARKS, 363);
    }

    #[test]
    fn selects_anchors_in_role_order() {
        let detection = select_alignment_landmarks(&[mesh(478)])
            .expect("select")
            .expect("one face");
        let xs: Vec<f32> = detection.anchors().iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![0.033, 0.133, 0.263, 0.362, 0.061, 0.291]);
        assert_eq!(detection.get(LandmarkRole::MouthRight).x, 0.291);

        let bounds = detection.relative_bounds();
        assert_eq!(bounds.xmin, 0.033);
        assert!((bounds.width - 0.329).abs() < 1e-6);
        assert_eq!(bounds.height, 0.0);
    }

    #[test]
    fn empty_input_is_no_face() {
        assert!(select_alignment_landmarks(&[]).expect("select").is_none());
    }

    #[test]
    fn only_first_face_is_used() {
        let mut second = mesh(478);
        second.0[33].x = 0.9;
        let detection = select_alignment_landmarks(&[mesh(478), second])
            .expect("select")
            .expect("face");
        assert_eq!(detection.get(LandmarkRole::LeftEyeOuter).x, 0.033);
    }

    #[test]
    fn short_list_is_contract_violation() {
        let err = select_alignment_landmarks(&[mesh(362)]).expect_err("too short");
        assert!(matches!(err, StylizerError::ContractViolation(_)));
        assert!(select_alignment_landmarks(&[mesh(363)]).is_ok());
    }

    #[test]
    fn landmark_lists_deserialize_without_depth() {
        let list: LandmarkList =
            serde_json::from_str(r#"[{"x":0.25,"y":0.75},{"x":0.5,"y":0.5,"z":-0.1}]"#)
                .expect("parse");
        assert_eq!(list.len(), 2);
        assert_eq!(list.0[0], NormalizedLandmark::new(0.25, 0.75, 0.0));
    }
}
