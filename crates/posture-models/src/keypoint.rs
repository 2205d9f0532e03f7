//! Keypoint types.
//!
//! Keypoint order is fixed by the detector (COCO order). Skeleton rendering
//! refers to keypoints by index, so the discriminants below must never move.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{check_unit, clamp_unit, ValidationError, ValidationResult};

/// Number of keypoints in a pose.
pub const KEYPOINT_COUNT: usize = 17;

/// Named body landmark, in detector order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum KeypointName {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointName {
    /// All keypoints in canonical order.
    pub const ALL: [KeypointName; KEYPOINT_COUNT] = [
        Self::Nose,
        Self::LeftEye,
        Self::RightEye,
        Self::LeftEar,
        Self::RightEar,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
    ];

    /// Position in the canonical order.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Keypoint at `index` in the canonical order.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEye => "left_eye",
            Self::RightEye => "right_eye",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
        }
    }
}

impl std::fmt::Display for KeypointName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point normalized to frame dimensions, both coordinates in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "RawPoint2D")]
pub struct Point2D {
    x: f64,
    y: f64,
}

#[derive(Deserialize, JsonSchema)]
struct RawPoint2D {
    x: f64,
    y: f64,
}

impl TryFrom<RawPoint2D> for Point2D {
    type Error = ValidationError;

    fn try_from(raw: RawPoint2D) -> ValidationResult<Self> {
        Self::new(raw.x, raw.y)
    }
}

impl Point2D {
    /// Create a point, rejecting coordinates outside [0, 1].
    pub fn new(x: f64, y: f64) -> ValidationResult<Self> {
        Ok(Self {
            x: check_unit("x", x)?,
            y: check_unit("y", y)?,
        })
    }

    /// Create a point from detector output, clipping into [0, 1].
    pub fn clamped(x: f64, y: f64) -> Self {
        Self {
            x: clamp_unit(x),
            y: clamp_unit(y),
        }
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }
}

/// A single detected landmark.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "RawKeypoint")]
pub struct Keypoint {
    name: KeypointName,
    point: Point2D,
    score: f64,
}

#[derive(Deserialize, JsonSchema)]
struct RawKeypoint {
    name: KeypointName,
    point: Point2D,
    score: f64,
}

impl TryFrom<RawKeypoint> for Keypoint {
    type Error = ValidationError;

    fn try_from(raw: RawKeypoint) -> ValidationResult<Self> {
        Self::new(raw.name, raw.point, raw.score)
    }
}

impl Keypoint {
    /// Create a keypoint, rejecting a score outside [0, 1].
    pub fn new(name: KeypointName, point: Point2D, score: f64) -> ValidationResult<Self> {
        Ok(Self {
            name,
            point,
            score: check_unit("score", score)?,
        })
    }

    /// Create a keypoint from detector output, clipping the score into [0, 1].
    pub fn clamped(name: KeypointName, point: Point2D, score: f64) -> Self {
        Self {
            name,
            point,
            score: clamp_unit(score),
        }
    }

    pub fn name(&self) -> KeypointName {
        self.name
    }

    pub fn point(&self) -> Point2D {
        self.point
    }

    pub fn score(&self) -> f64 {
        self.score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypoint_order_is_stable() {
        for (i, name) in KeypointName::ALL.iter().enumerate() {
            assert_eq!(name.index(), i);
            assert_eq!(KeypointName::from_index(i), Some(*name));
        }
        assert_eq!(KeypointName::from_index(17), None);
        assert_eq!(KeypointName::LeftShoulder.index(), 5);
        assert_eq!(KeypointName::LeftElbow.index(), 7);
    }

    #[test]
    fn test_point_bounds() {
        assert!(Point2D::new(0.0, 0.0).is_ok());
        assert!(Point2D::new(1.0, 1.0).is_ok());
        assert!(Point2D::new(0.5, 0.25).is_ok());

        let err = Point2D::new(1.01, 0.5).unwrap_err();
        assert_eq!(err, ValidationError::OutOfRange { field: "x", value: 1.01 });
        assert!(Point2D::new(0.5, -0.001).is_err());
        assert!(Point2D::new(f64::NAN, 0.5).is_err());
    }

    #[test]
    fn test_point_clamped() {
        let p = Point2D::clamped(-0.2, 1.7);
        assert_eq!(p.x(), 0.0);
        assert_eq!(p.y(), 1.0);

        let p = Point2D::clamped(f64::NAN, 0.3);
        assert_eq!(p.x(), 0.0);
        assert_eq!(p.y(), 0.3);
    }

    #[test]
    fn test_keypoint_score_bounds() {
        let p = Point2D::new(0.5, 0.5).unwrap();
        assert!(Keypoint::new(KeypointName::Nose, p, 0.0).is_ok());
        assert!(Keypoint::new(KeypointName::Nose, p, 1.0).is_ok());
        assert!(Keypoint::new(KeypointName::Nose, p, 1.5).is_err());
        assert!(Keypoint::new(KeypointName::Nose, p, -0.1).is_err());

        let k = Keypoint::clamped(KeypointName::Nose, p, 1.5);
        assert_eq!(k.score(), 1.0);
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Result<Point2D, _> = serde_json::from_str(r#"{"x":0.1,"y":0.9}"#);
        assert!(ok.is_ok());

        let bad: Result<Point2D, _> = serde_json::from_str(r#"{"x":1.1,"y":0.9}"#);
        assert!(bad.is_err());

        let kp: Keypoint = serde_json::from_str(
            r#"{"name":"left_wrist","point":{"x":0.2,"y":0.3},"score":0.8}"#,
        )
        .unwrap();
        assert_eq!(kp.name(), KeypointName::LeftWrist);
    }
}
