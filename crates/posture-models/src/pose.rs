//! Pose entity and the analyzed-video aggregate.

use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{check_unit, ValidationError, ValidationResult};
use crate::keypoint::{Keypoint, KeypointName, KEYPOINT_COUNT};
use crate::video::VideoMeta;

/// One detected person in one frame.
///
/// Always holds exactly [`KEYPOINT_COUNT`] keypoints in canonical order,
/// including low-confidence ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "RawPose")]
pub struct Pose {
    frame_index: u64,
    keypoints: Vec<Keypoint>,
    overall_score: f64,
}

#[derive(Deserialize, JsonSchema)]
struct RawPose {
    frame_index: u64,
    keypoints: Vec<Keypoint>,
    overall_score: f64,
}

impl TryFrom<RawPose> for Pose {
    type Error = ValidationError;

    fn try_from(raw: RawPose) -> ValidationResult<Self> {
        Self::new(raw.frame_index, raw.keypoints, raw.overall_score)
    }
}

impl Pose {
    /// Create a pose, checking keypoint count, order and score range.
    pub fn new(
        frame_index: u64,
        keypoints: Vec<Keypoint>,
        overall_score: f64,
    ) -> ValidationResult<Self> {
        if keypoints.len() != KEYPOINT_COUNT {
            return Err(ValidationError::KeypointCount(keypoints.len()));
        }

        for (index, (keypoint, expected)) in keypoints.iter().zip(KeypointName::ALL).enumerate() {
            if keypoint.name() != expected {
                return Err(ValidationError::KeypointOrder {
                    index,
                    expected: expected.as_str(),
                    found: keypoint.name().as_str(),
                });
            }
        }

        Ok(Self {
            frame_index,
            keypoints,
            overall_score: check_unit("overall_score", overall_score)?,
        })
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Same pose stamped with another frame index.
    pub fn with_frame_index(mut self, frame_index: u64) -> Self {
        self.frame_index = frame_index;
        self
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    /// Keypoint by canonical index.
    pub fn keypoint(&self, index: usize) -> Option<&Keypoint> {
        self.keypoints.get(index)
    }

    pub fn overall_score(&self) -> f64 {
        self.overall_score
    }
}

/// Analysis result for a whole video.
///
/// Poses are appended frame by frame and never removed.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AnalyzedVideo {
    video_path: PathBuf,
    meta: VideoMeta,
    poses: Vec<Pose>,
}

impl AnalyzedVideo {
    pub fn new(video_path: impl AsRef<Path>, meta: VideoMeta) -> Self {
        Self {
            video_path: video_path.as_ref().to_path_buf(),
            meta,
            poses: Vec::new(),
        }
    }

    pub fn video_path(&self) -> &Path {
        &self.video_path
    }

    pub fn meta(&self) -> &VideoMeta {
        &self.meta
    }

    pub fn add_pose(&mut self, pose: Pose) {
        self.poses.push(pose);
    }

    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }

    /// Poses detected in the given frame.
    pub fn poses_for_frame(&self, frame_index: u64) -> impl Iterator<Item = &Pose> {
        self.poses
            .iter()
            .filter(move |p| p.frame_index == frame_index)
    }

    pub fn total_poses(&self) -> usize {
        self.poses.len()
    }
}
