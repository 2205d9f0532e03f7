//! Shared data models for the pose overlay service.
//!
//! This crate provides Serde-serializable types for:
//! - Keypoints and their canonical 17-part order
//! - Per-frame poses and the analyzed-video aggregate
//! - Video metadata reported by a decoded source

pub mod error;
pub mod keypoint;
pub mod pose;
pub mod video;

// Re-export common types
pub use error::{ValidationError, ValidationResult};
pub use keypoint::{Keypoint, KeypointName, Point2D, KEYPOINT_COUNT};
pub use pose::{AnalyzedVideo, Pose};
pub use video::{VideoMeta, DEFAULT_FPS};
