//! Error types for media operations.

use std::path::PathBuf;

use posture_models::ValidationError;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while decoding, annotating or encoding video.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("Failed to open video {path}: {message}")]
    VideoOpen { path: PathBuf, message: String },

    #[error("Video processing failed: {0}")]
    VideoProcessing(String),

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Pose estimation failed: {0}")]
    PoseEstimation(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Video too short: {duration:.1}s (minimum: {min}s)")]
    VideoTooShort { duration: f64, min: f64 },

    #[error("Video too long: {duration:.1}s (maximum: {max}s)")]
    VideoTooLong { duration: f64, max: f64 },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create a video open error.
    pub fn video_open(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::VideoOpen {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a video processing error.
    pub fn processing(message: impl Into<String>) -> Self {
        Self::VideoProcessing(message.into())
    }

    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a pose estimation error.
    pub fn pose_estimation(message: impl Into<String>) -> Self {
        Self::PoseEstimation(message.into())
    }

    /// Create a model not found error.
    pub fn model_not_found(path: impl Into<String>) -> Self {
        Self::ModelNotFound(path.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Exit code of a failed FFmpeg process, if this error carries one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::FfmpegFailed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    /// Whether this error belongs to the video-processing kind (encoder
    /// launch, write or exit failure, or an empty frame sequence).
    pub fn is_processing(&self) -> bool {
        matches!(
            self,
            Self::VideoProcessing(_) | Self::FfmpegFailed { .. } | Self::FfmpegNotFound
        )
    }
}
