//! Video metadata.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Frame rate assumed when the container cannot report one.
pub const DEFAULT_FPS: f64 = 30.0;

/// Metadata of an opened video source. Computed once, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(from = "RawVideoMeta")]
pub struct VideoMeta {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frames per second, always > 0
    pub fps: f64,
    /// Frame count reported by the container (0 if unknown)
    pub total_frames: u64,
    /// `total_frames / fps`, 0 if either is unavailable
    pub duration_sec: f64,
    /// Whether an audio stream was found
    pub has_audio: bool,
}

/// Deserialized form; `duration_sec` is always re-derived.
#[derive(Deserialize, JsonSchema)]
struct RawVideoMeta {
    width: u32,
    height: u32,
    fps: f64,
    total_frames: u64,
    has_audio: bool,
}

impl From<RawVideoMeta> for VideoMeta {
    fn from(raw: RawVideoMeta) -> Self {
        Self::new(raw.width, raw.height, raw.fps, raw.total_frames, raw.has_audio)
    }
}

impl VideoMeta {
    /// Build metadata, replacing a non-positive or non-finite fps with
    /// [`DEFAULT_FPS`] and deriving the duration.
    pub fn new(width: u32, height: u32, fps: f64, total_frames: u64, has_audio: bool) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 {
            fps
        } else {
            DEFAULT_FPS
        };
        let duration_sec = if total_frames > 0 {
            total_frames as f64 / fps
        } else {
            0.0
        };

        Self {
            width,
            height,
            fps,
            total_frames,
            duration_sec,
            has_audio,
        }
    }
}
