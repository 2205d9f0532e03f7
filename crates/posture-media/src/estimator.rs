//! Pose estimator contract.

use image::RgbImage;
use posture_models::Pose;

use crate::error::{MediaError, MediaResult};

/// Detects poses in one RGB frame.
///
/// Implementations leave `frame_index` at 0; the caller stamps it.
pub trait PoseEstimator: Send + Sync {
    fn estimate(&self, frame: &RgbImage) -> MediaResult<Vec<Pose>>;
}

/// Check that `frame` is a well-formed 3-channel, 8-bit image before it is
/// handed to an estimator.
pub fn validate_frame(frame: &RgbImage) -> MediaResult<()> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(MediaError::pose_estimation(format!(
            "Image dimensions must be positive, got {}x{}",
            width, height
        )));
    }

    let pixels = width as usize * height as usize;
    let len = frame.as_raw().len();
    if len != pixels * 3 {
        let channels = len as f64 / pixels as f64;
        return Err(MediaError::pose_estimation(format!(
            "Expected 3 channels (RGB), got {:.2}",
            channels
        )));
    }

    Ok(())
}
