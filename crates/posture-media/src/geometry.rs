//! Letterbox coordinate mapping between source frames and detector input.
//!
//! Provides deterministic, reversible mapping between:
//! - **Source space**: normalized coordinates over the original frame
//! - **Detector space**: normalized coordinates over the fixed square canvas
//!   the frame is letterboxed into
//!
//! The frame is scaled so its longer side fills the canvas, then centered,
//! leaving black bands on the shorter axis.
//!
//! # Usage
//! ```rust
//! use posture_media::geometry::Letterbox;
//!
//! let lb = Letterbox::compute(1280, 720, 256).unwrap();
//! let (y, x) = lb.inverse_transform(0.5, 0.5);
//! assert!((y - 0.5).abs() < 1e-9 && (x - 0.5).abs() < 1e-9);
//! ```

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::error::{MediaError, MediaResult};

/// Default detector canvas size.
pub const DEFAULT_TARGET_SIZE: u32 = 256;

/// Skeleton edges over the canonical keypoint order.
pub const SKELETON_EDGES: [(usize, usize); 16] = [
    // face
    (0, 1),
    (0, 2),
    (1, 3),
    (2, 4),
    // arms
    (5, 6),
    (5, 7),
    (7, 9),
    (6, 8),
    (8, 10),
    // torso
    (5, 11),
    (6, 12),
    (11, 12),
    // legs
    (11, 13),
    (13, 15),
    (12, 14),
    (14, 16),
];

/// Letterbox parameters for one source size and canvas size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Side of the square detector canvas in pixels
    pub target_size: u32,
    /// `target_size / max(source_w, source_h)`
    pub scale: f64,
    /// Left padding in canvas pixels
    pub pad_x: u32,
    /// Top padding in canvas pixels
    pub pad_y: u32,
    /// Scaled frame width before padding
    pub new_width: u32,
    /// Scaled frame height before padding
    pub new_height: u32,
}

impl Letterbox {
    /// Compute letterbox parameters.
    ///
    /// Scaled sides are rounded; padding is floored so odd remainders go to
    /// the right/bottom band.
    pub fn compute(source_w: u32, source_h: u32, target_size: u32) -> MediaResult<Self> {
        if source_w == 0 || source_h == 0 || target_size == 0 {
            return Err(MediaError::internal(format!(
                "Letterbox requires positive dimensions, got {}x{} -> {}",
                source_w, source_h, target_size
            )));
        }

        let scale = target_size as f64 / source_w.max(source_h) as f64;

        let new_width = ((source_w as f64 * scale).round() as u32).clamp(1, target_size);
        let new_height = ((source_h as f64 * scale).round() as u32).clamp(1, target_size);

        Ok(Self {
            target_size,
            scale,
            pad_x: (target_size - new_width) / 2,
            pad_y: (target_size - new_height) / 2,
            new_width,
            new_height,
        })
    }

    /// Map a detector-space point back to source space, clamped to [0, 1].
    ///
    /// `y = (y_padded - pad_y / T) / (new_h / T)`, symmetric for x.
    pub fn inverse_transform(&self, y_padded: f64, x_padded: f64) -> (f64, f64) {
        let t = self.target_size as f64;
        let y = (y_padded - self.pad_y as f64 / t) / (self.new_height as f64 / t);
        let x = (x_padded - self.pad_x as f64 / t) / (self.new_width as f64 / t);
        (y.clamp(0.0, 1.0), x.clamp(0.0, 1.0))
    }

    /// Map a source-space point into detector space.
    pub fn forward_transform(&self, y: f64, x: f64) -> (f64, f64) {
        let t = self.target_size as f64;
        (
            y * (self.new_height as f64 / t) + self.pad_y as f64 / t,
            x * (self.new_width as f64 / t) + self.pad_x as f64 / t,
        )
    }

    /// Resize `image` into a black square canvas of `target_size`.
    pub fn apply(&self, image: &RgbImage) -> RgbImage {
        let resized = imageops::resize(image, self.new_width, self.new_height, FilterType::Triangle);
        let mut canvas = RgbImage::from_pixel(self.target_size, self.target_size, Rgb([0, 0, 0]));
        imageops::replace(&mut canvas, &resized, self.pad_x as i64, self.pad_y as i64);
        canvas
    }
}
