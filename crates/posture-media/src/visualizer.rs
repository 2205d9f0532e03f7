//! Skeleton overlay rendering.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use posture_models::Pose;

use crate::geometry::SKELETON_EDGES;

/// Default draw color (green).
pub const DEFAULT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Draws keypoints and skeleton edges onto frames in place.
#[derive(Debug, Clone, Copy)]
pub struct PoseVisualizer {
    color: Rgb<u8>,
    point_radius: i32,
    line_thickness: u32,
}

impl Default for PoseVisualizer {
    fn default() -> Self {
        Self {
            color: DEFAULT_COLOR,
            point_radius: 4,
            line_thickness: 2,
        }
    }
}

impl PoseVisualizer {
    pub fn new(color: Rgb<u8>, point_radius: i32, line_thickness: u32) -> Self {
        Self {
            color,
            point_radius: point_radius.max(0),
            line_thickness: line_thickness.max(1),
        }
    }

    pub fn color(&self) -> Rgb<u8> {
        self.color
    }

    /// Draw every pose onto `frame`.
    ///
    /// Keypoints scoring below `score_threshold` are skipped, and an edge is
    /// drawn only when both of its endpoints pass.
    pub fn draw(&self, frame: &mut RgbImage, poses: &[Pose], score_threshold: f64) {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return;
        }

        for pose in poses {
            let visible: Vec<Option<(i32, i32)>> = pose
                .keypoints()
                .iter()
                .map(|kp| {
                    (kp.score() >= score_threshold).then(|| {
                        (
                            to_pixel(kp.point().x(), width),
                            to_pixel(kp.point().y(), height),
                        )
                    })
                })
                .collect();

            for (a, b) in SKELETON_EDGES {
                if let (Some(Some(start)), Some(Some(end))) = (visible.get(a), visible.get(b)) {
                    self.draw_edge(frame, *start, *end);
                }
            }

            for center in visible.iter().flatten() {
                draw_filled_circle_mut(frame, *center, self.point_radius, self.color);
            }
        }
    }

    fn draw_edge(&self, frame: &mut RgbImage, start: (i32, i32), end: (i32, i32)) {
        let (x0, y0) = (start.0 as f32, start.1 as f32);
        let (x1, y1) = (end.0 as f32, end.1 as f32);
        let (dx, dy) = (x1 - x0, y1 - y0);
        let len = (dx * dx + dy * dy).sqrt();

        if len == 0.0 || self.line_thickness == 1 {
            draw_line_segment_mut(frame, (x0, y0), (x1, y1), self.color);
            return;
        }

        // Parallel strokes offset along the unit normal
        let (nx, ny) = (-dy / len, dx / len);
        let half = (self.line_thickness - 1) as f32 / 2.0;
        for i in 0..self.line_thickness {
            let offset = i as f32 - half;
            draw_line_segment_mut(
                frame,
                (x0 + nx * offset, y0 + ny * offset),
                (x1 + nx * offset, y1 + ny * offset),
                self.color,
            );
        }
    }
}

/// Normalized coordinate to pixel index, clamped into the frame.
fn to_pixel(value: f64, dimension: u32) -> i32 {
    let max = dimension.saturating_sub(1) as f64;
    (value * dimension as f64).round().clamp(0.0, max) as i32
}
