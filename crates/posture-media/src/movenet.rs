//! MoveNet MultiPose estimator on ONNX Runtime.
//!
//! Frames are letterboxed onto a square int32 canvas `[1, T, T, 3]`. The
//! model returns `[1, 6, 56]`: per instance, 17 `(y, x, score)` triplets in
//! canvas-normalized coordinates, four box coordinates, and the box score at
//! index 55. Instances whose box score is below the configured threshold
//! are dropped; keypoints are mapped back to frame space through the
//! letterbox inverse.
//!
//! Execution provider selection:
//! - CUDA on Linux with NVIDIA GPU (when `cuda` feature enabled)
//! - CoreML on macOS
//! - CPU fallback on all platforms

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::RgbImage;
use ndarray::ArrayView2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use posture_models::{Keypoint, KeypointName, Point2D, Pose};
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};
use crate::estimator::{validate_frame, PoseEstimator};
use crate::geometry::{Letterbox, DEFAULT_TARGET_SIZE};

/// Values per detected instance.
const INSTANCE_LEN: usize = 56;

/// Position of the instance (box) score.
const BBOX_SCORE_INDEX: usize = 55;

/// Output tensor name of the converted model.
const OUTPUT_NAME: &str = "output_0";

/// MoveNet configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveNetConfig {
    /// Path to the ONNX model
    pub model_path: PathBuf,
    /// Minimum instance score for a pose to be reported
    pub score_threshold: f64,
    /// Side of the square model input, a multiple of 32
    pub target_size: u32,
}

impl Default for MoveNetConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/movenet/multipose_lightning.onnx"),
            score_threshold: 0.3,
            target_size: DEFAULT_TARGET_SIZE,
        }
    }
}

impl MoveNetConfig {
    /// Load from `MOVENET_*` environment variables, keeping defaults for
    /// unset or unparsable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            model_path: std::env::var("MOVENET_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            score_threshold: std::env::var("MOVENET_SCORE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.score_threshold),
            target_size: std::env::var("MOVENET_TARGET_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.target_size),
        }
    }

    pub fn validate(&self) -> MediaResult<()> {
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(MediaError::internal(format!(
                "score_threshold must be between 0.0 and 1.0, got {}",
                self.score_threshold
            )));
        }
        if self.target_size == 0 || self.target_size % 32 != 0 {
            return Err(MediaError::internal(format!(
                "target_size must be a positive multiple of 32, got {}",
                self.target_size
            )));
        }
        Ok(())
    }
}

/// Pose estimator backed by a MoveNet MultiPose ONNX session.
pub struct MoveNetEstimator {
    session: Mutex<Session>,
    config: MoveNetConfig,
}

impl MoveNetEstimator {
    /// Load the model and run one warm-up inference.
    pub fn new(config: MoveNetConfig) -> MediaResult<Self> {
        config.validate()?;
        if !config.model_path.exists() {
            return Err(MediaError::model_not_found(
                config.model_path.display().to_string(),
            ));
        }

        let session = Mutex::new(create_session(&config.model_path)?);
        let estimator = Self { session, config };
        estimator.warm_up()?;

        info!(
            model_path = %estimator.config.model_path.display(),
            target_size = estimator.config.target_size,
            score_threshold = estimator.config.score_threshold,
            "MoveNet estimator initialized"
        );

        Ok(estimator)
    }

    pub fn config(&self) -> &MoveNetConfig {
        &self.config
    }

    /// First inference pays for graph initialization; do it up front.
    fn warm_up(&self) -> MediaResult<()> {
        let t = self.config.target_size as usize;
        let input = to_input_tensor(vec![0; t * t * 3], t)?;
        let output = self.run_inference(input)?;
        debug!(values = output.len(), "MoveNet warm-up finished");
        Ok(())
    }

    /// Letterbox the frame into the model's int32 NHWC input.
    fn preprocess(&self, frame: &RgbImage) -> MediaResult<(Value, Letterbox)> {
        let (width, height) = frame.dimensions();
        let letterbox = Letterbox::compute(width, height, self.config.target_size)?;
        let canvas = letterbox.apply(frame);

        let data: Vec<i32> = canvas.as_raw().iter().map(|&v| v as i32).collect();
        let input = to_input_tensor(data, self.config.target_size as usize)?;
        Ok((input, letterbox))
    }

    fn run_inference(&self, input: Value) -> MediaResult<Vec<f32>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::internal("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| MediaError::pose_estimation(format!("ONNX inference failed: {}", e)))?;

        let output = outputs
            .get(OUTPUT_NAME)
            .ok_or_else(|| MediaError::pose_estimation("Missing output_0 tensor"))?;

        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::pose_estimation(format!("Failed to extract tensor: {}", e)))?;

        Ok(tensor.1.iter().copied().collect())
    }
}

impl PoseEstimator for MoveNetEstimator {
    fn estimate(&self, frame: &RgbImage) -> MediaResult<Vec<Pose>> {
        validate_frame(frame)?;

        let (input, letterbox) = self.preprocess(frame)?;
        let output = self.run_inference(input)?;
        let poses = parse_output(&output, &letterbox, self.config.score_threshold)?;

        debug!(count = poses.len(), "MoveNet estimation completed");
        Ok(poses)
    }
}

fn to_input_tensor(data: Vec<i32>, target_size: usize) -> MediaResult<Value> {
    let shape = vec![1usize, target_size, target_size, 3];
    Tensor::from_array((shape, data.into_boxed_slice()))
        .map(Value::from)
        .map_err(|e| MediaError::internal(format!("Failed to create tensor: {}", e)))
}

/// Decode raw MoveNet output into frame-space poses.
///
/// `output` holds whole instances of 56 values. Keypoint coordinates are
/// mapped through the inverse letterbox transform; scores are clamped into
/// `[0, 1]`. Poses carry frame index 0.
pub fn parse_output(
    output: &[f32],
    letterbox: &Letterbox,
    score_threshold: f64,
) -> MediaResult<Vec<Pose>> {
    if output.is_empty() || output.len() % INSTANCE_LEN != 0 {
        return Err(MediaError::pose_estimation(format!(
            "Unexpected output size {}, expected a multiple of {}",
            output.len(),
            INSTANCE_LEN
        )));
    }

    let instances = ArrayView2::from_shape((output.len() / INSTANCE_LEN, INSTANCE_LEN), output)
        .map_err(|e| MediaError::pose_estimation(format!("Failed to reshape output: {}", e)))?;

    let mut poses = Vec::new();
    for instance in instances.rows() {
        let bbox_score = instance[BBOX_SCORE_INDEX] as f64;
        // NaN scores fail this comparison too
        if !(bbox_score >= score_threshold) {
            continue;
        }

        let keypoints = KeypointName::ALL
            .iter()
            .map(|&name| {
                let base = name.index() * 3;
                let (y, x) =
                    letterbox.inverse_transform(instance[base] as f64, instance[base + 1] as f64);
                Keypoint::clamped(name, Point2D::clamped(x, y), instance[base + 2] as f64)
            })
            .collect();

        poses.push(Pose::new(0, keypoints, bbox_score.min(1.0))?);
    }

    Ok(poses)
}

/// Create ONNX Runtime session with automatic execution provider selection.
fn create_session(model_path: &Path) -> MediaResult<Session> {
    let model_bytes = std::fs::read(model_path)
        .map_err(|e| MediaError::internal(format!("Failed to read model file: {}", e)))?;

    let builder = Session::builder()
        .map_err(|e| MediaError::internal(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MediaError::internal(format!("Failed to set optimization level: {}", e)))?;

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!("Using CUDA execution provider for pose estimation");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, trying alternatives");
    }

    #[cfg(target_os = "macos")]
    {
        use ort::execution_providers::CoreMLExecutionProvider;
        if let Ok(coreml_builder) = builder
            .clone()
            .with_execution_providers([CoreMLExecutionProvider::default().build()])
        {
            if let Ok(session) = coreml_builder.commit_from_memory(&model_bytes) {
                info!("Using CoreML execution provider for pose estimation");
                return Ok(session);
            }
        }
        debug!("CoreML execution provider not available, using CPU");
    }

    info!("Using CPU execution provider for pose estimation");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| MediaError::internal(format!("Failed to load ONNX model: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use posture_models::KEYPOINT_COUNT;

    /// One instance with every keypoint at canvas point `(y, x)`.
    fn instance(y: f32, x: f32, kp_score: f32, bbox_score: f32) -> Vec<f32> {
        let mut values = Vec::with_capacity(INSTANCE_LEN);
        for _ in 0..KEYPOINT_COUNT {
            values.extend([y, x, kp_score]);
        }
        values.extend([0.0, 0.0, 1.0, 1.0, bbox_score]);
        values
    }

    #[test]
    fn test_config_default() {
        let config = MoveNetConfig::default();
        assert_eq!(config.target_size, 256);
        assert!((config.score_threshold - 0.3).abs() < 1e-9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = MoveNetConfig {
            score_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MoveNetConfig {
            target_size: 250,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_model() {
        let config = MoveNetConfig {
            model_path: PathBuf::from("/no/such/model.onnx"),
            ..Default::default()
        };
        let result = MoveNetEstimator::new(config);
        assert!(matches!(result, Err(MediaError::ModelNotFound(_))));
    }

    #[test]
    fn test_parse_output_filters_and_maps_back() {
        // 1280x720 -> 256x144 centered with 56px bands above and below
        let letterbox = Letterbox::compute(1280, 720, 256).unwrap();
        let center_y = (56.0 + 72.0) / 256.0;

        let mut output = instance(center_y, 0.25, 0.8, 0.9);
        output.extend(instance(0.5, 0.5, 0.9, 0.1));
        for _ in 0..4 {
            output.extend(instance(0.0, 0.0, 0.0, 0.0));
        }

        let poses = parse_output(&output, &letterbox, 0.3).unwrap();

        assert_eq!(poses.len(), 1);
        let pose = &poses[0];
        assert_eq!(pose.frame_index(), 0);
        assert!((pose.overall_score() - 0.9).abs() < 1e-6);
        assert_eq!(pose.keypoints().len(), KEYPOINT_COUNT);

        let nose = pose.keypoint(0).unwrap();
        assert_eq!(nose.name(), KeypointName::Nose);
        assert!((nose.point().y() - 0.5).abs() < 1e-6);
        assert!((nose.point().x() - 0.25).abs() < 1e-6);
        assert!((nose.score() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_parse_output_clamps_padding_and_scores() {
        let letterbox = Letterbox::compute(1280, 720, 256).unwrap();
        // Point inside the top padding band, scores slightly out of range
        let output = instance(0.01, 1.2, 1.3, 1.05);

        let poses = parse_output(&output, &letterbox, 0.5).unwrap();

        let kp = poses[0].keypoint(3).unwrap();
        assert_eq!(kp.point().y(), 0.0);
        assert_eq!(kp.point().x(), 1.0);
        assert_eq!(kp.score(), 1.0);
        assert_eq!(poses[0].overall_score(), 1.0);
    }

    #[test]
    fn test_parse_output_threshold_is_inclusive_and_skips_nan() {
        let letterbox = Letterbox::compute(256, 256, 256).unwrap();
        let mut output = instance(0.5, 0.5, 0.5, 0.5);
        output.extend(instance(0.5, 0.5, 0.5, f32::NAN));

        let poses = parse_output(&output, &letterbox, 0.5).unwrap();
        assert_eq!(poses.len(), 1);
    }

    #[test]
    fn test_parse_output_rejects_partial_instance() {
        let letterbox = Letterbox::compute(256, 256, 256).unwrap();
        let err = parse_output(&[0.0; 55], &letterbox, 0.3).unwrap_err();
        assert!(matches!(err, MediaError::PoseEstimation(_)));
        assert!(parse_output(&[], &letterbox, 0.3).is_err());
    }
}
