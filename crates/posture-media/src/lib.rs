#![deny(unreachable_patterns)]
//! Streaming pose overlay over FFmpeg.
//!
//! This crate provides:
//! - Video decoding through a piped FFmpeg child, with ffprobe metadata and
//!   audio probing
//! - Letterbox geometry between frame space and the detector canvas
//! - MoveNet MultiPose estimation on ONNX Runtime
//! - Skeleton rendering
//! - Lazy, piped re-encoding with audio muxing
//! - Temp file tracking and the end-to-end pipeline

pub mod command;
pub mod error;
pub mod estimator;
pub mod geometry;
pub mod movenet;
pub mod pipeline;
pub mod probe;
pub mod sink;
pub mod source;
pub mod temp;
pub mod visualizer;

pub use command::{merge_audio, EncoderSpec, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use estimator::{validate_frame, PoseEstimator};
pub use geometry::{Letterbox, DEFAULT_TARGET_SIZE, SKELETON_EDGES};
pub use movenet::{MoveNetConfig, MoveNetEstimator};
pub use pipeline::{PipelineOptions, PipelineOutput, PoseOverlayPipeline};
pub use probe::{has_audio, probe_video, VideoInfo};
pub use sink::{
    EncoderLauncher, EncoderProcess, FfmpegEncoderLauncher, FrameStream, FrameWrite,
    PipedVideoSink, SinkReport, VideoSink,
};
pub use source::{FfmpegSourceFactory, FfmpegVideoSource, Frame, VideoSource, VideoSourceFactory};
pub use temp::TempFileManager;
pub use visualizer::PoseVisualizer;
