//! Round trips through real ffmpeg/ffprobe binaries.
//!
//! Run with `cargo test -p posture-media -- --ignored`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use posture_media::{
    has_audio, merge_audio, probe_video, FfmpegCommand, FfmpegRunner, FfmpegSourceFactory,
    FfmpegVideoSource, FrameStream, MediaResult, PipedVideoSink, PoseEstimator,
    PoseOverlayPipeline, TempFileManager, VideoSink, VideoSource, VideoSourceFactory,
};
use posture_models::{Keypoint, KeypointName, Point2D, Pose};
use tempfile::TempDir;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

/// Render a 1 s, 10 fps test pattern, optionally with a sine tone.
async fn make_video(dir: &Path, name: &str, with_audio: bool) -> PathBuf {
    let output = dir.join(name);
    let mut cmd = FfmpegCommand::new(&output)
        .input_arg("-f")
        .input_arg("lavfi")
        .input(format!("testsrc=size={}x{}:rate=10:duration=1", WIDTH, HEIGHT));

    if with_audio {
        cmd = cmd
            .input_arg("-f")
            .input_arg("lavfi")
            .input("sine=frequency=440:duration=1")
            .audio_codec("aac");
    }

    let cmd = cmd.video_codec("libx264").pixel_format("yuv420p");
    FfmpegRunner::new().with_timeout(60).run(&cmd).await.unwrap();
    output
}

/// Frames straight from a source, no overlay.
struct Passthrough<'a>(&'a mut FfmpegVideoSource);

#[async_trait]
impl FrameStream for Passthrough<'_> {
    async fn next_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        Ok(self.0.next_frame().await?.map(|frame| frame.image))
    }
}

struct CenterPoseEstimator;

impl PoseEstimator for CenterPoseEstimator {
    fn estimate(&self, _frame: &RgbImage) -> MediaResult<Vec<Pose>> {
        let keypoints = KeypointName::ALL
            .iter()
            .map(|name| Keypoint::new(*name, Point2D::new(0.5, 0.5).unwrap(), 0.9).unwrap())
            .collect();
        Ok(vec![Pose::new(0, keypoints, 0.9)?])
    }
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_source_reads_every_frame() {
    let dir = TempDir::new().unwrap();
    let input = make_video(dir.path(), "in.mp4", true).await;

    let mut source = FfmpegVideoSource::open(&input, Duration::from_secs(10))
        .await
        .unwrap();

    let meta = *source.meta();
    assert_eq!((meta.width, meta.height), (WIDTH, HEIGHT));
    assert!((meta.fps - 10.0).abs() < 0.01);
    assert!(meta.has_audio);

    let mut indices = Vec::new();
    while let Some(frame) = source.next_frame().await.unwrap() {
        assert_eq!(frame.image.dimensions(), (WIDTH, HEIGHT));
        indices.push(frame.index);
    }

    assert_eq!(indices, (0..10).collect::<Vec<u64>>());
    assert!(!source.is_open());
    source.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_sink_round_trip_keeps_audio() {
    let dir = TempDir::new().unwrap();
    let input = make_video(dir.path(), "in.mp4", true).await;
    let output = dir.path().join("out.mp4");

    let mut source = FfmpegVideoSource::open(&input, Duration::from_secs(10))
        .await
        .unwrap();
    let fps = source.meta().fps;

    let report = PipedVideoSink::default()
        .save(&mut Passthrough(&mut source), &output, fps, Some(&input))
        .await
        .unwrap();

    assert_eq!(report.frames_written, 10);
    let info = probe_video(&output).await.unwrap();
    assert_eq!((info.width, info.height), (WIDTH, HEIGHT));
    assert_eq!(info.codec, "h264");
    assert!(has_audio(&output, Duration::from_secs(10)).await);
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_pipeline_end_to_end() {
    let dir = TempDir::new().unwrap();
    let input = make_video(dir.path(), "in.mp4", false).await;
    let temp = Arc::new(TempFileManager::with_base_dir(dir.path().join("work")).unwrap());

    let pipeline = PoseOverlayPipeline::with_ffmpeg(Arc::new(CenterPoseEstimator), temp.clone());
    let output = pipeline.execute(&input, 0.2).await.unwrap();

    assert_eq!(output.frames_processed, 10);
    assert_eq!(output.total_poses, 10);
    assert!(!output.meta.has_audio);

    let info = probe_video(&output.output_path).await.unwrap();
    assert_eq!((info.width, info.height), (WIDTH, HEIGHT));
    assert!(!has_audio(&output.output_path, Duration::from_secs(10)).await);

    assert!(temp.cleanup(&output.output_path));
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_open_garbage_is_video_open_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.mp4");
    tokio::fs::write(&path, vec![0u8; 4096]).await.unwrap();

    let err = FfmpegSourceFactory::new()
        .open(&path)
        .await
        .err()
        .expect("garbage must not open");
    assert!(matches!(err, posture_media::MediaError::VideoOpen { .. }));
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_merge_audio() {
    let dir = TempDir::new().unwrap();
    let silent = make_video(dir.path(), "silent.mp4", false).await;
    let original = make_video(dir.path(), "original.mp4", true).await;
    let output = dir.path().join("merged.mp4");

    merge_audio(&silent, &original, &output, Duration::from_secs(60))
        .await
        .unwrap();

    assert!(has_audio(&output, Duration::from_secs(10)).await);
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_encoder_failure_is_processing_error() {
    let dir = TempDir::new().unwrap();
    let input = make_video(dir.path(), "in.mp4", false).await;
    let output = dir.path().join("missing-dir").join("out.mp4");

    let mut source = FfmpegVideoSource::open(&input, Duration::from_secs(10))
        .await
        .unwrap();

    let err = PipedVideoSink::default()
        .save(&mut Passthrough(&mut source), &output, 10.0, None)
        .await
        .unwrap_err();

    assert!(err.is_processing(), "unexpected error: {}", err);
    assert!(!output.exists());
}
