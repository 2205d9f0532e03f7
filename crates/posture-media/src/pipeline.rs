//! End-to-end pose overlay: decode, estimate, draw, encode.
//!
//! One source frame is in flight at a time. Each frame is validated, handed
//! to the estimator on a blocking thread, stamped with its frame index,
//! drawn on and passed to the sink, which streams it into the encoder. The
//! temp output path is removed on every failure path, including
//! cancellation; on success it is returned to the caller, who owns it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use image::RgbImage;
use metrics::{counter, histogram};
use posture_models::{AnalyzedVideo, Pose, ValidationError, VideoMeta};
use scopeguard::ScopeGuard;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::estimator::{validate_frame, PoseEstimator};
use crate::sink::{FrameStream, PipedVideoSink, VideoSink};
use crate::source::{Frame, FfmpegSourceFactory, VideoSource, VideoSourceFactory};
use crate::temp::TempFileManager;
use crate::visualizer::PoseVisualizer;

/// Metric names emitted by the pipeline.
pub mod names {
    pub const FRAMES_PROCESSED_TOTAL: &str = "posture_frames_processed_total";
    pub const POSES_DETECTED_TOTAL: &str = "posture_poses_detected_total";
    pub const PIPELINE_DURATION_SECONDS: &str = "posture_pipeline_duration_seconds";
}

/// Suffix of the annotated output file.
const OUTPUT_SUFFIX: &str = ".mp4";

/// Optional pipeline policies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOptions {
    /// Reject sources shorter than this many seconds
    pub min_duration_sec: Option<f64>,
    /// Reject sources longer than this many seconds
    pub max_duration_sec: Option<f64>,
    /// Keep every detected pose in [`PipelineOutput::analysis`]
    pub record_poses: bool,
}

impl PipelineOptions {
    pub fn with_duration_limits(mut self, min_sec: f64, max_sec: f64) -> Self {
        self.min_duration_sec = Some(min_sec);
        self.max_duration_sec = Some(max_sec);
        self
    }

    pub fn with_pose_recording(mut self, record: bool) -> Self {
        self.record_poses = record;
        self
    }

    /// Check a source's duration against the limits. Unknown (0) durations
    /// always pass.
    pub fn check_duration(&self, meta: &VideoMeta) -> MediaResult<()> {
        let duration = meta.duration_sec;
        if duration <= 0.0 {
            return Ok(());
        }
        if let Some(min) = self.min_duration_sec {
            if duration < min {
                return Err(MediaError::VideoTooShort { duration, min });
            }
        }
        if let Some(max) = self.max_duration_sec {
            if duration > max {
                return Err(MediaError::VideoTooLong { duration, max });
            }
        }
        Ok(())
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Annotated MP4, tracked by the pipeline's temp manager
    pub output_path: PathBuf,
    pub meta: VideoMeta,
    /// Poses detected across all frames
    pub total_poses: u64,
    pub frames_processed: u64,
    /// Every pose with its frame index, when recording was enabled
    pub analysis: Option<AnalyzedVideo>,
}

/// Composes source, estimator, visualizer and sink.
#[derive(Clone)]
pub struct PoseOverlayPipeline {
    estimator: Arc<dyn PoseEstimator>,
    sources: Arc<dyn VideoSourceFactory>,
    sink: Arc<dyn VideoSink>,
    temp: Arc<TempFileManager>,
    visualizer: PoseVisualizer,
    options: PipelineOptions,
}

impl PoseOverlayPipeline {
    pub fn new(
        estimator: Arc<dyn PoseEstimator>,
        sources: Arc<dyn VideoSourceFactory>,
        sink: Arc<dyn VideoSink>,
        temp: Arc<TempFileManager>,
    ) -> Self {
        Self {
            estimator,
            sources,
            sink,
            temp,
            visualizer: PoseVisualizer::default(),
            options: PipelineOptions::default(),
        }
    }

    /// Pipeline decoding and encoding with FFmpeg.
    pub fn with_ffmpeg(estimator: Arc<dyn PoseEstimator>, temp: Arc<TempFileManager>) -> Self {
        Self::new(
            estimator,
            Arc::new(FfmpegSourceFactory::default()),
            Arc::new(PipedVideoSink::default()),
            temp,
        )
    }

    pub fn with_visualizer(mut self, visualizer: PoseVisualizer) -> Self {
        self.visualizer = visualizer;
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn temp_manager(&self) -> &Arc<TempFileManager> {
        &self.temp
    }

    /// Annotate `input` with every pose whose keypoints reach
    /// `score_threshold`, writing a fresh temp MP4.
    pub async fn execute(&self, input: &Path, score_threshold: f64) -> MediaResult<PipelineOutput> {
        if !(0.0..=1.0).contains(&score_threshold) {
            return Err(ValidationError::OutOfRange {
                field: "score_threshold",
                value: score_threshold,
            }
            .into());
        }

        let started = Instant::now();
        let temp = self.temp.clone();
        let output_path = scopeguard::guard(temp.create_temp_path(OUTPUT_SUFFIX), move |path| {
            if temp.cleanup(&path) {
                debug!(path = %path.display(), "Removed partial output");
            }
        });

        info!(input = %input.display(), score_threshold, "Starting pose overlay");

        let mut source = self.sources.open(input).await?;
        let result = self
            .run(source.as_mut(), input, &output_path, score_threshold)
            .await;
        if let Err(e) = source.close().await {
            warn!(error = %e, "Failed to close video source");
        }
        let mut output = result?;

        output.output_path = ScopeGuard::into_inner(output_path);

        let elapsed = started.elapsed().as_secs_f64();
        histogram!(names::PIPELINE_DURATION_SECONDS).record(elapsed);
        info!(
            input = %input.display(),
            frames = output.frames_processed,
            total_poses = output.total_poses,
            elapsed_secs = elapsed,
            "Pose overlay finished"
        );

        Ok(output)
    }

    async fn run(
        &self,
        source: &mut dyn VideoSource,
        input: &Path,
        output_path: &Path,
        score_threshold: f64,
    ) -> MediaResult<PipelineOutput> {
        let meta = *source.meta();
        self.options.check_duration(&meta)?;

        let mut stream = PoseOverlayStream {
            source,
            estimator: self.estimator.clone(),
            visualizer: self.visualizer,
            score_threshold,
            total_poses: 0,
            frames: 0,
            analysis: self
                .options
                .record_poses
                .then(|| AnalyzedVideo::new(input, meta)),
        };

        let audio_source = meta.has_audio.then_some(input);
        let report = self
            .sink
            .save(&mut stream, output_path, meta.fps, audio_source)
            .await?;

        if report.frames_written != stream.frames {
            warn!(
                written = report.frames_written,
                processed = stream.frames,
                "Sink frame count differs from processed frames"
            );
        }

        Ok(PipelineOutput {
            output_path: output_path.to_path_buf(),
            meta,
            total_poses: stream.total_poses,
            frames_processed: stream.frames,
            analysis: stream.analysis,
        })
    }
}

/// Source frames with poses drawn on, plus running totals read after the
/// stream is exhausted.
struct PoseOverlayStream<'a> {
    source: &'a mut dyn VideoSource,
    estimator: Arc<dyn PoseEstimator>,
    visualizer: PoseVisualizer,
    score_threshold: f64,
    total_poses: u64,
    frames: u64,
    analysis: Option<AnalyzedVideo>,
}

impl PoseOverlayStream<'_> {
    fn estimate(
        &self,
        image: RgbImage,
    ) -> impl std::future::Future<Output = MediaResult<(RgbImage, Vec<Pose>)>> + Send + 'static
    {
        let estimator = self.estimator.clone();
        async move {
            let (image, poses) = tokio::task::spawn_blocking(move || {
                let poses = estimator.estimate(&image);
                (image, poses)
            })
            .await
            .map_err(|e| MediaError::internal(format!("Estimation task failed: {}", e)))?;
            Ok((image, poses?))
        }
    }
}

#[async_trait]
impl FrameStream for PoseOverlayStream<'_> {
    async fn next_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        let Some(Frame { index, image }) = self.source.next_frame().await? else {
            return Ok(None);
        };

        validate_frame(&image)?;
        let (mut image, poses) = self.estimate(image).await?;
        let poses: Vec<Pose> = poses
            .into_iter()
            .map(|pose| pose.with_frame_index(index))
            .collect();

        self.visualizer.draw(&mut image, &poses, self.score_threshold);

        self.frames += 1;
        self.total_poses += poses.len() as u64;
        counter!(names::FRAMES_PROCESSED_TOTAL).increment(1);
        counter!(names::POSES_DETECTED_TOTAL).increment(poses.len() as u64);

        if let Some(analysis) = self.analysis.as_mut() {
            for pose in poses {
                analysis.add_pose(pose);
            }
        }

        Ok(Some(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkReport;
    use image::Rgb;
    use posture_models::{Keypoint, KeypointName, Point2D};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const GREEN: Rgb<u8> = Rgb([0, 255, 0]);

    struct FakeSource {
        meta: VideoMeta,
        frames: VecDeque<RgbImage>,
        next_index: u64,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl VideoSource for FakeSource {
        fn meta(&self) -> &VideoMeta {
            &self.meta
        }

        async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
            Ok(self.frames.pop_front().map(|image| {
                let frame = Frame {
                    index: self.next_index,
                    image,
                };
                self.next_index += 1;
                frame
            }))
        }

        async fn close(&mut self) -> MediaResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeFactory {
        meta: VideoMeta,
        closes: Arc<AtomicUsize>,
    }

    impl FakeFactory {
        fn new(meta: VideoMeta) -> Self {
            Self {
                meta,
                closes: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl VideoSourceFactory for FakeFactory {
        async fn open(&self, _path: &Path) -> MediaResult<Box<dyn VideoSource>> {
            let frames = (0..self.meta.total_frames)
                .map(|_| RgbImage::from_pixel(self.meta.width, self.meta.height, Rgb([0, 0, 0])))
                .collect();
            Ok(Box::new(FakeSource {
                meta: self.meta,
                frames,
                next_index: 0,
                closes: self.closes.clone(),
            }))
        }
    }

    /// Returns `per_frame` centered poses, or fails when `per_frame` is None.
    struct FakeEstimator {
        per_frame: Option<usize>,
    }

    impl PoseEstimator for FakeEstimator {
        fn estimate(&self, _frame: &RgbImage) -> MediaResult<Vec<Pose>> {
            let Some(count) = self.per_frame else {
                return Err(MediaError::pose_estimation("model exploded"));
            };
            let keypoints: Vec<Keypoint> = KeypointName::ALL
                .iter()
                .map(|name| Keypoint::new(*name, Point2D::new(0.5, 0.5).unwrap(), 0.9).unwrap())
                .collect();
            Ok((0..count)
                .map(|_| Pose::new(0, keypoints.clone(), 0.8).unwrap())
                .collect())
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct SaveCall {
        output: PathBuf,
        fps: f64,
        audio_source: Option<PathBuf>,
        center_pixels: Vec<Rgb<u8>>,
    }

    /// Drains the stream, writes a placeholder file, optionally fails.
    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<SaveCall>>,
        fail: bool,
    }

    #[async_trait]
    impl VideoSink for RecordingSink {
        async fn save(
            &self,
            frames: &mut dyn FrameStream,
            output: &Path,
            fps: f64,
            audio_source: Option<&Path>,
        ) -> MediaResult<SinkReport> {
            let mut center_pixels = Vec::new();
            while let Some(frame) = frames.next_frame().await? {
                let (w, h) = frame.dimensions();
                center_pixels.push(*frame.get_pixel(w / 2, h / 2));
            }
            std::fs::write(output, b"mp4")?;

            let written = center_pixels.len() as u64;
            self.calls.lock().unwrap().push(SaveCall {
                output: output.to_path_buf(),
                fps,
                audio_source: audio_source.map(Path::to_path_buf),
                center_pixels,
            });

            if self.fail {
                return Err(MediaError::ffmpeg_failed("Encoder exited with code 1", None, Some(1)));
            }
            if written == 0 {
                return Err(MediaError::processing("No frames to encode"));
            }
            Ok(SinkReport {
                frames_written: written,
            })
        }
    }

    struct Fixture {
        _dir: TempDir,
        temp: Arc<TempFileManager>,
        factory: Arc<FakeFactory>,
        sink: Arc<RecordingSink>,
    }

    fn fixture(meta: VideoMeta, sink: RecordingSink) -> Fixture {
        let dir = TempDir::new().unwrap();
        let temp = Arc::new(TempFileManager::with_base_dir(dir.path().join("work")).unwrap());
        Fixture {
            _dir: dir,
            temp,
            factory: Arc::new(FakeFactory::new(meta)),
            sink: Arc::new(sink),
        }
    }

    fn pipeline(fx: &Fixture, per_frame: Option<usize>) -> PoseOverlayPipeline {
        PoseOverlayPipeline::new(
            Arc::new(FakeEstimator { per_frame }),
            fx.factory.clone(),
            fx.sink.clone(),
            fx.temp.clone(),
        )
    }

    fn hd_meta(frames: u64, has_audio: bool) -> VideoMeta {
        VideoMeta::new(1280, 720, 30.0, frames, has_audio)
    }

    #[tokio::test]
    async fn test_two_frames_with_audio() {
        let fx = fixture(hd_meta(2, true), RecordingSink::default());
        let input = Path::new("/videos/input.mp4");

        let output = pipeline(&fx, Some(1)).execute(input, 0.2).await.unwrap();

        assert_eq!(output.frames_processed, 2);
        assert_eq!(output.total_poses, 2);
        assert!(output.meta.has_audio);
        assert!(output.output_path.exists());
        assert!(fx.temp.is_tracked(&output.output_path));
        assert!(output.analysis.is_none());

        let calls = fx.sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].output, output.output_path);
        assert_eq!(calls[0].fps, 30.0);
        assert_eq!(calls[0].audio_source.as_deref(), Some(input));
        assert_eq!(calls[0].center_pixels, vec![GREEN, GREEN]);
        assert_eq!(fx.factory.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_audio_passes_no_audio_source() {
        let fx = fixture(hd_meta(1, false), RecordingSink::default());

        pipeline(&fx, Some(1))
            .execute(Path::new("in.mp4"), 0.2)
            .await
            .unwrap();

        assert_eq!(fx.sink.calls.lock().unwrap()[0].audio_source, None);
    }

    #[tokio::test]
    async fn test_zero_poses_still_succeeds() {
        let fx = fixture(hd_meta(3, false), RecordingSink::default());

        let output = pipeline(&fx, Some(0))
            .execute(Path::new("in.mp4"), 0.2)
            .await
            .unwrap();

        assert_eq!(output.frames_processed, 3);
        assert_eq!(output.total_poses, 0);
        let calls = fx.sink.calls.lock().unwrap();
        assert!(calls[0].center_pixels.iter().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[tokio::test]
    async fn test_threshold_above_scores_draws_nothing() {
        let fx = fixture(hd_meta(1, false), RecordingSink::default());

        let output = pipeline(&fx, Some(1))
            .execute(Path::new("in.mp4"), 0.95)
            .await
            .unwrap();

        assert_eq!(output.total_poses, 1);
        assert_eq!(fx.sink.calls.lock().unwrap()[0].center_pixels, vec![Rgb([0, 0, 0])]);
    }

    #[tokio::test]
    async fn test_sink_failure_cleans_up_output() {
        let fx = fixture(
            hd_meta(2, true),
            RecordingSink {
                fail: true,
                ..Default::default()
            },
        );

        let err = pipeline(&fx, Some(1))
            .execute(Path::new("in.mp4"), 0.2)
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), Some(1));
        let output = fx.sink.calls.lock().unwrap()[0].output.clone();
        assert!(!output.exists());
        assert_eq!(fx.temp.tracked_count(), 0);
        assert_eq!(fx.factory.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_estimator_failure_propagates() {
        let fx = fixture(hd_meta(2, false), RecordingSink::default());

        let err = pipeline(&fx, None)
            .execute(Path::new("in.mp4"), 0.2)
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::PoseEstimation(_)));
        assert_eq!(fx.temp.tracked_count(), 0);
        assert_eq!(fx.factory.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_threshold() {
        let fx = fixture(hd_meta(1, false), RecordingSink::default());

        let err = pipeline(&fx, Some(1))
            .execute(Path::new("in.mp4"), 1.5)
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::Validation(_)));
        assert!(fx.sink.calls.lock().unwrap().is_empty());
        assert_eq!(fx.temp.tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_duration_limits() {
        // 60 frames at 30 fps = 2 s
        let fx = fixture(hd_meta(60, false), RecordingSink::default());
        let options = PipelineOptions::default().with_duration_limits(3.0, 420.0);

        let err = pipeline(&fx, Some(1))
            .with_options(options)
            .execute(Path::new("in.mp4"), 0.2)
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::VideoTooShort { .. }));
        assert!(fx.sink.calls.lock().unwrap().is_empty());
        assert_eq!(fx.temp.tracked_count(), 0);
        assert_eq!(fx.factory.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_check_duration() {
        let options = PipelineOptions::default().with_duration_limits(3.0, 10.0);

        assert!(options.check_duration(&VideoMeta::new(8, 8, 30.0, 150, false)).is_ok());
        assert!(matches!(
            options.check_duration(&VideoMeta::new(8, 8, 30.0, 600, false)),
            Err(MediaError::VideoTooLong { .. })
        ));
        // Unknown duration is not checked
        assert!(options.check_duration(&VideoMeta::new(8, 8, 30.0, 0, false)).is_ok());
        assert!(PipelineOptions::default()
            .check_duration(&VideoMeta::new(8, 8, 30.0, 1, false))
            .is_ok());
    }

    #[tokio::test]
    async fn test_pose_recording_stamps_frame_index() {
        let fx = fixture(hd_meta(2, false), RecordingSink::default());

        let output = pipeline(&fx, Some(2))
            .with_options(PipelineOptions::default().with_pose_recording(true))
            .execute(Path::new("in.mp4"), 0.2)
            .await
            .unwrap();

        let analysis = output.analysis.unwrap();
        assert_eq!(analysis.total_poses(), 4);
        assert_eq!(analysis.poses_for_frame(0).count(), 2);
        assert_eq!(analysis.poses_for_frame(1).count(), 2);
        assert_eq!(analysis.video_path(), Path::new("in.mp4"));
    }
}
