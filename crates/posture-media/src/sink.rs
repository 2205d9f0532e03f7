//! Video sinks: frames in, encoded MP4 out.
//!
//! [`PipedVideoSink`] starts its encoder only when the first frame arrives,
//! since frame dimensions are unknown before that. Frames are written as raw
//! RGB24 to the encoder's stdin; a full pipe blocks the writer, which is the
//! only backpressure between the pipeline and the encoder. On every error
//! path a still-running encoder is killed before the error is returned.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::command::{check_ffmpeg, collect_stderr, describe_code, spawn_stderr_tail, EncoderSpec};
use crate::error::{MediaError, MediaResult};

/// How long to wait for an encoder that broke its pipe to report an exit code.
const BROKEN_PIPE_GRACE: Duration = Duration::from_secs(2);

/// A single-pass stream of RGB frames.
#[async_trait]
pub trait FrameStream: Send {
    /// Next frame, or `None` when the stream is exhausted.
    async fn next_frame(&mut self) -> MediaResult<Option<RgbImage>>;
}

/// Outcome of a successful save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkReport {
    pub frames_written: u64,
}

/// Writes a frame stream to a video file.
#[async_trait]
pub trait VideoSink: Send + Sync {
    /// Encode every frame of `frames` into `output` at `fps`, muxing the first
    /// audio stream of `audio_source` when given.
    ///
    /// An empty stream is an error.
    async fn save(
        &self,
        frames: &mut dyn FrameStream,
        output: &Path,
        fps: f64,
        audio_source: Option<&Path>,
    ) -> MediaResult<SinkReport>;
}

/// Exit report of a finished encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderExit {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    /// Tail of the encoder's stderr
    pub stderr: Option<String>,
}

impl EncoderExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// What happened to a frame offered to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameWrite {
    Accepted,
    /// The encoder already exited successfully and takes no more input,
    /// e.g. when `-shortest` ended the output at the end of the audio.
    Closed,
}

/// A running encoder accepting raw frames.
#[async_trait]
pub trait EncoderProcess: Send {
    /// Write one raw RGB24 frame.
    async fn write_frame(&mut self, frame: &[u8]) -> MediaResult<FrameWrite>;

    /// Close the input and wait for the encoder to exit.
    async fn finish(&mut self) -> MediaResult<EncoderExit>;

    /// Whether the encoder is still running.
    fn is_running(&mut self) -> bool;

    /// Terminate the encoder.
    async fn kill(&mut self);
}

/// Starts encoder processes.
#[async_trait]
pub trait EncoderLauncher: Send + Sync {
    async fn launch(&self, spec: &EncoderSpec) -> MediaResult<Box<dyn EncoderProcess>>;
}

/// Launches `ffmpeg` reading raw frames from stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegEncoderLauncher;

#[async_trait]
impl EncoderLauncher for FfmpegEncoderLauncher {
    async fn launch(&self, spec: &EncoderSpec) -> MediaResult<Box<dyn EncoderProcess>> {
        check_ffmpeg()?;

        let cmd = spec.to_ffmpeg();
        debug!("Starting encoder: ffmpeg {}", cmd.build_args().join(" "));

        let mut child = cmd
            .to_command()
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::processing(format!("Failed to start encoder: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::processing("Failed to capture encoder stdin"))?;
        let stderr = child.stderr.take().map(spawn_stderr_tail);

        Ok(Box::new(FfmpegEncoder {
            child,
            stdin: Some(stdin),
            stderr,
        }))
    }
}

/// FFmpeg child fed through its stdin pipe.
struct FfmpegEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
}

#[async_trait]
impl EncoderProcess for FfmpegEncoder {
    async fn write_frame(&mut self, frame: &[u8]) -> MediaResult<FrameWrite> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::processing("Encoder input already closed"))?;

        let Err(e) = stdin.write_all(frame).await else {
            return Ok(FrameWrite::Accepted);
        };

        // A broken pipe usually means the encoder died; report its exit code
        if let Ok(Ok(status)) = tokio::time::timeout(BROKEN_PIPE_GRACE, self.child.wait()).await {
            if status.success() {
                drop(self.stdin.take());
                return Ok(FrameWrite::Closed);
            }
            let stderr = collect_stderr(self.stderr.take()).await;
            return Err(MediaError::ffmpeg_failed(
                format!(
                    "Encoder exited with code {} while receiving frames",
                    describe_code(status.code())
                ),
                stderr,
                status.code(),
            ));
        }

        Err(MediaError::processing(format!(
            "Failed to write frame to encoder: {}",
            e
        )))
    }

    async fn finish(&mut self) -> MediaResult<EncoderExit> {
        if let Some(mut stdin) = self.stdin.take() {
            // EOF on stdin lets the encoder flush and exit
            let _ = stdin.shutdown().await;
        }

        let status = self.child.wait().await?;
        let stderr = collect_stderr(self.stderr.take()).await;

        Ok(EncoderExit {
            code: status.code(),
            stderr,
        })
    }

    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn kill(&mut self) {
        drop(self.stdin.take());
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "Failed to kill encoder");
        }
        if let Some(handle) = self.stderr.take() {
            handle.abort();
        }
    }
}

/// Encoder state for one save call.
struct EncodeSession {
    spec: EncoderSpec,
    process: Box<dyn EncoderProcess>,
    frames_written: u64,
}

/// Sink streaming frames into a launched encoder.
#[derive(Clone)]
pub struct PipedVideoSink {
    launcher: Arc<dyn EncoderLauncher>,
}

impl Default for PipedVideoSink {
    fn default() -> Self {
        Self::new(Arc::new(FfmpegEncoderLauncher))
    }
}

impl PipedVideoSink {
    pub fn new(launcher: Arc<dyn EncoderLauncher>) -> Self {
        Self { launcher }
    }

    async fn encode(
        &self,
        frames: &mut dyn FrameStream,
        output: &Path,
        fps: f64,
        audio_source: Option<&Path>,
        session: &mut Option<EncodeSession>,
    ) -> MediaResult<SinkReport> {
        while let Some(frame) = frames.next_frame().await? {
            if session.is_none() {
                *session = Some(self.start(&frame, output, fps, audio_source).await?);
            }
            let active = session
                .as_mut()
                .ok_or_else(|| MediaError::internal("Encoder session missing"))?;

            let (width, height) = frame.dimensions();
            if (width, height) != (active.spec.width, active.spec.height) {
                return Err(MediaError::processing(format!(
                    "Frame {} is {}x{}, expected {}x{}",
                    active.frames_written, width, height, active.spec.width, active.spec.height
                )));
            }

            let raw = frame
                .as_raw()
                .get(..active.spec.frame_len())
                .ok_or_else(|| MediaError::processing("Frame buffer shorter than its dimensions"))?;
            if active.process.write_frame(raw).await? == FrameWrite::Closed {
                info!(
                    frames = active.frames_written,
                    "Encoder closed its input early, stopping"
                );
                break;
            }
            active.frames_written += 1;
        }

        let Some(active) = session.as_mut() else {
            error!(output = %output.display(), "No frames to encode");
            return Err(MediaError::processing(
                "No frames to encode: empty frame stream",
            ));
        };

        let exit = active.process.finish().await?;
        if !exit.success() {
            error!(
                exit_code = ?exit.code,
                stderr = exit.stderr.as_deref().unwrap_or(""),
                "Encoder failed"
            );
            return Err(MediaError::ffmpeg_failed(
                format!("Encoder exited with code {}", describe_code(exit.code)),
                exit.stderr,
                exit.code,
            ));
        }

        Ok(SinkReport {
            frames_written: active.frames_written,
        })
    }

    async fn start(
        &self,
        first: &RgbImage,
        output: &Path,
        fps: f64,
        audio_source: Option<&Path>,
    ) -> MediaResult<EncodeSession> {
        let (width, height) = first.dimensions();
        let spec = EncoderSpec {
            output: output.to_path_buf(),
            width,
            height,
            fps,
            audio_source: audio_source.map(PathBuf::from),
        };

        info!(
            output = %output.display(),
            width,
            height,
            fps,
            with_audio = spec.audio_source.is_some(),
            "Starting encoder"
        );

        let process = self.launcher.launch(&spec).await?;
        Ok(EncodeSession {
            spec,
            process,
            frames_written: 0,
        })
    }
}

#[async_trait]
impl VideoSink for PipedVideoSink {
    async fn save(
        &self,
        frames: &mut dyn FrameStream,
        output: &Path,
        fps: f64,
        audio_source: Option<&Path>,
    ) -> MediaResult<SinkReport> {
        let mut session = None;
        let result = self
            .encode(frames, output, fps, audio_source, &mut session)
            .await;

        if let Some(active) = session.as_mut() {
            if active.process.is_running() {
                warn!(output = %output.display(), "Killing orphaned encoder");
                active.process.kill().await;
            }
        }

        if let Ok(report) = &result {
            info!(
                output = %output.display(),
                frames = report.frames_written,
                "Video saved"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct EncoderLog {
        specs: Vec<EncoderSpec>,
        writes: Vec<usize>,
        finished: bool,
        killed: bool,
    }

    struct FakeLauncher {
        log: Arc<Mutex<EncoderLog>>,
        exit_code: Option<i32>,
        accept_limit: Option<usize>,
    }

    impl FakeLauncher {
        fn new(exit_code: Option<i32>) -> (Self, Arc<Mutex<EncoderLog>>) {
            let log = Arc::new(Mutex::new(EncoderLog::default()));
            (
                Self {
                    log: log.clone(),
                    exit_code,
                    accept_limit: None,
                },
                log,
            )
        }

        /// Encoder that exits with status 0 after `limit` frames.
        fn closing_after(limit: usize) -> (Self, Arc<Mutex<EncoderLog>>) {
            let (mut launcher, log) = Self::new(Some(0));
            launcher.accept_limit = Some(limit);
            (launcher, log)
        }
    }

    #[async_trait]
    impl EncoderLauncher for FakeLauncher {
        async fn launch(&self, spec: &EncoderSpec) -> MediaResult<Box<dyn EncoderProcess>> {
            self.log.lock().unwrap().specs.push(spec.clone());
            Ok(Box::new(FakeEncoder {
                log: self.log.clone(),
                exit_code: self.exit_code,
                accept_limit: self.accept_limit,
                running: true,
            }))
        }
    }

    struct FakeEncoder {
        log: Arc<Mutex<EncoderLog>>,
        exit_code: Option<i32>,
        accept_limit: Option<usize>,
        running: bool,
    }

    #[async_trait]
    impl EncoderProcess for FakeEncoder {
        async fn write_frame(&mut self, frame: &[u8]) -> MediaResult<FrameWrite> {
            let mut log = self.log.lock().unwrap();
            if self.accept_limit == Some(log.writes.len()) {
                self.running = false;
                return Ok(FrameWrite::Closed);
            }
            log.writes.push(frame.len());
            Ok(FrameWrite::Accepted)
        }

        async fn finish(&mut self) -> MediaResult<EncoderExit> {
            self.running = false;
            self.log.lock().unwrap().finished = true;
            Ok(EncoderExit {
                code: self.exit_code,
                stderr: Some("fake stderr".to_string()),
            })
        }

        fn is_running(&mut self) -> bool {
            self.running
        }

        async fn kill(&mut self) {
            self.running = false;
            self.log.lock().unwrap().killed = true;
        }
    }

    struct VecStream {
        frames: VecDeque<RgbImage>,
        fail_when_empty: bool,
    }

    impl VecStream {
        fn new(frames: Vec<RgbImage>) -> Self {
            Self {
                frames: frames.into(),
                fail_when_empty: false,
            }
        }

        fn failing_after(frames: Vec<RgbImage>) -> Self {
            Self {
                frames: frames.into(),
                fail_when_empty: true,
            }
        }
    }

    #[async_trait]
    impl FrameStream for VecStream {
        async fn next_frame(&mut self) -> MediaResult<Option<RgbImage>> {
            match self.frames.pop_front() {
                Some(frame) => Ok(Some(frame)),
                None if self.fail_when_empty => Err(MediaError::pose_estimation("bad frame")),
                None => Ok(None),
            }
        }
    }

    fn frames(count: usize, width: u32, height: u32) -> Vec<RgbImage> {
        (0..count)
            .map(|_| RgbImage::from_pixel(width, height, Rgb([10, 20, 30])))
            .collect()
    }

    #[tokio::test]
    async fn test_save_launches_once_and_writes_every_frame() {
        let (launcher, log) = FakeLauncher::new(Some(0));
        let sink = PipedVideoSink::new(Arc::new(launcher));
        let mut stream = VecStream::new(frames(3, 64, 48));

        let report = sink
            .save(
                &mut stream,
                Path::new("/tmp/out.mp4"),
                25.0,
                Some(Path::new("/tmp/in.mp4")),
            )
            .await
            .unwrap();

        assert_eq!(report.frames_written, 3);
        let log = log.lock().unwrap();
        assert_eq!(log.specs.len(), 1);
        assert_eq!(log.specs[0].width, 64);
        assert_eq!(log.specs[0].height, 48);
        assert_eq!(log.specs[0].fps, 25.0);
        assert_eq!(log.specs[0].audio_source.as_deref(), Some(Path::new("/tmp/in.mp4")));
        assert_eq!(log.writes, vec![64 * 48 * 3; 3]);
        assert!(log.finished);
        assert!(!log.killed);
    }

    #[tokio::test]
    async fn test_empty_stream_is_processing_error() {
        let (launcher, log) = FakeLauncher::new(Some(0));
        let sink = PipedVideoSink::new(Arc::new(launcher));
        let mut stream = VecStream::new(Vec::new());

        let err = sink
            .save(&mut stream, Path::new("/tmp/out.mp4"), 30.0, None)
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::VideoProcessing(_)));
        assert!(err.to_string().contains("No frames"));
        assert!(log.lock().unwrap().specs.is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_code() {
        let (launcher, log) = FakeLauncher::new(Some(1));
        let sink = PipedVideoSink::new(Arc::new(launcher));
        let mut stream = VecStream::new(frames(2, 8, 8));

        let err = sink
            .save(&mut stream, Path::new("/tmp/out.mp4"), 30.0, None)
            .await
            .unwrap_err();

        assert!(err.is_processing());
        assert_eq!(err.exit_code(), Some(1));
        assert!(err.to_string().contains("code 1"));
        assert!(log.lock().unwrap().finished);
    }

    #[tokio::test]
    async fn test_encoder_closing_cleanly_ends_save() {
        let (launcher, log) = FakeLauncher::closing_after(2);
        let sink = PipedVideoSink::new(Arc::new(launcher));
        let mut stream = VecStream::new(frames(5, 8, 8));

        let report = sink
            .save(
                &mut stream,
                Path::new("/tmp/out.mp4"),
                30.0,
                Some(Path::new("/tmp/in.mp4")),
            )
            .await
            .unwrap();

        assert_eq!(report.frames_written, 2);
        let log = log.lock().unwrap();
        assert_eq!(log.writes.len(), 2);
        assert!(log.finished);
        assert!(!log.killed);
    }

    #[tokio::test]
    async fn test_stream_error_kills_encoder() {
        let (launcher, log) = FakeLauncher::new(Some(0));
        let sink = PipedVideoSink::new(Arc::new(launcher));
        let mut stream = VecStream::failing_after(frames(1, 8, 8));

        let err = sink
            .save(&mut stream, Path::new("/tmp/out.mp4"), 30.0, None)
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::PoseEstimation(_)));
        let log = log.lock().unwrap();
        assert_eq!(log.writes.len(), 1);
        assert!(!log.finished);
        assert!(log.killed);
    }

    #[tokio::test]
    async fn test_dimension_change_is_rejected() {
        let (launcher, log) = FakeLauncher::new(Some(0));
        let sink = PipedVideoSink::new(Arc::new(launcher));
        let mut all = frames(1, 8, 8);
        all.extend(frames(1, 16, 8));
        let mut stream = VecStream::new(all);

        let err = sink
            .save(&mut stream, Path::new("/tmp/out.mp4"), 30.0, None)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("expected 8x8"));
        assert!(log.lock().unwrap().killed);
    }

    #[test]
    fn test_encoder_exit_success() {
        let ok = EncoderExit {
            code: Some(0),
            stderr: None,
        };
        let signalled = EncoderExit {
            code: None,
            stderr: None,
        };
        assert!(ok.success());
        assert!(!signalled.success());
    }
}
