//! Video sources: decoded RGB frames plus metadata.
//!
//! [`FfmpegVideoSource`] runs one FFmpeg decoder child per opened file and
//! reads fixed-size RGB24 frames from its stdout. The child is the single
//! decoder handle of the source and is released exactly once, either by
//! [`VideoSource::close`], at end of stream, or on drop.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use posture_models::VideoMeta;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::{
    check_ffmpeg, collect_stderr, decoder_command, describe_code, spawn_stderr_tail,
};
use crate::error::{MediaError, MediaResult};
use crate::probe::{has_audio, probe_video, AUDIO_PROBE_TIMEOUT};

/// One decoded frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// 0-based, strictly increasing position in the stream
    pub index: u64,
    /// Full-resolution RGB image
    pub image: RgbImage,
}

/// An opened video.
#[async_trait]
pub trait VideoSource: Send {
    /// Metadata computed when the source was opened.
    fn meta(&self) -> &VideoMeta;

    /// Next frame, or `None` once the decoder signals end of stream.
    async fn next_frame(&mut self) -> MediaResult<Option<Frame>>;

    /// Release the decoder. Safe to call more than once.
    async fn close(&mut self) -> MediaResult<()>;
}

/// Opens [`VideoSource`]s by path.
#[async_trait]
pub trait VideoSourceFactory: Send + Sync {
    /// Open `path`, failing with [`MediaError::VideoOpen`] when the container
    /// cannot be demuxed.
    async fn open(&self, path: &Path) -> MediaResult<Box<dyn VideoSource>>;
}

/// Factory for [`FfmpegVideoSource`].
#[derive(Debug, Clone)]
pub struct FfmpegSourceFactory {
    audio_probe_timeout: Duration,
}

impl Default for FfmpegSourceFactory {
    fn default() -> Self {
        Self {
            audio_probe_timeout: AUDIO_PROBE_TIMEOUT,
        }
    }
}

impl FfmpegSourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the audio probe timeout.
    pub fn with_audio_probe_timeout(mut self, timeout: Duration) -> Self {
        self.audio_probe_timeout = timeout;
        self
    }
}

#[async_trait]
impl VideoSourceFactory for FfmpegSourceFactory {
    async fn open(&self, path: &Path) -> MediaResult<Box<dyn VideoSource>> {
        let source = FfmpegVideoSource::open(path, self.audio_probe_timeout).await?;
        Ok(Box::new(source))
    }
}

struct Decoder {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
}

impl Decoder {
    /// Stop the child if still running and reap it.
    async fn release(mut self) -> (Option<ExitStatus>, Option<String>) {
        if matches!(self.child.try_wait(), Ok(None)) {
            debug!("Killing decoder before end of stream");
            let _ = self.child.kill().await;
        }
        let status = self.child.wait().await.ok();
        let stderr = collect_stderr(self.stderr.take()).await;
        (status, stderr)
    }
}

/// Video source backed by an FFmpeg decoder child.
pub struct FfmpegVideoSource {
    path: PathBuf,
    meta: VideoMeta,
    decoder: Option<Decoder>,
    frame_len: usize,
    next_index: u64,
}

impl FfmpegVideoSource {
    /// Probe `path` and start its decoder.
    pub async fn open(path: impl AsRef<Path>, audio_probe_timeout: Duration) -> MediaResult<Self> {
        let path = path.as_ref();

        let info = probe_video(path).await.map_err(|e| match e {
            MediaError::FileNotFound(p) => MediaError::video_open(p, "File not found"),
            other => other,
        })?;
        let audio = has_audio(path, audio_probe_timeout).await;
        let meta = VideoMeta::new(info.width, info.height, info.fps, info.total_frames, audio);

        check_ffmpeg()?;
        let mut child = decoder_command(path)
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::video_open(path, format!("Failed to spawn decoder: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::video_open(path, "Failed to capture decoder stdout"))?;
        let stderr = child.stderr.take().map(spawn_stderr_tail);

        info!(
            path = %path.display(),
            width = meta.width,
            height = meta.height,
            fps = meta.fps,
            total_frames = meta.total_frames,
            has_audio = meta.has_audio,
            "Opened video source"
        );

        Ok(Self {
            path: path.to_path_buf(),
            meta,
            decoder: Some(Decoder {
                child,
                stdout: BufReader::new(stdout),
                stderr,
            }),
            frame_len: meta.width as usize * meta.height as usize * 3,
            next_index: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the decoder handle is still held.
    pub fn is_open(&self) -> bool {
        self.decoder.is_some()
    }

    /// Release the decoder after end of stream, reporting a failed decode
    /// when nothing was produced.
    async fn finish(&mut self) -> MediaResult<()> {
        let Some(decoder) = self.decoder.take() else {
            return Ok(());
        };
        let (status, stderr) = decoder.release().await;
        let failed = status.map(|s| !s.success()).unwrap_or(true);

        if failed && self.next_index == 0 {
            return Err(MediaError::video_open(
                &self.path,
                format!(
                    "Decoder exited with code {} before producing a frame: {}",
                    describe_code(status.and_then(|s| s.code())),
                    stderr.unwrap_or_default()
                ),
            ));
        }
        if failed {
            warn!(
                path = %self.path.display(),
                frames = self.next_index,
                stderr = stderr.as_deref().unwrap_or(""),
                "Decoder exited with an error after partial output"
            );
        }

        debug!(path = %self.path.display(), frames = self.next_index, "Decoder finished");
        Ok(())
    }
}

#[async_trait]
impl VideoSource for FfmpegVideoSource {
    fn meta(&self) -> &VideoMeta {
        &self.meta
    }

    async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; self.frame_len];
        let filled = read_full(&mut decoder.stdout, &mut buf).await?;

        if filled < self.frame_len {
            if filled > 0 {
                warn!(
                    path = %self.path.display(),
                    bytes = filled,
                    expected = self.frame_len,
                    "Dropping truncated trailing frame"
                );
            }
            self.finish().await?;
            return Ok(None);
        }

        let image = RgbImage::from_raw(self.meta.width, self.meta.height, buf)
            .ok_or_else(|| MediaError::internal("Decoded frame size mismatch"))?;
        let frame = Frame {
            index: self.next_index,
            image,
        };
        self.next_index += 1;

        Ok(Some(frame))
    }

    async fn close(&mut self) -> MediaResult<()> {
        if let Some(decoder) = self.decoder.take() {
            decoder.release().await;
            debug!(path = %self.path.display(), "Decoder released");
        }
        Ok(())
    }
}

/// Fill `buf` from `reader`, stopping early only at EOF.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> MediaResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
