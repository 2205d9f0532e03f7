//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// FFmpeg pseudo-path for reading from stdin.
pub const PIPE_STDIN: &str = "pipe:0";

/// FFmpeg pseudo-path for writing to stdout.
pub const PIPE_STDOUT: &str = "pipe:1";

/// Number of stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// One `-i` input with the options that precede it.
#[derive(Debug, Clone)]
struct FfmpegInput {
    args: Vec<String>,
    source: String,
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Inputs in `-i` order
    inputs: Vec<FfmpegInput>,
    /// Options collected for the next input
    pending_input_args: Vec<String>,
    /// Output file path or pipe
    output: String,
    /// Output arguments (after all inputs)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command writing to `output`.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self::with_output(output.as_ref().to_string_lossy().to_string())
    }

    /// Create a new FFmpeg command writing to stdout.
    pub fn to_stdout() -> Self {
        Self::with_output(PIPE_STDOUT.to_string())
    }

    fn with_output(output: String) -> Self {
        Self {
            inputs: Vec::new(),
            pending_input_args: Vec::new(),
            output,
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add an input argument. Applies to the next [`input`](Self::input).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.pending_input_args.push(arg.into());
        self
    }

    /// Add a file input.
    pub fn input(self, path: impl AsRef<Path>) -> Self {
        let source = path.as_ref().to_string_lossy().to_string();
        self.push_input(source)
    }

    /// Add a stdin input.
    pub fn pipe_input(self) -> Self {
        self.push_input(PIPE_STDIN.to_string())
    }

    fn push_input(mut self, source: String) -> Self {
        let args = std::mem::take(&mut self.pending_input_args);
        self.inputs.push(FfmpegInput { args, source });
        self
    }

    /// Add output arguments (after all inputs).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Select a stream for the output.
    pub fn map(self, spec: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(spec)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set output pixel format.
    pub fn pixel_format(self, pix_fmt: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(pix_fmt)
    }

    /// Set output container/format.
    pub fn format(self, format: impl Into<String>) -> Self {
        self.output_arg("-f").output_arg(format)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Stop at the shortest input stream.
    pub fn shortest(self) -> Self {
        self.output_arg("-shortest")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-hide_banner".to_string());
        args.push("-loglevel".to_string());
        args.push(self.log_level.clone());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.source.clone());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.clone());

        args
    }

    /// Create a tokio command for this invocation.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(self.build_args());
        cmd
    }
}

/// Encoder settings for the annotated output.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSpec {
    /// Output MP4 path
    pub output: PathBuf,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Output frame rate
    pub fps: f64,
    /// File whose first audio stream is muxed in, if any
    pub audio_source: Option<PathBuf>,
}

impl EncoderSpec {
    /// Bytes in one raw RGB24 frame.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Render the FFmpeg invocation reading raw RGB24 frames from stdin.
    ///
    /// Output is H.264 yuv420p at CRF 23. With an audio source the first
    /// audio stream is re-encoded to AAC and the output ends at the shorter
    /// of the two streams.
    pub fn to_ffmpeg(&self) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new(&self.output)
            .input_arg("-f")
            .input_arg("rawvideo")
            .input_arg("-pix_fmt")
            .input_arg("rgb24")
            .input_arg("-s")
            .input_arg(format!("{}x{}", self.width, self.height))
            .input_arg("-r")
            .input_arg(self.fps.to_string())
            .pipe_input();

        if let Some(audio) = &self.audio_source {
            cmd = cmd.input(audio).map("0:v:0").map("1:a:0?");
        }

        cmd = cmd
            .video_codec("libx264")
            .pixel_format("yuv420p")
            .crf(23)
            .preset("medium");

        if self.audio_source.is_some() {
            cmd = cmd.audio_codec("aac").shortest();
        }

        cmd.output_args(["-movflags", "+faststart"])
    }
}

/// Render the FFmpeg invocation decoding `input` to raw RGB24 on stdout.
pub fn decoder_command(input: impl AsRef<Path>) -> FfmpegCommand {
    FfmpegCommand::to_stdout()
        .input(input)
        .output_args(["-an", "-sn"])
        .format("rawvideo")
        .pixel_format("rgb24")
}

/// Render the FFmpeg invocation muxing `original`'s audio into `video`.
///
/// Video is stream-copied, audio re-encoded to AAC.
pub fn merge_audio_command(
    video: impl AsRef<Path>,
    original: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> FfmpegCommand {
    FfmpegCommand::new(output)
        .input(video)
        .input(original)
        .map("0:v:0")
        .map("1:a:0")
        .video_codec("copy")
        .audio_codec("aac")
}

/// Mux the audio of `original` into the silent `video`, writing `output`.
pub async fn merge_audio(
    video: impl AsRef<Path>,
    original: impl AsRef<Path>,
    output: impl AsRef<Path>,
    timeout: Duration,
) -> MediaResult<()> {
    let cmd = merge_audio_command(video, original, output);
    FfmpegRunner::new()
        .with_timeout(timeout.as_secs().max(1))
        .run(&cmd)
        .await
        .map_err(|e| match e {
            MediaError::FfmpegFailed {
                stderr, exit_code, ..
            } => MediaError::ffmpeg_failed(
                format!("Audio merge failed with exit code {}", describe_code(exit_code)),
                stderr,
                exit_code,
            ),
            other => other,
        })
}

/// Runner for one-shot FFmpeg commands with a timeout.
#[derive(Debug, Default)]
pub struct FfmpegRunner {
    /// Timeout in seconds
    timeout_secs: Option<u64>,
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self { timeout_secs: None }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run an FFmpeg command to completion.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr_tail = child.stderr.take().map(spawn_stderr_tail);

        let result = self.wait_for_completion(&mut child).await;
        let stderr = collect_stderr(stderr_tail).await;

        result.map_err(|e| match e {
            MediaError::FfmpegFailed {
                message, exit_code, ..
            } => MediaError::ffmpeg_failed(message, stderr, exit_code),
            other => other,
        })
    }

    /// Wait for child process with timeout.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<()> {
        let status = match self.timeout_secs {
            Some(timeout_secs) => {
                match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()).await {
                    Ok(result) => result?,
                    Err(_) => {
                        warn!("FFmpeg timed out after {} seconds, killing process", timeout_secs);
                        let _ = child.kill().await;
                        return Err(MediaError::Timeout(timeout_secs));
                    }
                }
            }
            None => child.wait().await?,
        };

        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                None,
                status.code(),
            ))
        }
    }
}

/// Drain a child's stderr in the background, keeping the last lines.
///
/// Draining keeps a chatty child from blocking on a full stderr pipe.
pub fn spawn_stderr_tail(stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr).lines();
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

        while let Ok(Some(line)) = reader.next_line().await {
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }

        Vec::from(tail).join("\n")
    })
}

/// Await a stderr tail task, returning `None` for empty output.
pub async fn collect_stderr(handle: Option<JoinHandle<String>>) -> Option<String> {
    let text = handle?.await.ok()?;
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Format an optional exit code; `None` means killed by a signal.
pub(crate) fn describe_code(code: Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none (terminated by signal)".to_string())
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}
