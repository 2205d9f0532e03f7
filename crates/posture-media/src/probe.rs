//! FFprobe video information.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use posture_models::DEFAULT_FPS;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// Upper bound for the audio-track query.
pub const AUDIO_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Video stream information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate, 30.0 when not reported
    pub fps: f64,
    /// Frame count (0 if unknown)
    pub total_frames: u64,
    /// Duration in seconds (0 if unknown)
    pub duration: f64,
    /// Video codec
    pub codec: String,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<f64>,
}

impl FfprobeStream {
    /// Display rotation in degrees, from side data or the legacy `rotate` tag.
    fn rotation(&self) -> i64 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|sd| sd.rotation)
            .or_else(|| self.tags.get("rotate").and_then(|r| r.parse::<f64>().ok()))
            .unwrap_or(0.0);
        (degrees.round() as i64).rem_euclid(360)
    }
}

/// Probe the first video stream of a file.
///
/// Fails with [`MediaError::VideoOpen`] when the container cannot be read or
/// holds no usable video stream.
pub async fn probe_video(path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            "-select_streams",
            "v:0",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::video_open(
            path,
            format!(
                "ffprobe could not read container: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }

    parse_video_info(&output.stdout, path)
}

fn parse_video_info(stdout: &[u8], path: &Path) -> MediaResult<VideoInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| MediaError::video_open(path, format!("Malformed probe output: {}", e)))?;

    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| MediaError::video_open(path, "No video stream found"))?;

    // FFmpeg autorotates on decode, so report display dimensions
    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => match stream.rotation() {
            90 | 270 => (h, w),
            _ => (w, h),
        },
        _ => {
            return Err(MediaError::video_open(
                path,
                "Video stream has no positive dimensions",
            ))
        }
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(DEFAULT_FPS);

    let duration = stream
        .duration
        .as_deref()
        .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(0.0);

    let total_frames = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(|| (duration * fps).round() as u64);

    Ok(VideoInfo {
        width,
        height,
        fps,
        total_frames,
        duration,
        codec: stream.codec_name.clone().unwrap_or_default(),
    })
}

/// Report whether `path` has at least one audio stream.
///
/// Every failure (missing ffprobe, timeout, non-zero exit, malformed output)
/// is logged and reported as no audio.
pub async fn has_audio(path: impl AsRef<Path>, timeout: Duration) -> bool {
    let path = path.as_ref();
    match probe_audio_streams(path, timeout).await {
        Ok(found) => {
            debug!(path = %path.display(), has_audio = found, "Audio probe finished");
            found
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Audio probe failed, assuming no audio");
            false
        }
    }
}

async fn probe_audio_streams(path: &Path, timeout: Duration) -> MediaResult<bool> {
    check_ffprobe()?;

    let child = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "a",
            "-show_entries",
            "stream=index,codec_type",
            "-of",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| MediaError::Timeout(timeout.as_secs()))??;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: "FFprobe audio query failed".to_string(),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_audio_streams(&output.stdout)
}

fn parse_audio_streams(stdout: &[u8]) -> MediaResult<bool> {
    #[derive(Deserialize)]
    struct AudioProbe {
        #[serde(default)]
        streams: Vec<serde_json::Value>,
    }

    let probe: AudioProbe = serde_json::from_slice(stdout)?;
    Ok(!probe.streams.is_empty())
}

/// Parse frame rate string (e.g., "30/1" or "29.97"). Non-positive rates
/// are treated as unavailable.
fn parse_frame_rate(s: &str) -> Option<f64> {
    let rate = if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den <= 0.0 {
            return None;
        }
        num / den
    } else {
        s.parse().ok()?
    };

    (rate.is_finite() && rate > 0.0).then_some(rate)
}
