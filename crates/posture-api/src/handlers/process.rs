//! Video processing handler.

use std::path::Path;

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use posture_models::VideoMeta;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::use_case::ProcessVideoInput;

/// Overlay threshold used when the form omits `score_threshold`.
pub const DEFAULT_SCORE_THRESHOLD: f64 = 0.2;

/// Prefix of stored annotated videos.
const OUTPUT_KEY_PREFIX: &str = "processed";

#[derive(Debug, Serialize)]
pub struct VideoMetaResponse {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_sec: f64,
    pub has_audio: bool,
}

impl From<VideoMeta> for VideoMetaResponse {
    fn from(meta: VideoMeta) -> Self {
        Self {
            width: meta.width,
            height: meta.height,
            fps: meta.fps,
            duration_sec: meta.duration_sec,
            has_audio: meta.has_audio,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProcessVideoResponse {
    pub signed_url: String,
    pub video_meta: VideoMetaResponse,
    pub total_poses: u64,
    pub processing_time_sec: f64,
}

/// Upload a video and get back a signed URL to its pose-annotated copy.
///
/// Multipart fields: `file` (required) and `score_threshold` (optional,
/// within [0, 1]).
pub async fn process_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ProcessVideoResponse>> {
    let temp = state.temp.clone();
    let mut upload = None;
    let mut score_threshold = DEFAULT_SCORE_THRESHOLD;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, &state))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let suffix = upload_suffix(field.file_name());
                let path = temp.create_temp_path(&suffix);
                let temp = temp.clone();
                let path = scopeguard::guard(path, move |path| {
                    temp.cleanup(&path);
                });
                let size = save_field(field, &path, &state).await?;
                debug!(path = %path.display(), size, "Upload saved");
                upload = Some((path, size));
            }
            "score_threshold" => {
                let text = field.text().await.map_err(|e| multipart_error(e, &state))?;
                score_threshold = parse_score_threshold(&text)?;
            }
            _ => {}
        }
    }

    let Some((input_path, size)) = upload else {
        return Err(ApiError::invalid_video_format("No video file provided"));
    };
    if size == 0 {
        return Err(ApiError::invalid_video_format("Uploaded file is empty"));
    }

    let output_key = format!("{}/{}.mp4", OUTPUT_KEY_PREFIX, Uuid::new_v4());
    info!(key = %output_key, size, score_threshold, "Processing upload");

    let result = state
        .process_video
        .execute(ProcessVideoInput {
            input_path: input_path.to_path_buf(),
            output_key,
            score_threshold,
        })
        .await?;

    Ok(Json(ProcessVideoResponse {
        signed_url: result.signed_url,
        video_meta: result.video_meta.into(),
        total_poses: result.total_poses,
        processing_time_sec: result.processing_time_sec,
    }))
}

/// Stream one multipart field to `path`, enforcing the upload limit.
async fn save_field(mut field: Field<'_>, path: &Path, state: &AppState) -> ApiResult<u64> {
    let limit = state.config.max_upload_bytes as u64;
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create upload file: {}", e)))?;
    let mut written: u64 = 0;

    while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, state))? {
        written += chunk.len() as u64;
        if written > limit {
            return Err(too_large(written, state));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to write upload: {}", e)))?;
    }

    file.flush()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to write upload: {}", e)))?;
    Ok(written)
}

fn multipart_error(err: MultipartError, state: &AppState) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return too_large(state.config.max_upload_bytes as u64 + 1, state);
    }
    ApiError::invalid_video_format(format!("Malformed upload: {}", err.body_text()))
}

fn too_large(size: u64, state: &AppState) -> ApiError {
    ApiError::FileTooLarge {
        size_mb: size as f64 / (1024.0 * 1024.0),
        max_mb: state.config.max_upload_mb(),
    }
}

/// Parse the `score_threshold` form field.
pub fn parse_score_threshold(text: &str) -> ApiResult<f64> {
    let value: f64 = text.trim().parse().map_err(|_| {
        ApiError::invalid_parameter(format!("score_threshold must be a number, got '{}'", text))
    })?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ApiError::invalid_parameter(format!(
            "score_threshold must be between 0.0 and 1.0, got {}",
            value
        )));
    }
    Ok(value)
}

/// Keep a short alphanumeric extension from the client's file name.
fn upload_suffix(file_name: Option<&str>) -> String {
    let ext = file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()));

    match ext {
        Some(ext) => format!("_upload.{}", ext.to_ascii_lowercase()),
        None => "_upload".to_string(),
    }
}
