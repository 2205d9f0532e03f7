//! API error types.
//!
//! Every error renders as `{"error": {"code": ..., "message": ...}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use posture_media::MediaError;
use posture_storage::StorageError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidVideoFormat(String),

    #[error("Video too short: {duration:.1}s (minimum: {min}s)")]
    VideoTooShort { duration: f64, min: f64 },

    #[error("Video too long: {duration:.1}s (maximum: {:.0} minutes)", .max / 60.0)]
    VideoTooLong { duration: f64, max: f64 },

    #[error("File too large: {size_mb:.1}MB (maximum: {max_mb:.0}MB)")]
    FileTooLarge { size_mb: f64, max_mb: f64 },

    #[error("{0}")]
    InvalidParameter(String),

    #[error("{0}")]
    ModelInference(String),

    #[error("{0}")]
    VideoProcessing(String),

    #[error("{0}")]
    StorageUnavailable(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid_video_format(msg: impl Into<String>) -> Self {
        Self::InvalidVideoFormat(msg.into())
    }

    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidVideoFormat(_) => "INVALID_VIDEO_FORMAT",
            ApiError::VideoTooShort { .. } => "VIDEO_TOO_SHORT",
            ApiError::VideoTooLong { .. } => "VIDEO_TOO_LONG",
            ApiError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            ApiError::InvalidParameter(_) => "INVALID_PARAMETER",
            ApiError::ModelInference(_) => "MODEL_INFERENCE_ERROR",
            ApiError::VideoProcessing(_) => "VIDEO_PROCESSING_ERROR",
            ApiError::StorageUnavailable(_) => "STORAGE_SERVICE_UNAVAILABLE",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidVideoFormat(_)
            | ApiError::VideoTooShort { .. }
            | ApiError::VideoTooLong { .. } => StatusCode::BAD_REQUEST,
            ApiError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::InvalidParameter(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::ModelInference(_)
            | ApiError::VideoProcessing(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl From<MediaError> for ApiError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::VideoOpen { .. } | MediaError::FileNotFound(_) => {
                Self::InvalidVideoFormat(err.to_string())
            }
            MediaError::VideoTooShort { duration, min } => Self::VideoTooShort { duration, min },
            MediaError::VideoTooLong { duration, max } => Self::VideoTooLong { duration, max },
            // Client parameters are checked before the pipeline runs.
            MediaError::Validation(e) => Self::Internal(e.to_string()),
            MediaError::PoseEstimation(_) | MediaError::ModelNotFound(_) => {
                Self::ModelInference(err.to_string())
            }
            _ if err.is_processing() => Self::VideoProcessing(err.to_string()),
            _ => Self::Internal(err.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidKey(_) => Self::Internal(err.to_string()),
            _ => Self::StorageUnavailable(err.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let message = match &self {
            ApiError::Internal(_) | ApiError::VideoProcessing(_) | ApiError::ModelInference(_) => {
                error!(code = self.code(), error = %self, "Request failed");
                if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" {
                    "An internal error occurred".to_string()
                } else {
                    self.to_string()
                }
            }
            _ => self.to_string(),
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}
