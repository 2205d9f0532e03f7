//! Axum HTTP API for pose overlay processing.
//!
//! This crate provides:
//! - Multipart upload of a video and a signed URL to its annotated copy
//! - Shared-token access gate, security headers and request logging
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod use_case;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
pub use use_case::{ProcessVideoInput, ProcessVideoResult, ProcessVideoUseCase};
