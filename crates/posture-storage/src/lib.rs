//! Cloudflare R2 storage for annotated videos.
//!
//! This crate provides:
//! - The `StorageService` contract used by the processing use case
//! - An R2 (S3-compatible) client with retry and timeout settings
//! - Presigned GET URL generation

pub mod client;
pub mod error;
pub mod service;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use service::{StorageService, DEFAULT_SIGNED_URL_EXPIRY, VIDEO_CONTENT_TYPE};
