//! Storage contract used by the processing use case.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::info;

use crate::client::R2Client;
use crate::error::{StorageError, StorageResult};

/// Default lifetime of a signed URL.
pub const DEFAULT_SIGNED_URL_EXPIRY: Duration = Duration::from_secs(3600);

/// Content type of uploaded annotated videos.
pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";

/// Object storage for annotated videos.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Upload `local` under `key`, returning the stored key.
    async fn upload(&self, local: &Path, key: &str) -> StorageResult<String>;

    /// Time-limited GET URL for `key`.
    async fn generate_signed_url(&self, key: &str, expires_in: Duration) -> StorageResult<String>;
}

/// Reject keys the bucket would store under a surprising name.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.trim().is_empty() {
        return Err(StorageError::invalid_key("key is empty"));
    }
    if key.starts_with('/') || key.split('/').any(|part| part == "..") {
        return Err(StorageError::invalid_key(key));
    }
    Ok(())
}

#[async_trait]
impl StorageService for R2Client {
    async fn upload(&self, local: &Path, key: &str) -> StorageResult<String> {
        validate_key(key)?;
        let started = Instant::now();

        self.upload_file(local, key, VIDEO_CONTENT_TYPE).await?;

        info!(
            key,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Annotated video stored"
        );
        Ok(key.to_string())
    }

    async fn generate_signed_url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        validate_key(key)?;
        self.presign_get(key, expires_in).await
    }
}
