//! Upload-to-signed-URL processing flow.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use posture_media::PoseOverlayPipeline;
use posture_models::VideoMeta;
use posture_storage::StorageService;
use tracing::{debug, info};

use crate::error::ApiResult;
use crate::metrics;

/// Input of one processing run.
#[derive(Debug, Clone)]
pub struct ProcessVideoInput {
    /// Local path of the uploaded video
    pub input_path: PathBuf,
    /// Object key the annotated video is stored under
    pub output_key: String,
    pub score_threshold: f64,
}

/// Outcome of a processing run.
#[derive(Debug, Clone)]
pub struct ProcessVideoResult {
    pub signed_url: String,
    pub video_meta: VideoMeta,
    pub total_poses: u64,
    pub processing_time_sec: f64,
}

/// Runs the overlay pipeline, stores the result and signs a URL for it.
#[derive(Clone)]
pub struct ProcessVideoUseCase {
    pipeline: Arc<PoseOverlayPipeline>,
    storage: Arc<dyn StorageService>,
    signed_url_expiry: Duration,
}

impl ProcessVideoUseCase {
    pub fn new(
        pipeline: Arc<PoseOverlayPipeline>,
        storage: Arc<dyn StorageService>,
        signed_url_expiry: Duration,
    ) -> Self {
        Self {
            pipeline,
            storage,
            signed_url_expiry,
        }
    }

    pub async fn execute(&self, input: ProcessVideoInput) -> ApiResult<ProcessVideoResult> {
        let started = Instant::now();

        let output = self
            .pipeline
            .execute(&input.input_path, input.score_threshold)
            .await?;

        let temp = self.pipeline.temp_manager().clone();
        let output_path = scopeguard::guard(output.output_path, move |path| {
            if temp.cleanup(&path) {
                debug!(path = %path.display(), "Removed annotated output");
            }
        });

        let upload_started = Instant::now();
        self.storage.upload(&output_path, &input.output_key).await?;
        metrics::record_upload_duration(upload_started.elapsed().as_secs_f64());

        let signed_url = self
            .storage
            .generate_signed_url(&input.output_key, self.signed_url_expiry)
            .await?;

        let processing_time_sec = started.elapsed().as_secs_f64();
        info!(
            key = %input.output_key,
            total_poses = output.total_poses,
            processing_time_sec,
            "Video processed"
        );

        Ok(ProcessVideoResult {
            signed_url,
            video_meta: output.meta,
            total_poses: output.total_poses,
            processing_time_sec,
        })
    }
}
