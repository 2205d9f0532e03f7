//! Application state.

use std::sync::Arc;

use posture_media::{
    MoveNetConfig, MoveNetEstimator, PipelineOptions, PoseOverlayPipeline, TempFileManager,
};
use posture_storage::{R2Client, StorageService};
use tracing::info;

use crate::config::ApiConfig;
use crate::middleware::AccessGate;
use crate::use_case::ProcessVideoUseCase;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub temp: Arc<TempFileManager>,
    pub process_video: ProcessVideoUseCase,
    pub access_gate: AccessGate,
}

impl AppState {
    /// Create new application state: loads the model and connects to R2.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let temp = Arc::new(TempFileManager::with_base_dir(config.work_dir.clone())?);
        info!(work_dir = %temp.base_dir().display(), "Work directory ready");

        let estimator = MoveNetEstimator::new(MoveNetConfig::from_env())?;
        let storage = R2Client::from_env().await?;

        let pipeline = PoseOverlayPipeline::with_ffmpeg(Arc::new(estimator), temp.clone());
        Ok(Self::from_parts(config, pipeline, Arc::new(storage)))
    }

    /// Assemble state from already-built collaborators.
    pub fn from_parts(
        config: ApiConfig,
        pipeline: PoseOverlayPipeline,
        storage: Arc<dyn StorageService>,
    ) -> Self {
        let pipeline = pipeline.with_options(
            PipelineOptions::default()
                .with_duration_limits(config.min_video_duration_sec, config.max_video_duration_sec),
        );
        let temp = pipeline.temp_manager().clone();
        let process_video =
            ProcessVideoUseCase::new(Arc::new(pipeline), storage, config.signed_url_expiry);
        let access_gate = AccessGate::new(config.access_token.clone());

        Self {
            config,
            temp,
            process_video,
            access_gate,
        }
    }
}
