//! API configuration.

use std::path::PathBuf;
use std::time::Duration;

use posture_media::temp::DEFAULT_TEMP_DIR_NAME;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Largest accepted upload, in bytes
    pub max_upload_bytes: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Shared secret expected in `X-CF-Access-Token`; `None` disables the gate
    pub access_token: Option<String>,
    /// Directory for uploads and annotated outputs
    pub work_dir: PathBuf,
    pub min_video_duration_sec: f64,
    pub max_video_duration_sec: f64,
    /// Lifetime of the returned signed URL
    pub signed_url_expiry: Duration,
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            max_upload_bytes: 200 * 1024 * 1024, // 200MB
            environment: "development".to_string(),
            access_token: None,
            work_dir: std::env::temp_dir().join(DEFAULT_TEMP_DIR_NAME),
            min_video_duration_sec: 3.0,
            max_video_duration_sec: 420.0,
            signed_url_expiry: Duration::from_secs(3600),
            metrics_enabled: true,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT").unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES").unwrap_or(defaults.max_upload_bytes),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            access_token: std::env::var("CLOUDFLARE_ACCESS_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            work_dir: std::env::var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            min_video_duration_sec: env_parse("MIN_VIDEO_DURATION_SEC")
                .unwrap_or(defaults.min_video_duration_sec),
            max_video_duration_sec: env_parse("MAX_VIDEO_DURATION_SEC")
                .unwrap_or(defaults.max_video_duration_sec),
            signed_url_expiry: env_parse("SIGNED_URL_EXPIRY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.signed_url_expiry),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }

    /// Upload limit in whole megabytes, for error messages.
    pub fn max_upload_mb(&self) -> f64 {
        self.max_upload_bytes as f64 / (1024.0 * 1024.0)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ApiConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.max_upload_bytes, 200 * 1024 * 1024);
        assert_eq!(config.max_upload_mb(), 200.0);
        assert_eq!(config.signed_url_expiry, Duration::from_secs(3600));
        assert!(config.access_token.is_none());
        assert!(config.work_dir.ends_with(DEFAULT_TEMP_DIR_NAME));
        assert!(!config.is_production());
    }

    #[test]
    fn test_env_parse_rejects_garbage() {
        assert_eq!(env_parse::<u16>("POSTURE_TEST_SURELY_UNSET_PORT"), None);
    }
}
