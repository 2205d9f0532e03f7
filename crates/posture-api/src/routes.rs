//! API routes.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::handlers::{health, process_video};
use crate::metrics::metrics_middleware;
use crate::middleware::{access_gate, cors_layer, request_id, request_logging, security_headers};
use crate::state::AppState;

/// Room for multipart boundaries and form fields on top of the file itself.
/// Oversized bodies surface as a multipart error, answered with
/// `FILE_TOO_LARGE` by the handler.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    let api_routes = Router::new()
        .route("/health", get(health))
        .route(
            "/process",
            post(process_video).layer(DefaultBodyLimit::max(body_limit)),
        );

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health))
        .merge(metrics_routes)
        .layer(middleware::from_fn_with_state(
            state.access_gate.clone(),
            access_gate,
        ))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
