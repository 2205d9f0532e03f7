//! API middleware.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Method, Request, Response};
use axum::middleware::Next;
use axum::response::IntoResponse;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn, Span};
use uuid::Uuid;

use crate::error::ApiError;

/// Header carrying the shared access token set by the edge proxy.
pub const ACCESS_TOKEN_HEADER: &str = "X-CF-Access-Token";

type HmacSha256 = Hmac<Sha256>;

/// Shared-secret gate in front of every non-health route.
#[derive(Clone)]
pub struct AccessGate {
    expected: Option<Arc<str>>,
}

impl AccessGate {
    /// A gate expecting `token`; `None` lets every request through.
    pub fn new(token: Option<String>) -> Self {
        if token.is_none() {
            warn!("CLOUDFLARE_ACCESS_TOKEN is not set. Auth is disabled.");
        }
        Self {
            expected: token.map(Arc::from),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.expected.is_some()
    }

    /// Whether `request` may pass.
    pub fn allows(&self, request: &Request<Body>) -> bool {
        let Some(expected) = self.expected.as_deref() else {
            return true;
        };
        if request.method() == Method::OPTIONS || request.uri().path().ends_with("/health") {
            return true;
        }

        let presented = request
            .headers()
            .get(ACCESS_TOKEN_HEADER)
            .map(|v| v.as_bytes())
            .unwrap_or_default();
        tokens_match(presented, expected.as_bytes())
    }
}

/// Constant-time comparison: MAC the presented token under the expected one
/// and verify against the expected token's own MAC.
fn tokens_match(presented: &[u8], expected: &[u8]) -> bool {
    let Ok(mut reference) = HmacSha256::new_from_slice(expected) else {
        return false;
    };
    reference.update(expected);
    let reference = reference.finalize().into_bytes();

    let Ok(mut mac) = HmacSha256::new_from_slice(expected) else {
        return false;
    };
    mac.update(presented);
    mac.verify_slice(&reference).is_ok()
}

/// Access token middleware.
pub async fn access_gate(
    State(gate): State<AccessGate>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if gate.allows(&request) {
        return next.run(request).await;
    }

    warn!(client = %client_addr(&request), "Unauthorized access blocked");
    ApiError::forbidden("Invalid access token").into_response()
}

/// Create CORS layer.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    use axum::http::header;

    let allowed_headers = [
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        header::ACCEPT,
        header::ORIGIN,
        header::HeaderName::from_static("x-cf-access-token"),
    ];

    let exposed_headers = [
        header::CONTENT_LENGTH,
        header::CONTENT_TYPE,
        header::HeaderName::from_static("x-process-time"),
        header::HeaderName::from_static("x-request-id"),
    ];

    let allowed_methods = [Method::GET, Method::POST, Method::OPTIONS];

    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any)
            .allow_origin(Any)
            .max_age(std::time::Duration::from_secs(600))
    } else {
        // tower-http panics if credentials are combined with wildcard headers
        let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_methods(allowed_methods)
            .allow_headers(allowed_headers)
            .expose_headers(exposed_headers)
            .allow_credentials(true)
            .allow_origin(origins)
            .max_age(std::time::Duration::from_secs(600))
    }
}

/// Security headers middleware.
pub async fn security_headers(request: Request<Body>, next: Next) -> Response<Body> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "Cross-Origin-Resource-Policy",
        HeaderValue::from_static("same-origin"),
    );

    response
}

/// Request ID middleware.
pub async fn request_id(mut request: Request<Body>, next: Next) -> Response<Body> {
    let request_id = request
        .headers()
        .get("X-Request-ID")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(request_id.clone());
    Span::current().record("request_id", &request_id);

    let mut response = next.run(request).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-ID", header_value);
    }

    response
}

/// Request logging middleware. Stamps `X-Process-Time` on every response.
pub async fn request_logging(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client = client_addr(&request);
    let start = Instant::now();

    info!(method = %method, path = %path, client = %client, "Request received");

    let mut response = next.run(request).await;

    let status = response.status();
    let duration = start.elapsed().as_secs_f64();

    info!(
        method = %method,
        path = %path,
        status = %status.as_u16(),
        duration_secs = %format!("{:.2}", duration),
        "Request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&format!("{:.3}", duration)) {
        response.headers_mut().insert("X-Process-Time", value);
    }

    response
}

fn client_addr(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
