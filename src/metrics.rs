//! Prometheus metrics for the image service.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides an axum middleware for HTTP RED
//! metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "imagestore_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "imagestore_http_request_duration_seconds";

/// Image operations by outcome (counter). Labels: operation, status.
pub const IMAGE_OPERATIONS_TOTAL: &str = "imagestore_image_operations_total";

/// Compensating blob deletes issued after a failed metadata write
/// (counter). Labels: status.
pub const COMPENSATIONS_TOTAL: &str = "imagestore_compensations_total";

/// Total image bytes written to the blob store (counter).
pub const BYTES_UPLOADED_TOTAL: &str = "imagestore_bytes_uploaded_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent, so tests may
/// call it repeatedly. Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(IMAGE_OPERATIONS_TOTAL, "Image operations by type and outcome");
    describe_counter!(
        COMPENSATIONS_TOTAL,
        "Blob deletes issued to undo a failed upload"
    );
    describe_counter!(BYTES_UPLOADED_TOTAL, "Total image bytes uploaded");
}

/// Record the outcome of one image operation.
pub fn record_operation(operation: &'static str, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    counter!(IMAGE_OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation to avoid feedback loops.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize an actual request path to a route template for metric labels.
///
/// Image ids are collapsed so labels stay low-cardinality, and the
/// `/api/v1` prefix is dropped.
///
/// Examples:
/// - `/health` -> `/health`
/// - `/api/v1/images` -> `/images`
/// - `/images/3f2a...` -> `/images/{image_id}`
/// - `/anything/else` -> `/other`
fn normalize_path(path: &str) -> String {
    let path = path
        .strip_prefix("/api/v1")
        .filter(|rest| rest.starts_with('/'))
        .unwrap_or(path);
    let trimmed = path.trim_end_matches('/');
    match trimmed {
        "" => "/".to_string(),
        "/health" | "/metrics" | "/images" | "/images/upload" => trimmed.to_string(),
        _ => match trimmed.strip_prefix("/images/") {
            Some(id) if !id.contains('/') => "/images/{image_id}".to_string(),
            _ => "/other".to_string(),
        },
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> impl IntoResponse {
    let body = PROMETHEUS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

// -- Tests --------------------------------------------------------------------
