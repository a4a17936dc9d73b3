//! Axum router construction.
//!
//! The [`app`] function wires every image endpoint to its handler and
//! returns a ready-to-serve [`axum::Router`].  The image routes are served
//! both at the root and under `/api/v1`, where uploads also answer at
//! `POST /api/v1/images/upload`.

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::errors::generate_request_id;
use crate::handlers::image::{delete_image, get_image, list_images, update_image, upload_image};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Room left in the request body cap for multipart boundaries and the
/// text fields sent alongside the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

fn image_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/images", get(list_images).post(upload_image))
        .route(
            "/images/:image_id",
            get(get_image).put(update_image).delete(delete_image),
        )
}

/// Build the axum [`Router`] with all routes.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let metrics_enabled = state.config.observability.metrics;
    let body_limit = usize::try_from(state.config.server.max_upload_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let mut router = Router::new()
        .route("/health", get(health_check))
        .merge(image_routes())
        .nest(
            "/api/v1",
            image_routes().route("/images/upload", post(upload_image)),
        );
    if metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    let router = router
        .method_not_allowed_fallback(method_not_allowed)
        .fallback(not_found)
        .with_state(state)
        // Layer ordering: inner layers run first, outer layers wrap them.
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(common_headers_middleware));

    if metrics_enabled {
        // Outermost so it captures the full request lifecycle.
        router.layer(middleware::from_fn(metrics_middleware))
    } else {
        router
    }
}

// -- Common headers middleware -----------------------------------------------

/// Middleware that adds common response headers to every response:
/// - `x-request-id`: 16-character uppercase hex string
/// - `date`: RFC 7231 formatted timestamp
/// - `server`: `imagestore`
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key("x-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-request-id", value);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert("date", value);
    }
    headers.insert("server", HeaderValue::from_static("imagestore"));

    response
}

// -- Health check ------------------------------------------------------------

/// `GET /health` -- Returns `{"status": "healthy"}` with 200 OK.
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "healthy" })),
    )
}

async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(serde_json::json!({ "error": "Method not allowed" })),
    )
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Endpoint not found" })),
    )
}
