//! API error types.
//!
//! Every variant maps to one HTTP status.  The enum implements
//! [`axum::response::IntoResponse`] so handlers can simply return
//! `Err(ApiError::NotFound(..))`; the body is always a single JSON object
//! `{"error": "<message>"}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::metadata::store::MetadataError;
use crate::storage::backend::BlobError;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Failures surfaced to API callers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad or missing query, form, or body input.
    #[error("{0}")]
    InvalidParameter(String),

    /// No record for the given image id and owner.
    #[error("{0}")]
    NotFound(String),

    /// The owner identifier header is missing or empty.
    #[error("X-User-ID header is required")]
    Unauthorized,

    /// The image payload exceeds the configured limit.
    #[error("File too large. Maximum size is {max_bytes} bytes")]
    PayloadTooLarge { max_bytes: u64 },

    /// Blob backend failure.
    #[error("{message}")]
    Storage {
        message: String,
        #[source]
        source: BlobError,
    },

    /// Metadata backend failure.
    #[error("{message}")]
    Metadata {
        message: String,
        #[source]
        source: MetadataError,
    },

    /// Catch-all for unexpected internal errors.
    #[error("We encountered an internal error, please try again.")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Wrap a blob backend failure with a caller-facing message.
    pub fn storage(message: impl Into<String>, source: BlobError) -> Self {
        ApiError::Storage {
            message: message.into(),
            source,
        }
    }

    /// Wrap a metadata backend failure with a caller-facing message.
    pub fn metadata(message: impl Into<String>, source: MetadataError) -> Self {
        ApiError::Metadata {
            message: message.into(),
            source,
        }
    }

    /// Short machine-readable kind, used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidParameter(_) => "invalid_parameter",
            ApiError::NotFound(_) => "not_found",
            ApiError::Unauthorized => "unauthorized",
            ApiError::PayloadTooLarge { .. } => "payload_too_large",
            ApiError::Storage { .. } => "storage",
            ApiError::Metadata { .. } => "metadata",
            ApiError::Internal(_) => "internal",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Metadata { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            match &self {
                ApiError::Storage { source, .. } => {
                    tracing::error!(error = %source, "{}", self)
                }
                ApiError::Metadata { source, .. } => {
                    tracing::error!(error = %source, "{}", self)
                }
                ApiError::Internal(err) => tracing::error!(error = ?err, "internal error"),
                _ => tracing::error!("{}", self),
            }
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
