//! Image API handlers.
//!
//! Every handler resolves the caller from `X-User-ID` before touching its
//! body, then delegates to the [`QueryEngine`](crate::query::QueryEngine)
//! for reads or the [`WriteCoordinator`](crate::coordinator::WriteCoordinator)
//! for mutations.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::BytesRejection;
use axum::extract::{Multipart, Path, RawQuery, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coordinator::NewImage;
use crate::errors::ApiError;
use crate::metadata::store::{ImageRecord, ImageUpdate};
use crate::query::{clamp_limit, FilterStrategy, ImageView, SearchParams};
use crate::storage::backend::content_type_for;
use crate::AppState;

/// Header carrying the caller's owner identifier.
pub const OWNER_HEADER: &str = "x-user-id";

/// Extract the caller's owner id. Missing or empty is 401.
pub fn owner_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::Unauthorized)
}

// -- Upload -------------------------------------------------------------------

#[derive(Serialize)]
struct UploadResponse {
    message: &'static str,
    #[serde(flatten)]
    record: ImageRecord,
}

fn multipart_error(err: MultipartError, max_bytes: u64) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge { max_bytes }
    } else {
        ApiError::InvalidParameter(format!("Malformed multipart body: {}", err.body_text()))
    }
}

/// `POST /images` -- Upload an image with optional title, description
/// and comma-separated tags.
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let owner = owner_id(&headers)?;
    let max_bytes = state.config.server.max_upload_size;
    let mut multipart = multipart.map_err(|e| {
        ApiError::InvalidParameter(format!("Expected multipart/form-data: {}", e.body_text()))
    })?;

    let mut file: Option<(String, Bytes)> = None;
    let mut title = None;
    let mut description = None;
    let mut tags = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_bytes))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error(e, max_bytes))?;
                file = Some((file_name, data));
            }
            "title" | "description" | "tags" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| multipart_error(e, max_bytes))?;
                match name.as_str() {
                    "title" => title = Some(value),
                    "description" => description = Some(value),
                    _ => tags = Some(value),
                }
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    let (file_name, data) =
        file.ok_or_else(|| ApiError::InvalidParameter("No file provided".to_string()))?;
    if file_name.is_empty() {
        return Err(ApiError::InvalidParameter("No file selected".to_string()));
    }

    let record = state
        .coordinator
        .create(
            &owner,
            NewImage {
                file_name,
                data,
                title,
                description,
                tags,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: "Image uploaded successfully",
            record,
        }),
    )
        .into_response())
}

// -- List / search ------------------------------------------------------------

/// Body of a list/search response.
#[derive(Serialize)]
pub struct ListResponse {
    pub count: usize,
    pub filter: &'static str,
    pub images: Vec<ImageView>,
}

/// Decode one query-string component (`+` is a space).
fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_encoding::percent_decode_str(&spaced)
        .decode_utf8_lossy()
        .into_owned()
}

/// Parse a raw query string into a map. Later duplicates win.
fn parse_query(raw: Option<&str>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for part in raw.unwrap_or_default().split('&') {
        if part.is_empty() {
            continue;
        }
        let (k, v) = part.split_once('=').unwrap_or((part, ""));
        map.insert(decode_component(k), decode_component(v));
    }
    map
}

/// `GET /images` -- List or search images.
///
/// Query parameters: `filter_by` (`user`, `tags`, `title`), `user_id`,
/// `tags`, `title`, `limit`.
pub async fn list_images(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
) -> Result<Json<ListResponse>, ApiError> {
    let owner = owner_id(&headers)?;
    let mut query = parse_query(raw.as_deref());

    let strategy: FilterStrategy = match query.get("filter_by").map(String::as_str) {
        None => FilterStrategy::Owner,
        Some(s) => s.parse()?,
    };

    let limit = match query.get("limit").map(|v| v.trim()) {
        None | Some("") => None,
        Some(v) => Some(v.parse::<i64>().map_err(|_| {
            ApiError::InvalidParameter(format!("limit must be an integer, got {v:?}"))
        })?),
    };

    let params = SearchParams {
        owner_override: query.remove("user_id"),
        tags: query.remove("tags"),
        title: query.remove("title"),
    };

    let images = state
        .query
        .find(strategy, &owner, &params, clamp_limit(limit))
        .await?;

    Ok(Json(ListResponse {
        count: images.len(),
        filter: strategy.as_str(),
        images,
    }))
}

// -- Get ----------------------------------------------------------------------

/// Build a `content-disposition` value naming the download `title`.
///
/// The plain `filename` is an ASCII fallback; `filename*` carries the
/// exact title in RFC 5987 form.
fn content_disposition(title: &str) -> String {
    let fallback: String = title
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(title, NON_ALPHANUMERIC)
    )
}

/// `GET /images/{image_id}` -- Download the raw image bytes.
pub async fn get_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(image_id): Path<String>,
) -> Result<Response, ApiError> {
    let owner = owner_id(&headers)?;
    let (record, data) = state.coordinator.fetch(&image_id, &owner).await?;

    let disposition = HeaderValue::from_str(&content_disposition(&record.title))
        .map_err(|e| ApiError::Internal(e.into()))?;

    Ok((
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static(content_type_for(&record.blob_key)),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    )
        .into_response())
}

// -- Delete -------------------------------------------------------------------

/// `DELETE /images/{image_id}` -- Delete an image and its metadata.
pub async fn delete_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(image_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let owner = owner_id(&headers)?;
    state.coordinator.delete(&image_id, &owner).await?;
    Ok(Json(
        serde_json::json!({ "message": "Image deleted successfully" }),
    ))
}

// -- Update -------------------------------------------------------------------

/// JSON body accepted by `PUT /images/{image_id}`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateImageRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl From<UpdateImageRequest> for ImageUpdate {
    fn from(req: UpdateImageRequest) -> Self {
        ImageUpdate {
            title: req.title,
            description: req.description,
            tags: req.tags,
        }
    }
}

/// `PUT /images/{image_id}` -- Update title, description or tags.
///
/// Empty strings and empty lists leave the stored value unchanged.
pub async fn update_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(image_id): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let owner = owner_id(&headers)?;
    let body = body.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge {
                max_bytes: state.config.server.max_upload_size,
            }
        } else {
            ApiError::InvalidParameter(format!("Unreadable request body: {}", e.body_text()))
        }
    })?;

    let request: UpdateImageRequest = if body.iter().all(u8::is_ascii_whitespace) {
        UpdateImageRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::InvalidParameter(format!("Invalid JSON body: {e}")))?
    };

    state
        .coordinator
        .update(&image_id, &owner, request.into())
        .await?;
    Ok(Json(
        serde_json::json!({ "message": "Metadata updated successfully" }),
    ))
}
