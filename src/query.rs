//! Metadata query engine.
//!
//! Resolves a list/search request into one of three strategies, runs it
//! against the metadata store, and attaches a presigned URL to every hit.
//!
//! | Strategy | Source                                   | Exhaustive |
//! |----------|------------------------------------------|------------|
//! | owner    | owner index, newest first                | yes        |
//! | title    | title index, exact match, newest first   | yes        |
//! | tags     | caller's newest `2 * limit`, then filter | **no**     |

use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::errors::ApiError;
use crate::metadata::store::{parse_tag_list, ImageRecord, MetadataStore};
use crate::storage::backend::BlobStore;

/// Page size when the caller gives none.
pub const DEFAULT_LIMIT: usize = 10;

/// Largest page any strategy returns.
pub const MAX_LIMIT: usize = 100;

/// Candidate pool multiplier for tag search.
const TAG_POOL_FACTOR: usize = 2;

/// Clamp a caller-supplied limit to `[1, MAX_LIMIT]`.
///
/// Zero and negative values become 1; an absent limit is [`DEFAULT_LIMIT`].
pub fn clamp_limit(requested: Option<i64>) -> usize {
    match requested {
        None => DEFAULT_LIMIT,
        Some(n) if n < 1 => 1,
        Some(n) => usize::try_from(n).map_or(MAX_LIMIT, |n| n.min(MAX_LIMIT)),
    }
}

/// How a list request selects records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStrategy {
    /// Everything one owner uploaded.
    Owner,
    /// The caller's recent images carrying any of the given tags.
    Tags,
    /// Images with exactly the given title, across all owners.
    Title,
}

impl FilterStrategy {
    /// Name echoed back in list responses.
    pub fn as_str(self) -> &'static str {
        match self {
            FilterStrategy::Owner => "user",
            FilterStrategy::Tags => "tags",
            FilterStrategy::Title => "title",
        }
    }
}

impl FromStr for FilterStrategy {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" | "owner" => Ok(FilterStrategy::Owner),
            "tags" => Ok(FilterStrategy::Tags),
            "title" => Ok(FilterStrategy::Title),
            _ => Err(ApiError::InvalidParameter(
                "Invalid filter_by parameter. Valid values: user, tags, title".to_string(),
            )),
        }
    }
}

/// Strategy-specific search inputs.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    /// Owner to list instead of the caller (owner strategy only).
    pub owner_override: Option<String>,
    /// Comma-separated tags (tags strategy).
    pub tags: Option<String>,
    /// Exact title (title strategy).
    pub title: Option<String>,
}

/// A record as returned to list callers.
#[derive(Debug, Clone, Serialize)]
pub struct ImageView {
    #[serde(flatten)]
    pub record: ImageRecord,
    /// Time-limited download URL; omitted when signing failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Read side of the service.
#[derive(Clone)]
pub struct QueryEngine {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    url_ttl_secs: u64,
}

impl QueryEngine {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        url_ttl_secs: u64,
    ) -> Self {
        Self {
            metadata,
            blobs,
            url_ttl_secs,
        }
    }

    /// Run `strategy` on behalf of `caller` and return at most `limit`
    /// enriched records, newest first.
    ///
    /// The tags strategy is approximate: it only considers the caller's
    /// `2 * limit` most recent images, so older matches are never returned.
    pub async fn find(
        &self,
        strategy: FilterStrategy,
        caller: &str,
        params: &SearchParams,
        limit: usize,
    ) -> Result<Vec<ImageView>, ApiError> {
        let limit = limit.clamp(1, MAX_LIMIT);

        let records = match strategy {
            FilterStrategy::Owner => {
                let owner = params
                    .owner_override
                    .as_deref()
                    .filter(|o| !o.is_empty())
                    .unwrap_or(caller);
                self.metadata.query_by_owner(owner, limit).await
            }
            FilterStrategy::Title => {
                let title = params.title.as_deref().unwrap_or_default();
                if title.is_empty() {
                    return Err(ApiError::InvalidParameter(
                        "title parameter required for title filter".to_string(),
                    ));
                }
                self.metadata.query_by_title(title, limit).await
            }
            FilterStrategy::Tags => {
                let wanted = parse_tag_list(params.tags.as_deref().unwrap_or_default());
                if wanted.is_empty() {
                    return Err(ApiError::InvalidParameter(
                        "tags parameter required for tags filter".to_string(),
                    ));
                }
                self.metadata
                    .query_by_owner(caller, limit * TAG_POOL_FACTOR)
                    .await
                    .map(|pool| {
                        let mut hits: Vec<ImageRecord> =
                            pool.into_iter().filter(|r| r.has_any_tag(&wanted)).collect();
                        hits.truncate(limit);
                        hits
                    })
            }
        }
        .map_err(|e| ApiError::metadata("Failed to list images", e))?;

        debug!(
            "query {}: caller={} limit={} hits={}",
            strategy.as_str(),
            caller,
            limit,
            records.len()
        );

        Ok(self.enrich(records).await)
    }

    async fn enrich(&self, records: Vec<ImageRecord>) -> Vec<ImageView> {
        let mut views = Vec::with_capacity(records.len());
        for record in records {
            let url = self
                .blobs
                .sign_url(&record.blob_key, self.url_ttl_secs)
                .await;
            views.push(ImageView { record, url });
        }
        views
    }
}
