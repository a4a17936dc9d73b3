//! Metadata store contract and the image record schema.
//!
//! Any metadata backend must implement [`MetadataStore`].  The trait uses
//! manually desugared async methods (pinned boxed futures) so it can be
//! held as `Arc<dyn MetadataStore>`.
//!
//! Records are keyed by `(image_id, owner_id)`.  Two secondary orderings
//! are required of every backend: by owner then `created_at` descending,
//! and by exact title then `created_at` descending.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Title given to images uploaded without one.
pub const DEFAULT_TITLE: &str = "Untitled";

// ── Errors ─────────────────────────────────────────────────────────

/// Failures surfaced by a metadata backend.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// No record exists for the given `(image_id, owner_id)`.
    #[error("image record not found")]
    NotFound,

    /// The table or its indexes could not be created or verified.
    #[error("metadata table bootstrap failed: {0}")]
    Bootstrap(String),

    /// A stored item could not be decoded into an [`ImageRecord`].
    #[error("malformed image record: {0}")]
    Malformed(String),

    /// The backend rejected or could not complete the call.
    #[error("metadata backend unavailable: {0}")]
    Unavailable(String),
}

// ── Record types ───────────────────────────────────────────────────

/// Persisted metadata for one uploaded image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Unique image identifier (UUID v4).
    pub image_id: String,
    /// Identifier of the owning user.
    pub owner_id: String,
    /// Key of the payload in the blob store.
    pub blob_key: String,
    /// Free-text title.
    pub title: String,
    /// Free-text description.
    pub description: String,
    /// Ordered tags; duplicates are allowed.
    pub tags: Vec<String>,
    /// ISO-8601 UTC creation timestamp. Never changes.
    pub created_at: String,
    /// ISO-8601 UTC timestamp of the last successful update.
    pub updated_at: String,
}

impl ImageRecord {
    /// Build a fresh record with a new id and both timestamps set to now.
    ///
    /// A missing or blank title becomes [`DEFAULT_TITLE`].
    pub fn new(
        owner_id: &str,
        blob_key: &str,
        title: Option<String>,
        description: Option<String>,
        tags: Vec<String>,
    ) -> Self {
        let now = now_iso8601();
        let title = title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());
        Self {
            image_id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            blob_key: blob_key.to_string(),
            title,
            description: description.unwrap_or_default(),
            tags,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Whether any of this record's tags appears in `wanted`.
    pub fn has_any_tag(&self, wanted: &[String]) -> bool {
        self.tags.iter().any(|t| wanted.contains(t))
    }
}

/// Partial update of an image record's user-editable fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl ImageUpdate {
    /// Drop fields that carry an empty value.
    ///
    /// An empty string or empty list is indistinguishable from an absent
    /// field: neither clears the stored value.
    pub fn masked(self) -> Self {
        Self {
            title: self.title.filter(|t| !t.is_empty()),
            description: self.description.filter(|d| !d.is_empty()),
            tags: self.tags.filter(|t| !t.is_empty()),
        }
    }

    /// Apply the masked update to `record`, advancing `updated_at`.
    pub fn apply_to(&self, record: &mut ImageRecord, updated_at: String) {
        let update = self.clone().masked();
        if let Some(title) = update.title {
            record.title = title;
        }
        if let Some(description) = update.description {
            record.description = description;
        }
        if let Some(tags) = update.tags {
            record.tags = tags;
        }
        record.updated_at = updated_at;
    }
}

/// Current time as an ISO-8601 UTC string with microsecond precision.
///
/// The fixed width keeps lexicographic order equal to time order, which
/// the `created_at` range keys rely on.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Split a comma-separated tag list, trimming and dropping blanks.
pub fn parse_tag_list(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Trait ───────────────────────────────────────────────────────────

/// Pinned future returned by every [`MetadataStore`] method.
pub type MetadataFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, MetadataError>> + Send + 'a>>;

/// Async metadata store contract.
pub trait MetadataStore: Send + Sync + 'static {
    /// Insert or replace a record (unconditional upsert).
    ///
    /// Records arrive stamped: [`ImageRecord::new`] sets `created_at` and
    /// `updated_at` to the same instant, and `put` persists both unchanged.
    fn put(&self, record: ImageRecord) -> MetadataFuture<'_, ()>;

    /// Fetch a record by its full key.
    fn get(&self, image_id: &str, owner_id: &str) -> MetadataFuture<'_, Option<ImageRecord>>;

    /// Records owned by `owner_id`, newest first, at most `limit`.
    fn query_by_owner(&self, owner_id: &str, limit: usize)
        -> MetadataFuture<'_, Vec<ImageRecord>>;

    /// Records whose title equals `title`, newest first, at most `limit`.
    fn query_by_title(&self, title: &str, limit: usize) -> MetadataFuture<'_, Vec<ImageRecord>>;

    /// Apply `update` (after [`ImageUpdate::masked`]) and advance
    /// `updated_at`. Fails with [`MetadataError::NotFound`] if the record
    /// does not exist.
    fn update(
        &self,
        image_id: &str,
        owner_id: &str,
        update: ImageUpdate,
    ) -> MetadataFuture<'_, ()>;

    /// Delete a record. Deleting a missing record succeeds.
    fn delete(&self, image_id: &str, owner_id: &str) -> MetadataFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ImageRecord {
        ImageRecord {
            image_id: "img-1".to_string(),
            owner_id: "user-1".to_string(),
            blob_key: "images/k/a.png".to_string(),
            title: "Sunset".to_string(),
            description: "Over the bay".to_string(),
            tags: vec!["nature".to_string(), "sky".to_string()],
            created_at: "2024-01-01T00:00:00.000000Z".to_string(),
            updated_at: "2024-01-01T00:00:00.000000Z".to_string(),
        }
    }

    #[test]
    fn test_new_record_defaults() {
        let rec = ImageRecord::new("u", "images/k/a.png", None, None, vec![]);
        assert_eq!(rec.title, DEFAULT_TITLE);
        assert_eq!(rec.description, "");
        assert_eq!(rec.created_at, rec.updated_at);
        assert!(uuid::Uuid::parse_str(&rec.image_id).is_ok());
    }

    #[test]
    fn test_new_record_blank_title_defaults() {
        let rec = ImageRecord::new("u", "k", Some("   ".to_string()), None, vec![]);
        assert_eq!(rec.title, DEFAULT_TITLE);
    }

    #[test]
    fn test_new_record_ids_unique() {
        let a = ImageRecord::new("u", "k", None, None, vec![]);
        let b = ImageRecord::new("u", "k", None, None, vec![]);
        assert_ne!(a.image_id, b.image_id);
    }

    #[test]
    fn test_serialized_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        let obj = json.as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "blob_key",
                "created_at",
                "description",
                "image_id",
                "owner_id",
                "tags",
                "title",
                "updated_at"
            ]
        );
    }

    #[test]
    fn test_masked_drops_empty_values() {
        let update = ImageUpdate {
            title: Some(String::new()),
            description: Some(String::new()),
            tags: Some(vec![]),
        }
        .masked();
        assert_eq!(update, ImageUpdate::default());
    }

    #[test]
    fn test_apply_empty_title_keeps_existing() {
        let mut rec = sample();
        let update = ImageUpdate {
            title: Some(String::new()),
            tags: Some(vec![]),
            ..Default::default()
        };
        update.apply_to(&mut rec, "2024-02-01T00:00:00.000000Z".to_string());
        assert_eq!(rec.title, "Sunset");
        assert_eq!(rec.tags, vec!["nature", "sky"]);
        assert_eq!(rec.updated_at, "2024-02-01T00:00:00.000000Z");
        assert_eq!(rec.created_at, "2024-01-01T00:00:00.000000Z");
    }

    #[test]
    fn test_apply_sets_provided_fields() {
        let mut rec = sample();
        let update = ImageUpdate {
            title: Some("X".to_string()),
            description: None,
            tags: Some(vec!["a".to_string()]),
        };
        update.apply_to(&mut rec, "2024-02-01T00:00:00.000000Z".to_string());
        assert_eq!(rec.title, "X");
        assert_eq!(rec.description, "Over the bay");
        assert_eq!(rec.tags, vec!["a"]);
    }

    #[test]
    fn test_parse_tag_list() {
        assert_eq!(parse_tag_list("a,b"), vec!["a", "b"]);
        assert_eq!(parse_tag_list(" a , ,b ,"), vec!["a", "b"]);
        assert!(parse_tag_list(" , ,").is_empty());
        assert!(parse_tag_list("").is_empty());
    }

    #[test]
    fn test_has_any_tag() {
        let rec = sample();
        assert!(rec.has_any_tag(&["sky".to_string(), "x".to_string()]));
        assert!(!rec.has_any_tag(&["city".to_string()]));
    }

    #[test]
    fn test_now_is_fixed_width_utc() {
        let now = now_iso8601();
        assert_eq!(now.len(), "2024-01-01T00:00:00.000000Z".len());
        assert!(now.ends_with('Z'));
    }
}
