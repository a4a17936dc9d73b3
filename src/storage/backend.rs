//! Blob store contract.
//!
//! Every blob backend must implement [`BlobStore`].  Payloads are
//! addressed by an opaque key minted by the store itself on `put`, so
//! callers never choose where bytes land.

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Default lifetime of a presigned GET URL, in seconds.
pub const DEFAULT_URL_TTL_SECS: u64 = 3600;

/// Failures surfaced by a blob backend.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The backing container could not be created or verified.
    #[error("blob container bootstrap failed: {0}")]
    Bootstrap(String),

    /// The backend rejected or could not complete the call.
    #[error("blob backend unavailable: {0}")]
    Unavailable(String),
}

/// Pinned future returned by every [`BlobStore`] method.
pub type BlobFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BlobError>> + Send + 'a>>;

/// Async binary payload store.
pub trait BlobStore: Send + Sync + 'static {
    /// Store `data` under a freshly minted key derived from `name_hint`
    /// and return that key.
    fn put(&self, data: Bytes, name_hint: &str) -> BlobFuture<'_, String>;

    /// Read the payload at `key`. A missing key is `Ok(None)`, never an error.
    fn get(&self, key: &str) -> BlobFuture<'_, Option<Bytes>>;

    /// Delete the payload at `key`. Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> BlobFuture<'_, ()>;

    /// Produce a time-limited GET URL for `key`, or `None` when signing
    /// is not possible.
    fn sign_url(
        &self,
        key: &str,
        ttl_secs: u64,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>>;
}

/// Mint a blob key of the form `images/{random}/{sanitized-name}`.
///
/// The random segment keeps keys unique even when two uploads carry the
/// same filename.
pub fn new_blob_key(name_hint: &str) -> String {
    format!(
        "images/{}/{}",
        uuid::Uuid::new_v4(),
        sanitize_filename(name_hint)
    )
}

/// Reduce a client-supplied filename to a safe single path segment.
///
/// Directory components are dropped, whitespace becomes `_`, and anything
/// outside `[A-Za-z0-9._-]` is removed. Leading and trailing dots and
/// underscores are trimmed so the result can never be `..` or hidden.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name);
    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        if c.is_whitespace() {
            out.push('_');
        } else if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
        }
    }
    let trimmed = out.trim_matches(|c: char| c == '.' || c == '_');
    if trimmed.is_empty() {
        "image".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Lowercased extension of `name`, if it has one.
pub fn file_extension(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// MIME type for an image key, inferred from its extension.
pub fn content_type_for(key: &str) -> &'static str {
    match file_extension(key).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}
