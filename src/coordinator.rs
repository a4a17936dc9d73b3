//! Write coordinator.
//!
//! Every mutation that touches both stores goes through here.  The
//! sequences are strictly ordered and keep no in-flight state:
//!
//! - **create**: validate, `blobs.put`, `metadata.put`.  If the metadata
//!   write fails the fresh blob is deleted once, best effort, and the
//!   metadata failure is returned whatever the delete did.
//! - **delete**: `metadata.get`, `blobs.delete`, `metadata.delete`.  The
//!   record is looked up before anything destructive happens.
//! - **update**: metadata only, after an existence check.
//!
//! Nothing is retried.  A crash between steps can leave a leaked blob or
//! a record whose blob is gone; both are logged at `warn`.

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use tracing::{info, warn};

use crate::errors::ApiError;
use crate::metadata::store::{
    parse_tag_list, ImageRecord, ImageUpdate, MetadataError, MetadataStore,
};
use crate::metrics::{record_operation, BYTES_UPLOADED_TOTAL, COMPENSATIONS_TOTAL};
use crate::storage::backend::{file_extension, BlobError, BlobStore};

/// Accepted image file extensions (matched case-insensitively).
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// Whether `file_name` ends in an accepted image extension.
pub fn is_allowed_file(file_name: &str) -> bool {
    file_extension(file_name).is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

/// An upload as received from the client.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub file_name: String,
    pub data: Bytes,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Comma-separated tags.
    pub tags: Option<String>,
}

#[derive(Clone)]
pub struct WriteCoordinator {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    max_upload_size: u64,
}

impl WriteCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        max_upload_size: u64,
    ) -> Self {
        Self {
            metadata,
            blobs,
            max_upload_size,
        }
    }

    /// Store an image and its record. Returns the persisted record.
    pub async fn create(&self, owner_id: &str, image: NewImage) -> Result<ImageRecord, ApiError> {
        let result = self.create_inner(owner_id, image).await;
        record_operation("create", result.is_ok());
        result
    }

    async fn create_inner(&self, owner_id: &str, image: NewImage) -> Result<ImageRecord, ApiError> {
        if !is_allowed_file(&image.file_name) {
            return Err(ApiError::InvalidParameter(format!(
                "File type not allowed. Allowed types: {}",
                ALLOWED_EXTENSIONS.join(", ")
            )));
        }
        let size = image.data.len() as u64;
        if size > self.max_upload_size {
            return Err(ApiError::PayloadTooLarge {
                max_bytes: self.max_upload_size,
            });
        }

        let blob_key = self
            .blobs
            .put(image.data, &image.file_name)
            .await
            .map_err(|e| ApiError::storage("Failed to upload image to storage", e))?;
        counter!(BYTES_UPLOADED_TOTAL).increment(size);

        let tags = image
            .tags
            .as_deref()
            .map(parse_tag_list)
            .unwrap_or_default();
        let record = ImageRecord::new(owner_id, &blob_key, image.title, image.description, tags);

        if let Err(e) = self.metadata.put(record.clone()).await {
            self.discard_blob(&blob_key).await;
            return Err(ApiError::metadata("Failed to save image metadata", e));
        }

        info!(
            "Stored image {} for {} ({} bytes at {})",
            record.image_id, owner_id, size, blob_key
        );
        Ok(record)
    }

    /// Compensate a failed create. Failures are logged, never returned.
    async fn discard_blob(&self, blob_key: &str) {
        match self.blobs.delete(blob_key).await {
            Ok(()) => {
                counter!(COMPENSATIONS_TOTAL, "status" => "ok").increment(1);
                info!("Rolled back blob {}", blob_key);
            }
            Err(e) => {
                counter!(COMPENSATIONS_TOTAL, "status" => "error").increment(1);
                warn!("Rollback failed, blob {} leaked: {}", blob_key, e);
            }
        }
    }

    async fn lookup(&self, image_id: &str, owner_id: &str) -> Result<ImageRecord, ApiError> {
        self.metadata
            .get(image_id, owner_id)
            .await
            .map_err(|e| ApiError::metadata("Failed to retrieve image metadata", e))?
            .ok_or_else(|| ApiError::NotFound("Image not found".to_string()))
    }

    /// Load a record and its payload.
    pub async fn fetch(
        &self,
        image_id: &str,
        owner_id: &str,
    ) -> Result<(ImageRecord, Bytes), ApiError> {
        let record = self.lookup(image_id, owner_id).await?;
        let data = self
            .blobs
            .get(&record.blob_key)
            .await
            .map_err(|e| ApiError::storage("Failed to retrieve image", e))?;
        match data {
            Some(data) => Ok((record, data)),
            None => {
                warn!(
                    "Record {} points at missing blob {}",
                    record.image_id, record.blob_key
                );
                Err(ApiError::storage(
                    "Failed to retrieve image",
                    BlobError::Unavailable(format!(
                        "blob {} not found",
                        record.blob_key
                    )),
                ))
            }
        }
    }

    /// Remove an image: blob first, then its record.
    pub async fn delete(&self, image_id: &str, owner_id: &str) -> Result<(), ApiError> {
        let result = self.delete_inner(image_id, owner_id).await;
        record_operation("delete", result.is_ok());
        result
    }

    async fn delete_inner(&self, image_id: &str, owner_id: &str) -> Result<(), ApiError> {
        let record = self.lookup(image_id, owner_id).await?;

        self.blobs
            .delete(&record.blob_key)
            .await
            .map_err(|e| ApiError::storage("Failed to delete image from storage", e))?;

        if let Err(e) = self.metadata.delete(image_id, owner_id).await {
            warn!(
                "Blob {} deleted but record {} remains",
                record.blob_key, image_id
            );
            return Err(ApiError::metadata("Failed to delete image metadata", e));
        }

        info!("Deleted image {} for {}", image_id, owner_id);
        Ok(())
    }

    /// Apply a partial update to an existing record.
    pub async fn update(
        &self,
        image_id: &str,
        owner_id: &str,
        update: ImageUpdate,
    ) -> Result<(), ApiError> {
        let result = self.update_inner(image_id, owner_id, update).await;
        record_operation("update", result.is_ok());
        result
    }

    async fn update_inner(
        &self,
        image_id: &str,
        owner_id: &str,
        update: ImageUpdate,
    ) -> Result<(), ApiError> {
        self.lookup(image_id, owner_id).await?;
        self.metadata
            .update(image_id, owner_id, update)
            .await
            .map_err(|e| match e {
                // Deleted between the lookup and the write.
                MetadataError::NotFound => ApiError::NotFound("Image not found".to_string()),
                e => ApiError::metadata("Failed to update metadata", e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::memory::MemoryMetadataStore;
    use crate::metadata::store::MetadataFuture;
    use crate::storage::backend::BlobFuture;
    use crate::storage::memory::MemoryBlobStore;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    const MAX: u64 = 1024;

    /// Blob store that records written and deleted keys and can be told
    /// to fail.
    #[derive(Default)]
    struct ScriptedBlobs {
        inner: MemoryBlobStore,
        fail_put: bool,
        fail_delete: bool,
        written: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
    }

    impl BlobStore for ScriptedBlobs {
        fn put(&self, data: Bytes, name_hint: &str) -> BlobFuture<'_, String> {
            if self.fail_put {
                return Box::pin(async { Err(BlobError::Unavailable("put refused".into())) });
            }
            let put = self.inner.put(data, name_hint);
            Box::pin(async move {
                let key = put.await?;
                self.written.lock().unwrap().push(key.clone());
                Ok(key)
            })
        }

        fn get(&self, key: &str) -> BlobFuture<'_, Option<Bytes>> {
            self.inner.get(key)
        }

        fn delete(&self, key: &str) -> BlobFuture<'_, ()> {
            self.deleted.lock().unwrap().push(key.to_string());
            if self.fail_delete {
                return Box::pin(async { Err(BlobError::Unavailable("delete refused".into())) });
            }
            self.inner.delete(key)
        }

        fn sign_url(
            &self,
            key: &str,
            ttl_secs: u64,
        ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
            self.inner.sign_url(key, ttl_secs)
        }
    }

    /// Metadata store that can refuse writes or deletes.
    #[derive(Default)]
    struct ScriptedMetadata {
        inner: MemoryMetadataStore,
        fail_put: bool,
        fail_delete: bool,
    }

    impl MetadataStore for ScriptedMetadata {
        fn put(&self, record: ImageRecord) -> MetadataFuture<'_, ()> {
            if self.fail_put {
                return Box::pin(async { Err(MetadataError::Unavailable("put refused".into())) });
            }
            self.inner.put(record)
        }

        fn get(&self, image_id: &str, owner_id: &str) -> MetadataFuture<'_, Option<ImageRecord>> {
            self.inner.get(image_id, owner_id)
        }

        fn query_by_owner(
            &self,
            owner_id: &str,
            limit: usize,
        ) -> MetadataFuture<'_, Vec<ImageRecord>> {
            self.inner.query_by_owner(owner_id, limit)
        }

        fn query_by_title(
            &self,
            title: &str,
            limit: usize,
        ) -> MetadataFuture<'_, Vec<ImageRecord>> {
            self.inner.query_by_title(title, limit)
        }

        fn update(
            &self,
            image_id: &str,
            owner_id: &str,
            update: ImageUpdate,
        ) -> MetadataFuture<'_, ()> {
            self.inner.update(image_id, owner_id, update)
        }

        fn delete(&self, image_id: &str, owner_id: &str) -> MetadataFuture<'_, ()> {
            if self.fail_delete {
                return Box::pin(async {
                    Err(MetadataError::Unavailable("delete refused".into()))
                });
            }
            self.inner.delete(image_id, owner_id)
        }
    }

    fn coordinator(
        metadata: ScriptedMetadata,
        blobs: ScriptedBlobs,
    ) -> (Arc<ScriptedMetadata>, Arc<ScriptedBlobs>, WriteCoordinator) {
        let metadata = Arc::new(metadata);
        let blobs = Arc::new(blobs);
        let wc = WriteCoordinator::new(metadata.clone(), blobs.clone(), MAX);
        (metadata, blobs, wc)
    }

    fn upload(name: &str, len: usize) -> NewImage {
        NewImage {
            file_name: name.to_string(),
            data: Bytes::from(vec![7u8; len]),
            title: Some("Cat".to_string()),
            description: None,
            tags: Some("a, b".to_string()),
        }
    }

    #[test]
    fn test_allowed_extensions() {
        assert!(is_allowed_file("a.jpg"));
        assert!(is_allowed_file("a.PNG"));
        assert!(is_allowed_file("x.tar.webp"));
        assert!(!is_allowed_file("a.bmp"));
        assert!(!is_allowed_file("jpg"));
        assert!(!is_allowed_file("a."));
    }

    #[tokio::test]
    async fn test_create_stores_both() {
        let (metadata, blobs, wc) =
            coordinator(ScriptedMetadata::default(), ScriptedBlobs::default());
        let rec = wc.create("u1", upload("cat.png", 4)).await.unwrap();

        assert_eq!(rec.owner_id, "u1");
        assert_eq!(rec.title, "Cat");
        assert_eq!(rec.tags, vec!["a", "b"]);
        assert!(!rec.created_at.is_empty());
        assert_eq!(rec.created_at, rec.updated_at);
        assert!(blobs.inner.contains(&rec.blob_key).await);
        assert_eq!(
            metadata.get(&rec.image_id, "u1").await.unwrap(),
            Some(rec.clone())
        );
    }

    #[tokio::test]
    async fn test_create_rejects_before_writing() {
        let (metadata, blobs, wc) =
            coordinator(ScriptedMetadata::default(), ScriptedBlobs::default());

        let err = wc.create("u1", upload("doc.pdf", 4)).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidParameter(_)));

        let err = wc
            .create("u1", upload("big.jpg", MAX as usize + 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge { max_bytes: MAX }));

        assert!(blobs.inner.is_empty().await);
        assert!(metadata.inner.is_empty());
    }

    #[tokio::test]
    async fn test_create_at_exact_limit_succeeds() {
        let (_, _, wc) = coordinator(ScriptedMetadata::default(), ScriptedBlobs::default());
        assert!(wc.create("u1", upload("a.gif", MAX as usize)).await.is_ok());
    }

    #[tokio::test]
    async fn test_blob_failure_writes_no_metadata() {
        let blobs = ScriptedBlobs {
            fail_put: true,
            ..Default::default()
        };
        let (metadata, blobs, wc) = coordinator(ScriptedMetadata::default(), blobs);
        let err = wc.create("u1", upload("a.jpg", 4)).await.unwrap_err();
        assert!(matches!(err, ApiError::Storage { .. }));
        assert!(metadata.inner.is_empty());
        assert!(blobs.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_failure_compensates_once() {
        let metadata = ScriptedMetadata {
            fail_put: true,
            ..Default::default()
        };
        let (_, blobs, wc) = coordinator(metadata, ScriptedBlobs::default());

        let err = wc.create("u1", upload("a.jpg", 4)).await.unwrap_err();
        assert!(matches!(err, ApiError::Metadata { .. }));
        assert_eq!(err.to_string(), "Failed to save image metadata");

        let written = blobs.written.lock().unwrap().clone();
        assert_eq!(written.len(), 1);
        assert_eq!(*blobs.deleted.lock().unwrap(), written);
        assert!(blobs.inner.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_compensation_still_reports_metadata_error() {
        let metadata = ScriptedMetadata {
            fail_put: true,
            ..Default::default()
        };
        let blobs = ScriptedBlobs {
            fail_delete: true,
            ..Default::default()
        };
        let (_, blobs, wc) = coordinator(metadata, blobs);

        let err = wc.create("u1", upload("a.jpg", 4)).await.unwrap_err();
        assert!(matches!(err, ApiError::Metadata { .. }));
        assert_eq!(*blobs.deleted.lock().unwrap(), *blobs.written.lock().unwrap());
        // Leaked, as accepted.
        assert_eq!(blobs.inner.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_removes_both() {
        let (metadata, blobs, wc) =
            coordinator(ScriptedMetadata::default(), ScriptedBlobs::default());
        let rec = wc.create("u1", upload("a.jpg", 4)).await.unwrap();

        wc.delete(&rec.image_id, "u1").await.unwrap();
        assert!(!blobs.inner.contains(&rec.blob_key).await);
        assert!(metadata.get(&rec.image_id, "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_touches_nothing() {
        let (_, blobs, wc) = coordinator(ScriptedMetadata::default(), ScriptedBlobs::default());
        let err = wc.delete("nope", "u1").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert!(blobs.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_other_owner_is_not_found() {
        let (_, blobs, wc) = coordinator(ScriptedMetadata::default(), ScriptedBlobs::default());
        let rec = wc.create("u1", upload("a.jpg", 4)).await.unwrap();
        let err = wc.delete(&rec.image_id, "u2").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert!(blobs.inner.contains(&rec.blob_key).await);
    }

    #[tokio::test]
    async fn test_blob_delete_failure_keeps_record() {
        let blobs = ScriptedBlobs {
            fail_delete: true,
            ..Default::default()
        };
        let (metadata, _, wc) = coordinator(ScriptedMetadata::default(), blobs);
        let rec = wc.create("u1", upload("a.jpg", 4)).await.unwrap();

        let err = wc.delete(&rec.image_id, "u1").await.unwrap_err();
        assert!(matches!(err, ApiError::Storage { .. }));
        assert!(metadata.get(&rec.image_id, "u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_metadata_delete_failure_surfaces() {
        let metadata = ScriptedMetadata {
            fail_delete: true,
            ..Default::default()
        };
        let (_, blobs, wc) = coordinator(metadata, ScriptedBlobs::default());
        let rec = wc.create("u1", upload("a.jpg", 4)).await.unwrap();

        let err = wc.delete(&rec.image_id, "u1").await.unwrap_err();
        assert!(matches!(err, ApiError::Metadata { .. }));
        assert!(!blobs.inner.contains(&rec.blob_key).await);
    }

    #[tokio::test]
    async fn test_update_masks_and_requires_record() {
        let (metadata, _, wc) =
            coordinator(ScriptedMetadata::default(), ScriptedBlobs::default());
        let rec = wc.create("u1", upload("a.jpg", 4)).await.unwrap();

        wc.update(
            &rec.image_id,
            "u1",
            ImageUpdate {
                title: Some(String::new()),
                description: Some("d".into()),
                tags: Some(vec![]),
            },
        )
        .await
        .unwrap();
        let got = metadata.get(&rec.image_id, "u1").await.unwrap().unwrap();
        assert_eq!(got.title, "Cat");
        assert_eq!(got.description, "d");
        assert_eq!(got.tags, vec!["a", "b"]);

        let err = wc
            .update("missing", "u1", ImageUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_returns_bytes() {
        let (_, _, wc) = coordinator(ScriptedMetadata::default(), ScriptedBlobs::default());
        let rec = wc.create("u1", upload("a.jpg", 4)).await.unwrap();
        let (got, data) = wc.fetch(&rec.image_id, "u1").await.unwrap();
        assert_eq!(got, rec);
        assert_eq!(data.len(), 4);
    }

    #[tokio::test]
    async fn test_fetch_missing_blob_is_storage_error() {
        let (_, blobs, wc) = coordinator(ScriptedMetadata::default(), ScriptedBlobs::default());
        let rec = wc.create("u1", upload("a.jpg", 4)).await.unwrap();
        blobs.inner.delete(&rec.blob_key).await.unwrap();
        let err = wc.fetch(&rec.image_id, "u1").await.unwrap_err();
        assert!(matches!(err, ApiError::Storage { .. }));
    }
}
