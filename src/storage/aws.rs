//! AWS S3 blob store.
//!
//! Image payloads live in a single bucket under
//! `images/{random}/{sanitized-filename}`.  The bucket is created on the
//! first call if it does not already exist; concurrent first calls share
//! one bootstrap attempt and a losing `CreateBucket` race is treated as
//! success.
//!
//! Credentials are resolved via the standard AWS credential chain
//! (env vars, `~/.aws/credentials`, IAM role, etc.) unless the config
//! carries explicit keys.

use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::backend::{content_type_for, new_blob_key, BlobError, BlobFuture, BlobStore};
use crate::config::{AwsConfig, StorageConfig};

/// Blob store backed by an S3 bucket.
pub struct S3BlobStore {
    /// AWS S3 SDK client.
    client: Client,
    /// Bucket holding every image payload.
    bucket: String,
    /// Region used for the bucket's location constraint.
    region: String,
    /// Set once the bucket is known to exist.
    ready: OnceCell<()>,
}

impl S3BlobStore {
    /// Build the S3 client. No network call is made until first use.
    pub async fn new(aws: &AwsConfig, storage: &StorageConfig) -> Self {
        let sdk_config = aws.load_sdk_config().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(storage.use_path_style)
            .build();

        info!(
            "S3 blob store configured: bucket={} region={} path_style={}",
            storage.bucket, aws.region, storage.use_path_style
        );

        Self::from_client(Client::from_conf(s3_config), &storage.bucket, &aws.region)
    }

    /// Wrap an existing client.
    pub fn from_client(client: Client, bucket: &str, region: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            region: region.to_string(),
            ready: OnceCell::new(),
        }
    }

    /// Map an AWS SDK error to a [`BlobError`] with context.
    fn map_sdk_error(context: &str, err: impl std::fmt::Display) -> BlobError {
        BlobError::Unavailable(format!("S3 {context}: {err}"))
    }

    /// Make sure the bucket exists, creating it on first use.
    async fn ensure_bucket(&self) -> Result<(), BlobError> {
        self.ready
            .get_or_try_init(|| self.create_bucket_if_missing())
            .await
            .map(|_| ())
    }

    async fn create_bucket_if_missing(&self) -> Result<(), BlobError> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                info!("Bucket {} already exists", self.bucket);
                return Ok(());
            }
            Err(e) => {
                let service_err = e.into_service_error();
                if !service_err.is_not_found() {
                    return Err(BlobError::Bootstrap(format!(
                        "head_bucket {}: {service_err}",
                        self.bucket
                    )));
                }
            }
        }

        let mut req = self.client.create_bucket().bucket(&self.bucket);
        // us-east-1 rejects an explicit location constraint.
        if self.region != "us-east-1" {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match req.send().await {
            Ok(_) => {
                info!("Created bucket {}", self.bucket);
                Ok(())
            }
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_bucket_already_owned_by_you()
                    || service_err.is_bucket_already_exists()
                {
                    debug!("Bucket {} created concurrently", self.bucket);
                    Ok(())
                } else {
                    Err(BlobError::Bootstrap(format!(
                        "create_bucket {}: {service_err}",
                        self.bucket
                    )))
                }
            }
        }
    }
}

impl BlobStore for S3BlobStore {
    fn put(&self, data: Bytes, name_hint: &str) -> BlobFuture<'_, String> {
        let key = new_blob_key(name_hint);
        Box::pin(async move {
            self.ensure_bucket().await?;

            debug!(
                "S3 put_object: bucket={} key={} size={}",
                self.bucket,
                key,
                data.len()
            );

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .content_type(content_type_for(&key))
                .body(aws_sdk_s3::primitives::ByteStream::from(data))
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("put_object", e.into_service_error()))?;

            Ok(key)
        })
    }

    fn get(&self, key: &str) -> BlobFuture<'_, Option<Bytes>> {
        let key = key.to_string();
        Box::pin(async move {
            self.ensure_bucket().await?;

            debug!("S3 get_object: bucket={} key={}", self.bucket, key);

            let resp = match self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        return Ok(None);
                    }
                    return Err(Self::map_sdk_error("get_object", service_err));
                }
            };

            let body = resp
                .body
                .collect()
                .await
                .map_err(|e| Self::map_sdk_error("get_object body", e))?
                .into_bytes();

            Ok(Some(body))
        })
    }

    fn delete(&self, key: &str) -> BlobFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            self.ensure_bucket().await?;

            debug!("S3 delete_object: bucket={} key={}", self.bucket, key);

            // S3 delete_object is idempotent -- no error for missing keys.
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("delete_object", e.into_service_error()))?;

            Ok(())
        })
    }

    fn sign_url(
        &self,
        key: &str,
        ttl_secs: u64,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let presign_config = match PresigningConfig::expires_in(Duration::from_secs(ttl_secs)) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!("Invalid presign TTL {}s: {}", ttl_secs, e);
                    return None;
                }
            };

            match self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&key)
                .presigned(presign_config)
                .await
            {
                Ok(req) => Some(req.uri().to_string()),
                Err(e) => {
                    warn!("Error generating presigned URL for {}: {}", key, e);
                    None
                }
            }
        })
    }
}

// -- Tests -------------------------------------------------------------------
