//! In-memory blob store.
//!
//! Payloads are held in a `tokio::sync::RwLock<HashMap<...>>`.  Nothing
//! is persisted.  Used for local runs without AWS and by the test suite.

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use super::backend::{new_blob_key, BlobFuture, BlobStore};

/// In-memory blob store.
#[derive(Default)]
pub struct MemoryBlobStore {
    /// storage key -> payload.
    objects: tokio::sync::RwLock<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads currently held.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store holds no payloads.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Whether a payload exists at `key`.
    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, data: Bytes, name_hint: &str) -> BlobFuture<'_, String> {
        let key = new_blob_key(name_hint);
        Box::pin(async move {
            self.objects.write().await.insert(key.clone(), data);
            Ok(key)
        })
    }

    fn get(&self, key: &str) -> BlobFuture<'_, Option<Bytes>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.objects.read().await.get(&key).cloned()) })
    }

    fn delete(&self, key: &str) -> BlobFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            self.objects.write().await.remove(&key);
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
            if !self.objects.read().await.contains_key(&key) {
                return None;
            }
            Some(format!("memory:///{key}?expires_in={ttl_secs}"))
        })
    }
}
