//! In-memory metadata store.
//!
//! Stores all records in memory with no persistence. Useful for testing
//! and ephemeral deployments. Uses `RwLock<HashMap>` for thread-safe access.
//!
//! The two secondary orderings are computed on read by filtering and
//! sorting; ties on `created_at` are broken by `image_id` so results are
//! deterministic.

use std::collections::HashMap;
use std::sync::RwLock;

use super::store::{
    now_iso8601, ImageRecord, ImageUpdate, MetadataError, MetadataFuture, MetadataStore,
};

type RecordKey = (String, String);

#[derive(Default)]
pub struct MemoryMetadataStore {
    records: RwLock<HashMap<RecordKey, ImageRecord>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records held.
    pub fn len(&self) -> usize {
        self.records.read().expect("rwlock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn newest_first<F>(&self, limit: usize, matches: F) -> Vec<ImageRecord>
    where
        F: Fn(&ImageRecord) -> bool,
    {
        let records = self.records.read().expect("rwlock poisoned");
        let mut hits: Vec<ImageRecord> = records.values().filter(|r| matches(*r)).cloned().collect();
        hits.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.image_id.cmp(&a.image_id))
        });
        hits.truncate(limit);
        hits
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn put(&self, record: ImageRecord) -> MetadataFuture<'_, ()> {
        Box::pin(async move {
            let mut records = self.records.write().expect("rwlock poisoned");
            let key = (record.image_id.clone(), record.owner_id.clone());
            records.insert(key, record);
            Ok(())
        })
    }

    fn get(&self, image_id: &str, owner_id: &str) -> MetadataFuture<'_, Option<ImageRecord>> {
        let key = (image_id.to_string(), owner_id.to_string());
        Box::pin(async move {
            let records = self.records.read().expect("rwlock poisoned");
            Ok(records.get(&key).cloned())
        })
    }

    fn query_by_owner(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> MetadataFuture<'_, Vec<ImageRecord>> {
        let owner_id = owner_id.to_string();
        Box::pin(async move { Ok(self.newest_first(limit, |r| r.owner_id == owner_id)) })
    }

    fn query_by_title(&self, title: &str, limit: usize) -> MetadataFuture<'_, Vec<ImageRecord>> {
        let title = title.to_string();
        Box::pin(async move { Ok(self.newest_first(limit, |r| r.title == title)) })
    }

    fn update(
        &self,
        image_id: &str,
        owner_id: &str,
        update: ImageUpdate,
    ) -> MetadataFuture<'_, ()> {
        let key = (image_id.to_string(), owner_id.to_string());
        Box::pin(async move {
            let mut records = self.records.write().expect("rwlock poisoned");
            let record = records.get_mut(&key).ok_or(MetadataError::NotFound)?;
            update.apply_to(record, now_iso8601());
            Ok(())
        })
    }

    fn delete(&self, image_id: &str, owner_id: &str) -> MetadataFuture<'_, ()> {
        let key = (image_id.to_string(), owner_id.to_string());
        Box::pin(async move {
            let mut records = self.records.write().expect("rwlock poisoned");
            records.remove(&key);
            Ok(())
        })
    }
}
