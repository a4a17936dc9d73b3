//! imagestore library: image upload service over a blob store and a
//! metadata store.
//!
//! This crate provides the gateways to both stores, the query engine that
//! serves list and search requests, the write coordinator that keeps the
//! two stores consistent, and the HTTP layer on top.

use std::sync::Arc;

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod handlers;
pub mod metadata;
pub mod metrics;
pub mod query;
pub mod server;
pub mod storage;

use crate::config::Config;
use crate::coordinator::WriteCoordinator;
use crate::metadata::store::MetadataStore;
use crate::query::QueryEngine;
use crate::storage::backend::BlobStore;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Read side: list and search.
    pub query: QueryEngine,
    /// Write side: create, update, delete, fetch.
    pub coordinator: WriteCoordinator,
}

impl AppState {
    /// Wire both gateways into the query engine and write coordinator.
    pub fn new(
        config: Config,
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let query = QueryEngine::new(
            metadata.clone(),
            blobs.clone(),
            config.storage.url_ttl_secs,
        );
        let coordinator = WriteCoordinator::new(metadata, blobs, config.server.max_upload_size);
        Self {
            config,
            query,
            coordinator,
        }
    }
}
