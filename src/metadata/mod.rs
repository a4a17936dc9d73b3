//! Metadata storage layer.
//!
//! The metadata store keeps one record per uploaded image and answers the
//! owner and title queries.  The [`store::MetadataStore`] trait defines
//! the interface; [`dynamodb::DynamoDbMetadataStore`] is the production
//! implementation and [`memory::MemoryMetadataStore`] backs local runs.

pub mod dynamodb;
pub mod memory;
pub mod store;
