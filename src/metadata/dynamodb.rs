//! AWS DynamoDB metadata store backend.
//!
//! One item per image, keyed by `image_id` (HASH) and `owner_id` (RANGE).
//! Two global secondary indexes project all attributes:
//! - `owner_id-created_at-index`: HASH=owner_id, RANGE=created_at
//! - `title-created_at-index`:    HASH=title,    RANGE=created_at
//!
//! Both are read with `ScanIndexForward=false` so results come back
//! newest first without a table scan.
//!
//! The table is created on first use if it does not exist.  Concurrent
//! first calls share one bootstrap attempt; a losing `CreateTable` race
//! (`ResourceInUseException`) is treated as success.

use std::collections::HashMap;
use std::time::Duration;

use aws_sdk_dynamodb::client::Waiters;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, GlobalSecondaryIndex, KeySchemaElement,
    KeyType, Projection, ProjectionType, ScalarAttributeType,
};
use aws_sdk_dynamodb::Client;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::store::{
    now_iso8601, ImageRecord, ImageUpdate, MetadataError, MetadataFuture, MetadataStore,
};
use crate::config::{AwsConfig, MetadataConfig};

/// Secondary index ordering an owner's images by creation time.
pub const OWNER_INDEX: &str = "owner_id-created_at-index";

/// Secondary index ordering images with one title by creation time.
pub const TITLE_INDEX: &str = "title-created_at-index";

/// How long to wait for a freshly created table to become active.
const TABLE_ACTIVE_TIMEOUT: Duration = Duration::from_secs(60);

fn map_sdk_error(context: &str, err: impl std::fmt::Display) -> MetadataError {
    MetadataError::Unavailable(format!("DynamoDB {context}: {err}"))
}

fn key_schema(attr: &str, key_type: KeyType) -> Result<KeySchemaElement, MetadataError> {
    KeySchemaElement::builder()
        .attribute_name(attr)
        .key_type(key_type)
        .build()
        .map_err(|e| MetadataError::Bootstrap(e.to_string()))
}

fn string_attribute(attr: &str) -> Result<AttributeDefinition, MetadataError> {
    AttributeDefinition::builder()
        .attribute_name(attr)
        .attribute_type(ScalarAttributeType::S)
        .build()
        .map_err(|e| MetadataError::Bootstrap(e.to_string()))
}

fn time_index(name: &str, hash_attr: &str) -> Result<GlobalSecondaryIndex, MetadataError> {
    GlobalSecondaryIndex::builder()
        .index_name(name)
        .key_schema(key_schema(hash_attr, KeyType::Hash)?)
        .key_schema(key_schema("created_at", KeyType::Range)?)
        .projection(
            Projection::builder()
                .projection_type(ProjectionType::All)
                .build(),
        )
        .build()
        .map_err(|e| MetadataError::Bootstrap(e.to_string()))
}

/// Encode a record as a DynamoDB item.
fn record_to_item(record: ImageRecord) -> HashMap<String, AttributeValue> {
    let mut item = HashMap::new();
    item.insert("image_id".to_string(), AttributeValue::S(record.image_id));
    item.insert("owner_id".to_string(), AttributeValue::S(record.owner_id));
    item.insert("blob_key".to_string(), AttributeValue::S(record.blob_key));
    item.insert("title".to_string(), AttributeValue::S(record.title));
    item.insert(
        "description".to_string(),
        AttributeValue::S(record.description),
    );
    item.insert("tags".to_string(), tags_to_attr(record.tags));
    item.insert("created_at".to_string(), AttributeValue::S(record.created_at));
    item.insert("updated_at".to_string(), AttributeValue::S(record.updated_at));
    item
}

fn tags_to_attr(tags: Vec<String>) -> AttributeValue {
    AttributeValue::L(tags.into_iter().map(AttributeValue::S).collect())
}

/// Decode a DynamoDB item into a record.
///
/// Key attributes are required; `description` and `tags` default to empty
/// so items written by older clients still load.
fn item_to_record(item: &HashMap<String, AttributeValue>) -> Result<ImageRecord, MetadataError> {
    let required = |name: &str| -> Result<String, MetadataError> {
        item.get(name)
            .and_then(|v| v.as_s().ok())
            .cloned()
            .ok_or_else(|| MetadataError::Malformed(format!("missing string attribute `{name}`")))
    };
    let optional = |name: &str| -> String {
        item.get(name)
            .and_then(|v| v.as_s().ok())
            .cloned()
            .unwrap_or_default()
    };

    let tags = match item.get("tags") {
        None => Vec::new(),
        Some(AttributeValue::L(values)) => values
            .iter()
            .filter_map(|v| v.as_s().ok().cloned())
            .collect(),
        // String sets are accepted too; DynamoDB returns them unordered.
        Some(AttributeValue::Ss(values)) => values.clone(),
        Some(other) => {
            return Err(MetadataError::Malformed(format!(
                "unexpected `tags` attribute: {other:?}"
            )))
        }
    };

    Ok(ImageRecord {
        image_id: required("image_id")?,
        owner_id: required("owner_id")?,
        blob_key: required("blob_key")?,
        title: required("title")?,
        description: optional("description"),
        tags,
        created_at: required("created_at")?,
        updated_at: optional("updated_at"),
    })
}

/// Build the `SET` expression for a masked update.
///
/// Returns the expression plus its attribute names and values. Attribute
/// names go through placeholders since `title` and friends may collide
/// with reserved words.
fn build_update_expression(
    update: ImageUpdate,
    updated_at: String,
) -> (
    String,
    HashMap<String, String>,
    HashMap<String, AttributeValue>,
) {
    let update = update.masked();
    let mut clauses = vec!["#updated_at = :updated_at".to_string()];
    let mut names = HashMap::from([("#updated_at".to_string(), "updated_at".to_string())]);
    let mut values = HashMap::from([(":updated_at".to_string(), AttributeValue::S(updated_at))]);

    if let Some(title) = update.title {
        clauses.push("#title = :title".to_string());
        names.insert("#title".to_string(), "title".to_string());
        values.insert(":title".to_string(), AttributeValue::S(title));
    }
    if let Some(description) = update.description {
        clauses.push("#description = :description".to_string());
        names.insert("#description".to_string(), "description".to_string());
        values.insert(":description".to_string(), AttributeValue::S(description));
    }
    if let Some(tags) = update.tags {
        clauses.push("#tags = :tags".to_string());
        names.insert("#tags".to_string(), "tags".to_string());
        values.insert(":tags".to_string(), tags_to_attr(tags));
    }

    (format!("SET {}", clauses.join(", ")), names, values)
}

pub struct DynamoDbMetadataStore {
    client: Client,
    table_name: String,
    /// Set once the table is known to exist and be active.
    ready: OnceCell<()>,
}

impl DynamoDbMetadataStore {
    /// Build the DynamoDB client. No network call is made until first use.
    pub async fn new(aws: &AwsConfig, config: &MetadataConfig) -> Self {
        let sdk_config = aws.load_sdk_config().await;
        info!(
            "DynamoDB metadata store configured: table={} region={}",
            config.table_name, aws.region
        );
        Self::from_client(Client::new(&sdk_config), &config.table_name)
    }

    /// Wrap an existing client.
    pub fn from_client(client: Client, table_name: &str) -> Self {
        Self {
            client,
            table_name: table_name.to_string(),
            ready: OnceCell::new(),
        }
    }

    async fn ensure_table(&self) -> Result<(), MetadataError> {
        self.ready
            .get_or_try_init(|| self.create_table_if_missing())
            .await
            .map(|_| ())
    }

    async fn create_table_if_missing(&self) -> Result<(), MetadataError> {
        match self
            .client
            .describe_table()
            .table_name(&self.table_name)
            .send()
            .await
        {
            Ok(_) => {
                info!("Table {} already exists", self.table_name);
                return Ok(());
            }
            Err(e) => {
                let service_err = e.into_service_error();
                if !service_err.is_resource_not_found_exception() {
                    return Err(MetadataError::Bootstrap(format!(
                        "describe_table {}: {service_err}",
                        self.table_name
                    )));
                }
            }
        }

        let result = self
            .client
            .create_table()
            .table_name(&self.table_name)
            .key_schema(key_schema("image_id", KeyType::Hash)?)
            .key_schema(key_schema("owner_id", KeyType::Range)?)
            .attribute_definitions(string_attribute("image_id")?)
            .attribute_definitions(string_attribute("owner_id")?)
            .attribute_definitions(string_attribute("created_at")?)
            .attribute_definitions(string_attribute("title")?)
            .global_secondary_indexes(time_index(OWNER_INDEX, "owner_id")?)
            .global_secondary_indexes(time_index(TITLE_INDEX, "title")?)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await;

        match result {
            Ok(_) => info!("Creating table {}", self.table_name),
            Err(e) => {
                let service_err = e.into_service_error();
                if !service_err.is_resource_in_use_exception() {
                    return Err(MetadataError::Bootstrap(format!(
                        "create_table {}: {service_err}",
                        self.table_name
                    )));
                }
                debug!("Table {} created concurrently", self.table_name);
            }
        }

        self.client
            .wait_until_table_exists()
            .table_name(&self.table_name)
            .wait(TABLE_ACTIVE_TIMEOUT)
            .await
            .map_err(|e| {
                MetadataError::Bootstrap(format!("waiting for {}: {e}", self.table_name))
            })?;

        info!("Table {} is active", self.table_name);
        Ok(())
    }

    async fn query_index(
        &self,
        index: &str,
        hash_attr: &str,
        hash_value: String,
        limit: usize,
    ) -> Result<Vec<ImageRecord>, MetadataError> {
        self.ensure_table().await?;

        debug!(
            "DynamoDB query: table={} index={} {}={} limit={}",
            self.table_name, index, hash_attr, hash_value, limit
        );

        let result = self
            .client
            .query()
            .table_name(&self.table_name)
            .index_name(index)
            .key_condition_expression("#hash = :hash")
            .expression_attribute_names("#hash", hash_attr)
            .expression_attribute_values(":hash", AttributeValue::S(hash_value))
            .scan_index_forward(false)
            .limit(i32::try_from(limit).unwrap_or(i32::MAX))
            .send()
            .await
            .map_err(|e| map_sdk_error("query", e.into_service_error()))?;

        result.items().iter().map(item_to_record).collect()
    }
}

impl MetadataStore for DynamoDbMetadataStore {
    fn put(&self, record: ImageRecord) -> MetadataFuture<'_, ()> {
        Box::pin(async move {
            self.ensure_table().await?;

            debug!(
                "DynamoDB put_item: table={} image_id={}",
                self.table_name, record.image_id
            );

            self.client
                .put_item()
                .table_name(&self.table_name)
                .set_item(Some(record_to_item(record)))
                .send()
                .await
                .map_err(|e| map_sdk_error("put_item", e.into_service_error()))?;

            Ok(())
        })
    }

    fn get(&self, image_id: &str, owner_id: &str) -> MetadataFuture<'_, Option<ImageRecord>> {
        let image_id = image_id.to_string();
        let owner_id = owner_id.to_string();
        Box::pin(async move {
            self.ensure_table().await?;

            let result = self
                .client
                .get_item()
                .table_name(&self.table_name)
                .key("image_id", AttributeValue::S(image_id))
                .key("owner_id", AttributeValue::S(owner_id))
                .send()
                .await
                .map_err(|e| map_sdk_error("get_item", e.into_service_error()))?;

            result.item().map(item_to_record).transpose()
        })
    }

    fn query_by_owner(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> MetadataFuture<'_, Vec<ImageRecord>> {
        let owner_id = owner_id.to_string();
        Box::pin(async move {
            self.query_index(OWNER_INDEX, "owner_id", owner_id, limit)
                .await
        })
    }

    fn query_by_title(&self, title: &str, limit: usize) -> MetadataFuture<'_, Vec<ImageRecord>> {
        let title = title.to_string();
        Box::pin(async move { self.query_index(TITLE_INDEX, "title", title, limit).await })
    }

    fn update(
        &self,
        image_id: &str,
        owner_id: &str,
        update: ImageUpdate,
    ) -> MetadataFuture<'_, ()> {
        let image_id = image_id.to_string();
        let owner_id = owner_id.to_string();
        Box::pin(async move {
            self.ensure_table().await?;

            let (expression, names, values) = build_update_expression(update, now_iso8601());

            debug!(
                "DynamoDB update_item: table={} image_id={} expr={}",
                self.table_name, image_id, expression
            );

            // The condition stops update_item from resurrecting a deleted record.
            let result = self
                .client
                .update_item()
                .table_name(&self.table_name)
                .key("image_id", AttributeValue::S(image_id))
                .key("owner_id", AttributeValue::S(owner_id))
                .update_expression(expression)
                .condition_expression("attribute_exists(image_id)")
                .set_expression_attribute_names(Some(names))
                .set_expression_attribute_values(Some(values))
                .send()
                .await;

            match result {
                Ok(_) => Ok(()),
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_conditional_check_failed_exception() {
                        Err(MetadataError::NotFound)
                    } else {
                        Err(map_sdk_error("update_item", service_err))
                    }
                }
            }
        })
    }

    fn delete(&self, image_id: &str, owner_id: &str) -> MetadataFuture<'_, ()> {
        let image_id = image_id.to_string();
        let owner_id = owner_id.to_string();
        Box::pin(async move {
            self.ensure_table().await?;

            debug!(
                "DynamoDB delete_item: table={} image_id={}",
                self.table_name, image_id
            );

            // delete_item on a missing key is a no-op, not an error.
            self.client
                .delete_item()
                .table_name(&self.table_name)
                .key("image_id", AttributeValue::S(image_id))
                .key("owner_id", AttributeValue::S(owner_id))
                .send()
                .await
                .map_err(|e| map_sdk_error("delete_item", e.into_service_error()))?;

            Ok(())
        })
    }
}
