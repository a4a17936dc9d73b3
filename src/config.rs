//! Configuration loading and types for the image service.
//!
//! Configuration is read from an optional YAML file and deserialized into
//! the [`Config`] struct, then selected fields are overridden from the
//! process environment.  Each subsection governs a different part of the
//! system: networking, AWS connectivity, blob storage, metadata
//! persistence, logging, and observability.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared AWS client settings (region, endpoint, credentials).
    #[serde(default)]
    pub aws: AwsConfig,

    /// Blob storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Metadata store settings.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Maximum image payload size in bytes (default 10 MiB).
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
            max_upload_size: default_max_upload_size(),
        }
    }
}

/// AWS connectivity shared by the S3 and DynamoDB gateways.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    /// AWS region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint (e.g. LocalStack, MinIO).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Explicit access key (falls back to env/credential chain).
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Explicit secret key (falls back to env/credential chain).
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

impl AwsConfig {
    /// Resolve an SDK configuration from these settings.
    ///
    /// Static credentials are injected only when both halves are present;
    /// otherwise the default provider chain applies.
    pub async fn load_sdk_config(&self) -> aws_config::SdkConfig {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(self.region.clone()));

        if let Some(endpoint) = &self.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        if let (Some(ak), Some(sk)) = (&self.access_key_id, &self.secret_access_key) {
            let creds = aws_credential_types::Credentials::new(
                ak,
                sk,
                None, // session_token
                None, // expiry
                "imagestore-config",
            );
            loader = loader.credentials_provider(creds);
        }

        loader.load().await
    }
}

/// Blob storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `aws` or `memory`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Bucket holding image payloads.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Force path-style URL addressing (needed by most S3 emulators).
    #[serde(default)]
    pub use_path_style: bool,

    /// Lifetime of presigned image URLs in seconds.
    #[serde(default = "default_url_ttl")]
    pub url_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            bucket: default_bucket(),
            use_path_style: false,
            url_ttl_secs: default_url_ttl(),
        }
    }
}

/// Metadata store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Backend type: `dynamodb` or `memory`.
    #[serde(default = "default_metadata_engine")]
    pub engine: String,

    /// DynamoDB table holding image records.
    #[serde(default = "default_table")]
    pub table_name: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            engine: default_metadata_engine(),
            table_name: default_table(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_upload_size() -> u64 {
    10 * 1024 * 1024
}

fn default_region() -> String {
    "ap-south-1".to_string()
}

fn default_storage_backend() -> String {
    "aws".to_string()
}

fn default_bucket() -> String {
    "image-uploads".to_string()
}

fn default_url_ttl() -> u64 {
    crate::storage::backend::DEFAULT_URL_TTL_SECS
}

fn default_metadata_engine() -> String {
    "dynamodb".to_string()
}

fn default_table() -> String {
    "images-metadata".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

impl Config {
    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// Empty values are ignored so that `VAR=` does not blank a setting.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(region) = get("AWS_REGION") {
            self.aws.region = region;
        }
        if let Some(endpoint) = get("AWS_ENDPOINT_URL").or_else(|| get("LOCALSTACK_ENDPOINT")) {
            self.aws.endpoint_url = Some(endpoint);
        }
        if let Some(ak) = get("AWS_ACCESS_KEY_ID") {
            self.aws.access_key_id = Some(ak);
        }
        if let Some(sk) = get("AWS_SECRET_ACCESS_KEY") {
            self.aws.secret_access_key = Some(sk);
        }
        if let Some(bucket) = get("S3_BUCKET_NAME") {
            self.storage.bucket = bucket;
        }
        if let Some(table) = get("DYNAMODB_TABLE_NAME") {
            self.metadata.table_name = table;
        }
        if let Some(port) = get("IMAGESTORE_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("parsing IMAGESTORE_PORT value `{port}`: {e}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 5000);
        assert_eq!(cfg.server.max_upload_size, 10 * 1024 * 1024);
        assert_eq!(cfg.storage.bucket, "image-uploads");
        assert_eq!(cfg.storage.url_ttl_secs, 3600);
        assert_eq!(cfg.metadata.table_name, "images-metadata");
        assert_eq!(cfg.aws.region, "ap-south-1");
        assert!(cfg.observability.metrics);
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
server:
  port: 8080
storage:
  backend: memory
metadata:
  engine: memory
  table_name: photos
aws:
  endpoint_url: http://localhost:4566
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.storage.backend, "memory");
        assert_eq!(cfg.storage.bucket, "image-uploads");
        assert_eq!(cfg.metadata.table_name, "photos");
        assert_eq!(
            cfg.aws.endpoint_url.as_deref(),
            Some("http://localhost:4566")
        );
        assert_eq!(cfg.logging.format, "text");
    }

    #[test]
    fn test_example_file_parses() {
        let cfg: Config = serde_yaml::from_str(include_str!("../imagestore.example.yaml")).unwrap();
        assert_eq!(cfg.server.max_upload_size, 10 * 1024 * 1024);
        assert_eq!(cfg.metadata.engine, "dynamodb");
        assert_eq!(cfg.aws.endpoint_url, None);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("AWS_REGION", "us-east-1"),
            ("S3_BUCKET_NAME", "test-bucket"),
            ("DYNAMODB_TABLE_NAME", "test-images-metadata"),
            ("LOCALSTACK_ENDPOINT", "http://localstack:4566"),
            ("IMAGESTORE_PORT", "9000"),
            ("AWS_ACCESS_KEY_ID", ""),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(cfg.aws.region, "us-east-1");
        assert_eq!(cfg.storage.bucket, "test-bucket");
        assert_eq!(cfg.metadata.table_name, "test-images-metadata");
        assert_eq!(
            cfg.aws.endpoint_url.as_deref(),
            Some("http://localstack:4566")
        );
        assert_eq!(cfg.server.port, 9000);
        assert!(cfg.aws.access_key_id.is_none());
    }

    #[test]
    fn test_env_bad_port() {
        let mut cfg = Config::default();
        let result = cfg.apply_overrides(|name| {
            (name == "IMAGESTORE_PORT").then(|| "not-a-port".to_string())
        });
        assert!(result.is_err());
    }
}
