//! imagestore -- image upload service.
//!
//! Image bytes live in S3, their records in DynamoDB.  Both are created on
//! first use.  SIGTERM/SIGINT stop accepting connections and wait up to
//! `server.shutdown_timeout` seconds for in-flight requests.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use imagestore::config::{Config, LoggingConfig};
use imagestore::metadata::store::MetadataStore;
use imagestore::storage::backend::BlobStore;

/// Command-line arguments for the imagestore server.
#[derive(Parser, Debug)]
#[command(name = "imagestore", version, about = "Image upload and search service")]
struct Cli {
    /// Path to the YAML configuration file. Built-in defaults apply when omitted.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_blob_store(config: &Config) -> anyhow::Result<Arc<dyn BlobStore>> {
    match config.storage.backend.as_str() {
        "aws" | "s3" => {
            let store = imagestore::storage::aws::S3BlobStore::new(&config.aws, &config.storage).await;
            Ok(Arc::new(store))
        }
        "memory" => {
            info!("In-memory blob store initialized (nothing is persisted)");
            Ok(Arc::new(imagestore::storage::memory::MemoryBlobStore::new()))
        }
        other => anyhow::bail!("unknown storage.backend '{other}' (expected aws or memory)"),
    }
}

async fn build_metadata_store(config: &Config) -> anyhow::Result<Arc<dyn MetadataStore>> {
    match config.metadata.engine.as_str() {
        "dynamodb" => {
            let store = imagestore::metadata::dynamodb::DynamoDbMetadataStore::new(
                &config.aws,
                &config.metadata,
            )
            .await;
            Ok(Arc::new(store))
        }
        "memory" => {
            info!("In-memory metadata store initialized (nothing is persisted)");
            Ok(Arc::new(
                imagestore::metadata::memory::MemoryMetadataStore::new(),
            ))
        }
        other => anyhow::bail!("unknown metadata.engine '{other}' (expected dynamodb or memory)"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => imagestore::config::load_config(path)?,
        None => Config::default(),
    };
    config.apply_env()?;

    init_tracing(&config.logging);
    match &cli.config {
        Some(path) => info!("Loaded configuration from {}", path),
        None => info!("No configuration file given, using defaults"),
    }

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        imagestore::metrics::init_metrics();
        imagestore::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let blobs = build_blob_store(&config).await?;
    let metadata = build_metadata_store(&config).await?;

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(imagestore::AppState::new(config, metadata, blobs));
    let app = imagestore::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("imagestore listening on {}", bind_addr);

    // Graceful shutdown: stop accepting, drain in-flight requests, and give
    // up once the timeout elapses.
    let (stopping_tx, mut stopping_rx) = tokio::sync::watch::channel(false);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = stopping_tx.send(true);
        })
        .into_future();

    tokio::select! {
        result = server => result?,
        _ = async {
            if stopping_rx.changed().await.is_ok() {
                tokio::time::sleep(shutdown_timeout).await;
            } else {
                std::future::pending::<()>().await;
            }
        } => {
            warn!(
                "In-flight requests still running after {}s, exiting",
                shutdown_timeout.as_secs()
            );
        }
    }

    info!("imagestore shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
