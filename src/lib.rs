//! pkgmirror - a caching reverse proxy for package-distribution metadata.
//!
//! Clients request package metadata through the proxy; the proxy forwards
//! the request to the upstream metadata service, makes sure the referenced
//! binary artifact is available from an operator-controlled cache (local
//! filesystem or S3-compatible object storage), and rewrites the metadata
//! response to point at the cached copy.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        pkgmirror                         │
//! ├──────────────────────────────────────────────────────────┤
//! │  Request handler: JSON / plain-text rendering, /health   │
//! ├──────────────────────────────────────────────────────────┤
//! │  Metadata forwarder: upstream fetch + decode + validate  │
//! ├──────────────────────────────────────────────────────────┤
//! │  Pipeline: per-key lock | download | verify | store      │
//! ├──────────────────────────────────────────────────────────┤
//! │  Cache backend: local filesystem | object storage        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use pkgmirror::config::ProxyConfig;
//!
//! #[tokio::main]
//! async fn main() -> pkgmirror::error::Result<()> {
//!     let config = ProxyConfig::development();
//!     pkgmirror::run(config).await
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod lock;
pub mod metadata;
pub mod pipeline;
pub mod server;
pub mod storage;

use crate::config::{CacheBackendKind, ProxyConfig};
use crate::error::{ProxyError, Result};
use crate::metadata::MetadataForwarder;
use crate::pipeline::ArtifactPipeline;
use crate::server::AppState;
use crate::storage::local::LocalStore;
use crate::storage::object::ObjectStore;
use crate::storage::CacheStorage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Build the outbound HTTP client shared by the forwarder and the pipeline.
pub fn outbound_client(config: &ProxyConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(config.upstream.connect_timeout)
        .timeout(config.upstream.request_timeout)
        .danger_accept_invalid_certs(config.upstream.insecure_tls)
        .build()
        .map_err(|e| ProxyError::Config(format!("failed to build http client: {e}")))
}

/// Run the proxy until interrupted.
pub async fn run(config: ProxyConfig) -> Result<()> {
    config.validate()?;

    if config.upstream.insecure_tls {
        warn!("TLS certificate verification disabled for outbound requests");
    }
    let client = outbound_client(&config)?;

    let (storage, static_root): (Arc<dyn CacheStorage>, Option<PathBuf>) =
        match config.cache.backend {
            CacheBackendKind::Local => {
                let store = LocalStore::new(
                    config.cache.cache_dir.clone(),
                    config.cache.public_url.clone(),
                );
                (Arc::new(store), Some(config.cache.cache_dir.clone()))
            }
            CacheBackendKind::S3 => {
                let bucket = config.cache.s3_bucket.clone().ok_or_else(|| {
                    ProxyError::InvalidConfig {
                        field: "cache.s3_bucket".to_string(),
                        reason: "bucket name required for the s3 cache backend".to_string(),
                    }
                })?;
                let store = ObjectStore::connect(bucket, config.cache.s3_region.clone()).await?;
                (Arc::new(store), None)
            }
        };
    info!(backend = %config.cache.backend, "Using cache backend");

    let forwarder = Arc::new(MetadataForwarder::new(
        client.clone(),
        config.upstream.base_url.clone(),
    ));
    let pipeline = Arc::new(ArtifactPipeline::new(storage, client));
    let app = server::router(
        AppState {
            forwarder,
            pipeline,
        },
        static_root,
    );

    let listener = tokio::net::TcpListener::bind(config.server.listen).await?;
    info!(addr = %config.server.listen, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install shutdown handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
