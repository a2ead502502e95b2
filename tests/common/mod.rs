//! Common utilities for integration tests.
#![allow(dead_code)]

use axum::Router;
use pkgmirror::metadata::MetadataForwarder;
use pkgmirror::pipeline::ArtifactPipeline;
use pkgmirror::server::{self, AppState};
use pkgmirror::storage::local::LocalStore;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Serve `router` on an ephemeral loopback port; returns its base URL.
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Upstream metadata stub answering every path with the given JSON body.
pub async fn spawn_upstream(metadata: serde_json::Value) -> String {
    let router = Router::new().fallback(move || {
        let metadata = metadata.clone();
        async move { axum::Json(metadata) }
    });
    spawn_server(router).await
}

/// Upstream stub that always fails with a 500 and a fixed message.
pub async fn spawn_failing_upstream(message: &'static str) -> String {
    let router = Router::new()
        .fallback(move || async move { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, message) });
    spawn_server(router).await
}

/// Artifact origin stub counting how often it is fetched.
pub struct Origin {
    pub base: String,
    pub hits: Arc<AtomicUsize>,
}

impl Origin {
    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub async fn spawn_origin(bytes: Vec<u8>) -> Origin {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let router = Router::new().fallback(move || {
        let counter = Arc::clone(&counter);
        let bytes = bytes.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            // Keep downloads in flight long enough for races to show up.
            tokio::time::sleep(Duration::from_millis(20)).await;
            bytes
        }
    });
    Origin {
        base: spawn_server(router).await,
        hits,
    }
}

/// Spawn a full proxy wired to a local filesystem backend rooted at
/// `cache_dir`. Cached artifacts are served back by the proxy itself under
/// `/packages`, so the retrieval URLs in responses are live.
pub async fn spawn_proxy(upstream_url: &str, cache_dir: &Path) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let client = reqwest::Client::new();
    let store = Arc::new(LocalStore::new(cache_dir, format!("{base}/packages")));
    let forwarder = Arc::new(MetadataForwarder::new(client.clone(), upstream_url));
    let pipeline = Arc::new(ArtifactPipeline::new(store, client));
    let router = server::router(
        AppState {
            forwarder,
            pipeline,
        },
        Some(cache_dir.to_path_buf()),
    );

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    base
}
