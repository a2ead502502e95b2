//! The artifact fetch-verify-store pipeline.
//!
//! Given validated metadata, [`ArtifactPipeline::resolve`] makes sure the
//! referenced artifact is present in the cache backend and rewrites the
//! metadata to point at the cached copy.
//!
//! Population for a given cache key is serialized by a per-key lock held
//! across the whole check-download-verify-store sequence: concurrent
//! requests for the same artifact never download it twice, and no request
//! observes a partially written entry. The holder that acquires the lock
//! always re-queries the backend rather than trusting whatever the previous
//! holder did, so a failed population is simply retried by the next request.
//!
//! Verification happens before persisting. The downloaded stream is fanned
//! out into a staging file and a SHA-256 accumulator in a single pass; only
//! content whose digest matches the declared checksum ever reaches the
//! backend, which is what makes the backend's overwrite-tolerant store
//! semantics safe.

use crate::error::{ProxyError, Result};
use crate::lock::KeyedLocks;
use crate::metadata::{DistributionMetadata, ResolvedMetadata};
use crate::storage::{CacheStorage, StagedArtifact};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::fmt::Display;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::info;
use url::Url;

/// Cache-aside orchestration: resolve cache state, download, verify, store.
pub struct ArtifactPipeline {
    storage: Arc<dyn CacheStorage>,
    locks: Arc<KeyedLocks>,
    client: reqwest::Client,
}

impl ArtifactPipeline {
    /// Create a pipeline over `storage`, reusing the shared outbound client
    /// for artifact downloads.
    pub fn new(storage: Arc<dyn CacheStorage>, client: reqwest::Client) -> Self {
        Self {
            storage,
            locks: KeyedLocks::new(),
            client,
        }
    }

    /// Ensure the artifact referenced by `resolved` is cached and return the
    /// metadata with its URL rewritten to the cached location. The remaining
    /// fields pass through unchanged.
    pub async fn resolve(&self, resolved: ResolvedMetadata) -> Result<DistributionMetadata> {
        let key = resolved.cache_key().to_string();

        // Held until return, success or failure: at most one in-flight
        // population per key.
        let _guard = self.locks.lock(&key).await;

        let retrieval = match self.storage.get(&key).await? {
            Some(url) => url,
            None => self.populate(&resolved, &key).await?,
        };

        let mut metadata = resolved.metadata;
        metadata.url = retrieval.to_string();
        Ok(metadata)
    }

    /// Download, verify, and store one artifact. Caller holds the key lock.
    async fn populate(&self, resolved: &ResolvedMetadata, key: &str) -> Result<Url> {
        let origin = resolved.artifact_url.as_str();
        info!(url = %origin, "Caching artifact");

        let response = self
            .client
            .get(resolved.artifact_url.clone())
            .send()
            .await
            .map_err(|e| download_error(origin, e))?;
        if !response.status().is_success() {
            return Err(download_error(
                origin,
                format!("origin responded with {}", response.status()),
            ));
        }

        let staged = StagedArtifact::new()?;
        let mut writer = staged.writer().await?;
        let computed = copy_and_digest(response.bytes_stream(), &mut writer, origin).await?;
        drop(writer);

        if computed != resolved.metadata.sha256 {
            // Fatal for this request; the staged content is dropped unstored.
            return Err(ProxyError::ChecksumMismatch {
                expected: resolved.metadata.sha256.clone(),
                computed,
            });
        }
        info!(url = %origin, "Downloaded and verified artifact");

        let retrieval = self.storage.store(key, &staged).await?;
        info!(url = %origin, key = %key, "Stored artifact in cache");
        Ok(retrieval)
    }
}

/// Single-pass fan-out: every chunk of `body` goes to `writer` and a SHA-256
/// accumulator. Returns the lowercase-hex digest of the copied content.
/// Failures anywhere in the copy are download failures for `origin`.
async fn copy_and_digest<S, E, W>(mut body: S, writer: &mut W, origin: &str) -> Result<String>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: Display,
    W: AsyncWrite + Unpin,
{
    let mut hasher = Sha256::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| download_error(origin, e))?;
        hasher.update(&chunk);
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| download_error(origin, e))?;
    }
    writer
        .flush()
        .await
        .map_err(|e| download_error(origin, e))?;
    Ok(hex::encode(hasher.finalize()))
}

fn download_error(url: &str, reason: impl Display) -> ProxyError {
    ProxyError::Download {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}
