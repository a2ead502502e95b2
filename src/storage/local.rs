//! Filesystem-backed cache storage.

use super::{CacheStorage, StagedArtifact};
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use url::Url;

/// Cache backend storing each artifact at `<cache_dir>/<key>`. Reads are
/// served separately by the proxy's `/packages` static file routes, so the
/// retrieval URL is the configured public base plus the key.
pub struct LocalStore {
    cache_dir: PathBuf,
    public_url: String,
}

impl LocalStore {
    /// Create a store rooted at `cache_dir`, addressable under `public_url`.
    pub fn new(cache_dir: impl Into<PathBuf>, public_url: impl Into<String>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Root directory of the cache, for mounting the static file service.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn object_path(&self, key: &str) -> PathBuf {
        // Keys are escaped URL paths with a leading separator.
        self.cache_dir.join(key.trim_start_matches('/'))
    }

    fn retrieval_url(&self, key: &str) -> Result<Url> {
        Url::parse(&format!("{}{}", self.public_url, key)).map_err(|e| {
            ProxyError::Storage(format!("invalid retrieval url for {key}: {e}"))
        })
    }
}

#[async_trait]
impl CacheStorage for LocalStore {
    async fn get(&self, key: &str) -> Result<Option<Url>> {
        match fs::metadata(self.object_path(key)).await {
            Ok(_) => Ok(Some(self.retrieval_url(key)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ProxyError::CacheQuery(e.to_string())),
        }
    }

    async fn store(&self, key: &str, artifact: &StagedArtifact) -> Result<Url> {
        let path = self.object_path(key);
        let parent = path.parent().ok_or_else(|| ProxyError::CacheStore {
            key: key.to_string(),
            reason: "key resolves to the cache root".to_string(),
        })?;
        fs::create_dir_all(parent).await.map_err(|e| ProxyError::CacheStore {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        // Copy beside the destination, then rename over it, so the static
        // file routes never serve a half-written artifact.
        let staging = path.with_file_name(format!(
            "{}.part",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("artifact")
        ));
        fs::copy(artifact.path(), &staging)
            .await
            .map_err(|e| ProxyError::CacheStore {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        fs::rename(&staging, &path)
            .await
            .map_err(|e| ProxyError::CacheStore {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        self.retrieval_url(key)
    }
}
