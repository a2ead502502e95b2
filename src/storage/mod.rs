//! Cache storage backends.
//!
//! A backend is a key-addressed blob store: probe whether an artifact is
//! cached, or persist a verified artifact and hand back its retrieval URL.
//! Two realizations exist: [`local::LocalStore`] (filesystem, served by the
//! proxy's static file routes) and [`object::ObjectStore`] (S3-compatible
//! object storage).

pub mod local;
pub mod object;

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use url::Url;

/// Key-addressed artifact store.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Look up `key`, returning the retrieval URL if present.
    ///
    /// Absence is `Ok(None)`, never an error.
    async fn get(&self, key: &str) -> Result<Option<Url>>;

    /// Persist the staged artifact under `key` and return its retrieval URL.
    ///
    /// Intermediate directories or containers are created as needed.
    /// Overwriting an existing key is permitted; callers only ever store
    /// checksum-verified content, so a rewrite is content-equivalent.
    async fn store(&self, key: &str, artifact: &StagedArtifact) -> Result<Url>;
}

/// Temporary file holding a downloaded artifact while it is verified and
/// handed to a backend. The file is removed on drop regardless of outcome.
pub struct StagedArtifact {
    file: tempfile::NamedTempFile,
}

impl StagedArtifact {
    /// Create an empty staging file.
    pub fn new() -> Result<Self> {
        Ok(Self {
            file: tempfile::NamedTempFile::new()?,
        })
    }

    /// Create a staging file pre-filled with `bytes`. Test and tooling
    /// convenience.
    pub async fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let staged = Self::new()?;
        tokio::fs::write(staged.path(), bytes).await?;
        Ok(staged)
    }

    /// Path of the staged content on local disk.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Open the staging file for writing from the start.
    pub async fn writer(&self) -> Result<tokio::fs::File> {
        Ok(tokio::fs::File::create(self.path()).await?)
    }

    /// Open the staged content for reading from the start.
    pub async fn reader(&self) -> Result<tokio::fs::File> {
        Ok(tokio::fs::File::open(self.path()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn staged_artifact_is_deleted_on_drop() {
        let staged = StagedArtifact::from_bytes(b"bytes").await.unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());
        drop(staged);
        assert!(!path.exists());
    }
}
