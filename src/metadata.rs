//! Upstream metadata fetching and decoding.
//!
//! The [`MetadataForwarder`] mirrors every inbound request against the
//! upstream distribution service and decodes the response into
//! [`DistributionMetadata`]. A single failed attempt is reported upward
//! immediately; this layer never retries.

use crate::error::{ProxyError, Result};
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// Package metadata returned by the upstream distribution service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionMetadata {
    /// Absolute URL of the artifact. Rewritten by the pipeline to point at
    /// the cached copy.
    pub url: String,
    /// Expected SHA-256 of the artifact, lowercase hex. Authoritative for
    /// verification.
    pub sha256: String,
    /// SHA-1 checksum, passed through unchanged and never verified.
    pub sha1: String,
    /// Opaque version string, passed through unchanged.
    pub version: String,
}

impl DistributionMetadata {
    /// Fixed-order plain-text rendering: one `key\tvalue` line per field,
    /// trailing newline.
    pub fn render_plain(&self) -> String {
        format!(
            "sha1\t{}\nsha256\t{}\nurl\t{}\nversion\t{}\n",
            self.sha1, self.sha256, self.url, self.version
        )
    }
}

/// Metadata whose artifact URL has been parsed and validated.
#[derive(Debug, Clone)]
pub struct ResolvedMetadata {
    /// The decoded upstream metadata.
    pub metadata: DistributionMetadata,
    /// The parsed artifact URL.
    pub artifact_url: Url,
}

impl ResolvedMetadata {
    /// Validate the artifact URL of `metadata`.
    pub fn new(metadata: DistributionMetadata) -> Result<Self> {
        let artifact_url =
            Url::parse(&metadata.url).map_err(|e| ProxyError::InvalidArtifactUrl {
                url: metadata.url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            metadata,
            artifact_url,
        })
    }

    /// Escaped path component of the artifact URL. Identifies both the
    /// storage object and the population lock.
    pub fn cache_key(&self) -> &str {
        self.artifact_url.path()
    }
}

/// Forwards inbound requests to the upstream metadata service.
pub struct MetadataForwarder {
    client: reqwest::Client,
    base_url: String,
}

impl MetadataForwarder {
    /// Create a forwarder for `base_url`, reusing the shared outbound client.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Fetch metadata for `path_and_query`, mirroring the inbound request's
    /// method and explicitly requesting JSON.
    pub async fn fetch(&self, method: Method, path_and_query: &str) -> Result<ResolvedMetadata> {
        let url = format!("{}{}", self.base_url, path_and_query);

        let response = self
            .client
            .request(method, &url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ProxyError::UpstreamRequest(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProxyError::UpstreamRequest(e.to_string()))?;

        if status.as_u16() >= 400 {
            return Err(ProxyError::UpstreamStatus {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let metadata: DistributionMetadata =
            serde_json::from_str(&body).map_err(|e| ProxyError::UpstreamDecode {
                body,
                reason: e.to_string(),
            })?;

        ResolvedMetadata::new(metadata)
    }
}
