//! S3-compatible object storage cache backend.
//!
//! Authentication, region resolution, and connection reuse are delegated to
//! the AWS SDK's standard environment chain. The bucket is created lazily at
//! startup if it does not exist.

use super::{CacheStorage, StagedArtifact};
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use base64::Engine;
use tokio::io::AsyncReadExt;
use tracing::info;
use url::Url;

/// Cache backend storing each artifact as an object in a fixed bucket,
/// named by the cache key with leading separators stripped.
pub struct ObjectStore {
    client: Client,
    bucket: String,
    region: String,
}

impl ObjectStore {
    /// Connect using the standard AWS environment credential chain and make
    /// sure the bucket exists. Failures here are startup-fatal.
    pub async fn connect(bucket: impl Into<String>, region_override: Option<String>) -> Result<Self> {
        let bucket = bucket.into();

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region_override.clone() {
            loader = loader.region(aws_config::Region::new(region));
        }
        let shared = loader.load().await;

        let region = shared
            .region()
            .map(|r| r.to_string())
            .or(region_override)
            .ok_or_else(|| {
                ProxyError::Config("no region configured for the s3 cache backend".to_string())
            })?;

        let store = Self {
            client: Client::new(&shared),
            bucket,
            region,
        };
        store.ensure_bucket().await?;
        Ok(store)
    }

    async fn ensure_bucket(&self) -> Result<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => {
                info!(bucket = %self.bucket, "Creating cache bucket");
                self.client
                    .create_bucket()
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .map_err(|e| {
                        ProxyError::Storage(format!(
                            "failed to create bucket {}: {}",
                            self.bucket,
                            DisplayErrorContext(&e)
                        ))
                    })?;
                Ok(())
            }
            Err(e) => Err(ProxyError::Storage(format!(
                "failed to probe bucket {}: {}",
                self.bucket,
                DisplayErrorContext(&e)
            ))),
        }
    }

    /// Streaming MD5 of the staged content, base64-encoded for the
    /// Content-MD5 integrity header.
    async fn content_md5(artifact: &StagedArtifact) -> Result<String> {
        let mut reader = artifact.reader().await?;
        let mut context = md5::Context::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            context.consume(&buf[..n]);
        }
        Ok(base64::engine::general_purpose::STANDARD.encode(context.compute().0))
    }
}

#[async_trait]
impl CacheStorage for ObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Url>> {
        let object = object_name(key);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(object)
            .send()
            .await
        {
            Ok(_) => Ok(Some(object_url(&self.bucket, &self.region, object)?)),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => Ok(None),
            Err(e) => Err(ProxyError::CacheQuery(format!("{}", DisplayErrorContext(&e)))),
        }
    }

    async fn store(&self, key: &str, artifact: &StagedArtifact) -> Result<Url> {
        let object = object_name(key);
        let digest = Self::content_md5(artifact).await?;
        let body = ByteStream::from_path(artifact.path())
            .await
            .map_err(|e| ProxyError::CacheStore {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(object)
            .content_md5(digest)
            .body(body)
            .send()
            .await
            .map_err(|e| ProxyError::CacheStore {
                key: key.to_string(),
                reason: format!("{}", DisplayErrorContext(&e)),
            })?;

        object_url(&self.bucket, &self.region, object)
    }
}

/// Cache keys keep their leading separator; object names do not.
fn object_name(key: &str) -> &str {
    key.trim_start_matches('/')
}

/// Virtual-hosted-style service URL for an object.
fn object_url(bucket: &str, region: &str, object: &str) -> Result<Url> {
    Url::parse(&format!(
        "https://{bucket}.s3.{region}.amazonaws.com/{object}"
    ))
    .map_err(|e| ProxyError::Storage(format!("invalid object url for {object}: {e}")))
}
