//! Configuration for the pkgmirror proxy.
//!
//! The configuration is built once at startup (from CLI flags and
//! environment variables) and passed into the constructors of the
//! forwarder, pipeline, and storage backend. Nothing reads ambient
//! process-wide state after startup.

use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Which cache backend the proxy stores artifacts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// Filesystem-backed cache served by the proxy's static file routes.
    Local,
    /// S3-compatible object storage.
    S3,
}

impl fmt::Display for CacheBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheBackendKind::Local => write!(f, "local"),
            CacheBackendKind::S3 => write!(f, "s3"),
        }
    }
}

impl FromStr for CacheBackendKind {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(CacheBackendKind::Local),
            "s3" | "object-storage" => Ok(CacheBackendKind::S3),
            other => Err(ProxyError::Config(format!(
                "unknown cache backend: {other}"
            ))),
        }
    }
}

/// Main configuration for the proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Upstream metadata service configuration.
    pub upstream: UpstreamConfig,
    /// Cache backend configuration.
    pub cache: CacheConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the proxy listener.
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

/// Upstream metadata service and outbound HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the metadata service; inbound paths are appended to it.
    pub base_url: String,
    /// Connect timeout for outbound requests.
    pub connect_timeout: Duration,
    /// Total timeout for outbound requests. Generous, because artifact
    /// downloads can take minutes.
    pub request_timeout: Duration,
    /// Disable TLS certificate verification on outbound requests.
    /// Development only, for running behind an intercepting proxy.
    pub insecure_tls: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://omnitruck.chef.io".to_string(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(15 * 60),
            insecure_tls: false,
        }
    }
}

/// Cache backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Selected backend.
    pub backend: CacheBackendKind,
    /// Root directory for the local backend.
    pub cache_dir: PathBuf,
    /// Public base URL under which the local backend's artifacts are served.
    pub public_url: String,
    /// Bucket name for the s3 backend. Required when that backend is
    /// selected.
    pub s3_bucket: Option<String>,
    /// Region used when building object URLs. Falls back to the provider
    /// chain's resolved region.
    pub s3_region: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Local,
            cache_dir: PathBuf::from("cache"),
            public_url: "http://localhost:8080/packages".to_string(),
            s3_bucket: None,
            s3_region: None,
        }
    }
}

impl ProxyConfig {
    /// Validate the configuration. Failures here are startup-fatal.
    pub fn validate(&self) -> Result<()> {
        let upstream = Url::parse(&self.upstream.base_url).map_err(|e| {
            ProxyError::InvalidConfig {
                field: "upstream.base_url".to_string(),
                reason: e.to_string(),
            }
        })?;
        if !matches!(upstream.scheme(), "http" | "https") {
            return Err(ProxyError::InvalidConfig {
                field: "upstream.base_url".to_string(),
                reason: format!("unsupported scheme: {}", upstream.scheme()),
            });
        }

        if self.upstream.request_timeout.is_zero() {
            return Err(ProxyError::InvalidConfig {
                field: "upstream.request_timeout".to_string(),
                reason: "timeout must be non-zero".to_string(),
            });
        }

        match self.cache.backend {
            CacheBackendKind::Local => {
                Url::parse(&self.cache.public_url).map_err(|e| ProxyError::InvalidConfig {
                    field: "cache.public_url".to_string(),
                    reason: e.to_string(),
                })?;
            }
            CacheBackendKind::S3 => {
                if self.cache.s3_bucket.as_deref().unwrap_or("").is_empty() {
                    return Err(ProxyError::InvalidConfig {
                        field: "cache.s3_bucket".to_string(),
                        reason: "bucket name required for the s3 cache backend".to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Create a minimal development configuration: local backend, loopback
    /// listener, relative cache directory.
    pub fn development() -> Self {
        Self {
            server: ServerConfig {
                listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            },
            upstream: UpstreamConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_config_is_valid() {
        ProxyConfig::development().validate().unwrap();
    }

    #[test]
    fn s3_backend_requires_bucket() {
        let mut config = ProxyConfig::development();
        config.cache.backend = CacheBackendKind::S3;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("s3_bucket"));

        config.cache.s3_bucket = Some("artifacts".to_string());
        config.validate().unwrap();
    }

    #[test]
    fn bad_upstream_url_rejected() {
        let mut config = ProxyConfig::development();
        config.upstream.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.upstream.base_url = "ftp://mirror.example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn backend_kind_from_str() {
        assert_eq!(
            "local".parse::<CacheBackendKind>().unwrap(),
            CacheBackendKind::Local
        );
        assert_eq!(
            "s3".parse::<CacheBackendKind>().unwrap(),
            CacheBackendKind::S3
        );
        assert_eq!(
            "object-storage".parse::<CacheBackendKind>().unwrap(),
            CacheBackendKind::S3
        );
        assert!("swift".parse::<CacheBackendKind>().is_err());
    }
}
