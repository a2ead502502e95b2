//! Command-line interface for pkgmirror.

use crate::config::{CacheBackendKind, ProxyConfig};
use crate::error::{ProxyError, Result};
use clap::Parser;
use std::path::PathBuf;

/// pkgmirror - caching reverse proxy for package-distribution metadata.
#[derive(Parser, Debug)]
#[command(name = "pkgmirror")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Bind address for the proxy
    #[arg(long, env = "PKGMIRROR_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Base URL of the upstream metadata service
    #[arg(
        long,
        env = "PKGMIRROR_UPSTREAM_URL",
        default_value = "https://omnitruck.chef.io"
    )]
    pub upstream_url: String,

    /// Which cache backend to use (local, s3)
    #[arg(long, env = "PKGMIRROR_CACHE_BACKEND", default_value = "local")]
    pub cache_backend: String,

    /// Root directory for the local cache backend
    #[arg(long, env = "PKGMIRROR_CACHE_DIR", default_value = "cache")]
    pub cache_dir: PathBuf,

    /// Public base URL under which locally cached artifacts are served
    #[arg(
        long,
        env = "PKGMIRROR_PUBLIC_URL",
        default_value = "http://localhost:8080/packages"
    )]
    pub public_url: String,

    /// Bucket name for the s3 cache backend
    #[arg(long, env = "PKGMIRROR_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Region used when building object URLs (defaults to the provider chain)
    #[arg(long, env = "PKGMIRROR_S3_REGION")]
    pub s3_region: Option<String>,

    /// Disable TLS certificate verification on outbound requests.
    /// Useful for running behind mitmproxy during development.
    #[arg(long, env = "PKGMIRROR_INSECURE", default_value_t = false)]
    pub insecure: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "PKGMIRROR_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Build and validate the runtime configuration from the parsed flags.
    pub fn into_config(self) -> Result<ProxyConfig> {
        let listen = self.listen.parse().map_err(|e| ProxyError::InvalidConfig {
            field: "listen".to_string(),
            reason: format!("{e}"),
        })?;
        let backend: CacheBackendKind = self.cache_backend.parse()?;

        let mut config = ProxyConfig::default();
        config.server.listen = listen;
        config.upstream.base_url = self.upstream_url;
        config.upstream.insecure_tls = self.insecure;
        config.cache.backend = backend;
        config.cache.cache_dir = self.cache_dir;
        config.cache.public_url = self.public_url;
        config.cache.s3_bucket = self.s3_bucket;
        config.cache.s3_region = self.s3_region;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("pkgmirror").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_build_a_local_config() {
        let config = cli(&[]).into_config().unwrap();
        assert_eq!(config.cache.backend, CacheBackendKind::Local);
        assert_eq!(config.upstream.base_url, "https://omnitruck.chef.io");
        assert!(!config.upstream.insecure_tls);
    }

    #[test]
    fn s3_backend_without_bucket_is_fatal() {
        let err = cli(&["--cache-backend", "s3"]).into_config().unwrap_err();
        assert!(err.is_startup_fatal());
    }

    #[test]
    fn unknown_backend_is_fatal() {
        let err = cli(&["--cache-backend", "gopher"])
            .into_config()
            .unwrap_err();
        assert!(err.to_string().contains("unknown cache backend"));
    }

    #[test]
    fn bad_listen_address_rejected() {
        assert!(cli(&["--listen", "not-an-addr"]).into_config().is_err());
    }
}
