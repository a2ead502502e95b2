//! Error types for the pkgmirror proxy.
//!
//! This module provides a unified error type [`ProxyError`] for all proxy
//! operations, along with a convenient [`Result`] type alias.
//!
//! Errors fall into the following categories:
//!
//! - **Upstream**: failures talking to the metadata service (transport,
//!   non-success status, undecodable body, unparseable artifact URL)
//! - **Artifact**: failures downloading or verifying an artifact
//! - **Cache**: backend query and store failures
//! - **Configuration**: invalid settings, surfaced before the proxy starts
//!
//! Every request-path error is rendered as an HTTP 500 at the request
//! handler; there is no retry and no 4xx mapping.

use std::io;
use thiserror::Error;

/// Main error type for proxy operations.
#[derive(Error, Debug)]
pub enum ProxyError {
    // Upstream metadata errors
    #[error("Failed to perform upstream request: {0}")]
    UpstreamRequest(String),

    #[error("Upstream responded for url {url} with {status}: {body}")]
    UpstreamStatus {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Failed to parse upstream response. response: {body}, error: {reason}")]
    UpstreamDecode { body: String, reason: String },

    #[error("Failed to parse artifact url: {url}, error: {reason}")]
    InvalidArtifactUrl { url: String, reason: String },

    // Artifact download and verification errors
    #[error("Fetching {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("Sha256 hash of downloaded artifact does not match. Expected {expected}, Got {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    // Cache backend errors
    #[error("Failed to query the cache: {0}")]
    CacheQuery(String),

    #[error("Failed to store {key} in cache: {reason}")]
    CacheStore { key: String, reason: String },

    #[error("Storage backend error: {0}")]
    Storage(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// Check whether the error indicates corrupted or mismatched content.
    pub fn is_integrity_error(&self) -> bool {
        matches!(self, ProxyError::ChecksumMismatch { .. })
    }

    /// Check whether the error should abort startup rather than a request.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            ProxyError::Config(_) | ProxyError::InvalidConfig { .. }
        )
    }
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
