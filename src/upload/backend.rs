//! Multipart backend capability
//!
//! The narrow interface the upload session needs from an object store:
//! initiate, upload part, complete and abort. Any storage backend that speaks
//! a multipart protocol can be plugged in behind it.

use crate::s3::S3ClientError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::checksum::ChecksumAlgorithm;

/// Backend operation errors
///
/// Cloneable so a failed lazy initiate can be reported by every part that
/// was waiting on it.
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("S3 error: {0}")]
    S3(#[from] S3ClientError),

    #[error("Unknown upload: {0}")]
    UnknownUpload(String),

    #[error("Invalid part list: {0}")]
    InvalidPartList(String),

    #[error("Backend error: {0}")]
    Other(String),
}

/// Destination object of an upload
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Destination {
    pub bucket: String,
    pub key: String,
}

impl Destination {
    /// Create a destination from a bucket and key
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

impl FromStr for Destination {
    type Err = String;

    /// Parse `s3://bucket/key`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("s3://")
            .ok_or_else(|| format!("'{}' is not an s3:// URI", s))?;
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| format!("'{}' has no object key", s))?;
        let key = key.trim_start_matches('/');

        if bucket.is_empty() {
            return Err(format!("'{}' has an empty bucket name", s));
        }
        if key.is_empty() {
            return Err(format!("'{}' has an empty object key", s));
        }

        Ok(Self::new(bucket, key))
    }
}

/// Per-upload options passed to `initiate` unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOptions {
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub checksum: Option<ChecksumAlgorithm>,
}

/// A single part handed to the backend
#[derive(Debug, Clone)]
pub struct PartRequest {
    pub destination: Destination,
    pub upload_id: String,
    pub part_number: u32,
    /// Set on the tail part dispatched by `finish`
    ///
    /// When `finish` finds the buffer empty (the last part already went out
    /// through `flush`), no part carries the flag. Backends must not depend
    /// on seeing it.
    pub is_last: bool,
    pub body: Bytes,
    /// Base64 SHA-256 of `body` when checksums are enabled
    pub checksum: Option<String>,
}

/// Completion token for one uploaded part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Backend confirmation of a completed upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub etag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Multipart upload backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MultipartBackend: Send + Sync {
    /// Start a multipart upload and return its upload id
    async fn initiate(
        &self,
        destination: &Destination,
        options: &UploadOptions,
    ) -> Result<String, BackendError>;

    /// Upload one part and return its completion token
    async fn upload_part(&self, request: PartRequest) -> Result<CompletedPart, BackendError>;

    /// Materialize the object from parts listed in ascending part number order
    async fn complete(
        &self,
        destination: &Destination,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<UploadResult, BackendError>;

    /// Discard an upload and every part uploaded so far
    async fn abort(&self, destination: &Destination, upload_id: &str) -> Result<(), BackendError>;
}
