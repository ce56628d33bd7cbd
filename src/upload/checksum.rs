//! Per-part integrity checksums
//!
//! <https://docs.aws.amazon.com/AmazonS3/latest/userguide/checking-object-integrity.html>

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Additional checksum algorithm sent with every part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha256,
}

impl ChecksumAlgorithm {
    /// Value of the `x-amz-checksum-algorithm` header
    pub fn as_algorithm(&self) -> &'static str {
        match self {
            Self::Sha256 => "SHA256",
        }
    }

    /// Header carrying the per-part checksum
    pub fn header_name(&self) -> &'static str {
        match self {
            Self::Sha256 => "x-amz-checksum-sha256",
        }
    }

    /// Base64 encoded digest of `data`
    pub fn digest(&self, data: &[u8]) -> String {
        match self {
            Self::Sha256 => STANDARD.encode(Sha256::digest(data)),
        }
    }
}
