//! Part sizing policy
//!
//! Decides how large each part of a multipart upload should be when the total
//! length of the stream is not known up front.
//!
//! Early parts stay at the backend minimum so small objects reach the backend
//! quickly. The target then grows by one minimum every two parts, so the part
//! count stays under the backend ceiling for arbitrarily long streams. A total
//! length hint jumps straight to `ceil(length / max_part_count)`.
//!
//! # References
//! - [S3 Quotas](https://docs.aws.amazon.com/AmazonS3/latest/userguide/qfacts.html)

use super::UploadError;
use serde::{Deserialize, Serialize};

/// Minimum part size (5MB) - S3 requirement for every part but the last
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum part size (5GB) - S3 requirement
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum parts allowed per upload
pub const MAX_PARTS: u32 = 10_000;

/// Default number of part uploads tracked before the writer waits on them
pub const DEFAULT_MAX_IN_FLIGHT: usize = 6;

/// Backend-imposed part limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartLimits {
    #[serde(default = "default_min_part_size")]
    pub min_part_size: u64,
    #[serde(default = "default_max_part_size")]
    pub max_part_size: u64,
    #[serde(default = "default_max_part_count")]
    pub max_part_count: u32,
}

impl Default for PartLimits {
    fn default() -> Self {
        Self {
            min_part_size: default_min_part_size(),
            max_part_size: default_max_part_size(),
            max_part_count: default_max_part_count(),
        }
    }
}

fn default_min_part_size() -> u64 {
    MIN_PART_SIZE
}

fn default_max_part_size() -> u64 {
    MAX_PART_SIZE
}

fn default_max_part_count() -> u32 {
    MAX_PARTS
}

impl PartLimits {
    /// Create limits from explicit values
    pub fn new(min_part_size: u64, max_part_size: u64, max_part_count: u32) -> Self {
        Self {
            min_part_size,
            max_part_size,
            max_part_count,
        }
    }

    /// Validate the limits
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.min_part_size == 0 {
            return Err(UploadError::InvalidConfig(
                "min_part_size must be greater than zero".into(),
            ));
        }
        if self.max_part_size < self.min_part_size {
            return Err(UploadError::InvalidConfig(format!(
                "max_part_size ({}) must not be smaller than min_part_size ({})",
                self.max_part_size, self.min_part_size
            )));
        }
        if self.max_part_count == 0 {
            return Err(UploadError::InvalidConfig(
                "max_part_count must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Clamp a size into `[min_part_size, max_part_size]`
    #[inline]
    pub fn clamp(&self, size: u64) -> u64 {
        size.clamp(self.min_part_size, self.max_part_size)
    }
}

/// Tracks the target length of the next part
///
/// The target never decreases and always stays within the limits.
#[derive(Debug, Clone)]
pub struct PartSizer {
    limits: PartLimits,
    target: u64,
}

impl PartSizer {
    /// Create a sizer starting at `initial` (clamped into the limits)
    pub fn new(limits: PartLimits, initial: u64) -> Self {
        Self {
            target: limits.clamp(initial),
            limits,
        }
    }

    /// Current target for the part being filled
    #[inline]
    pub fn target(&self) -> u64 {
        self.target
    }

    /// The limits this sizer works against
    #[inline]
    pub fn limits(&self) -> &PartLimits {
        &self.limits
    }

    /// Grow the target before opening part `part_number` (1-based)
    pub fn open_part(&mut self, part_number: u32) -> u64 {
        let growth = (u64::from(part_number) / 2 + 1).saturating_mul(self.limits.min_part_size);
        self.target = self.limits.clamp(self.target.max(growth));
        self.target
    }

    /// Raise the target to `length / max_part_count`, clamped into the limits
    ///
    /// The quotient is truncated; the growth schedule covers the remainder.
    pub fn apply_length_hint(&mut self, length: u64) -> u64 {
        let hinted = self
            .limits
            .clamp(length / u64::from(self.limits.max_part_count));
        self.target = self.target.max(hinted);
        self.target
    }
}
