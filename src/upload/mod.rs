//! Upload module
//!
//! Adapts a forward-only byte stream into a multipart upload: buffers written
//! bytes into parts, sizes parts adaptively, uploads them concurrently and
//! completes the object with the part list in order.

use thiserror::Error;

pub mod backend;
pub mod blocking;
pub mod checksum;
mod completion;
pub mod memory;
pub mod observer;
pub mod policy;
mod scheduler;
pub mod session;

pub use backend::{
    BackendError, CompletedPart, Destination, MultipartBackend, PartRequest, UploadOptions,
    UploadResult,
};
pub use blocking::BlockingUploadWriter;
pub use checksum::ChecksumAlgorithm;
pub use memory::MemoryBackend;
pub use observer::{PartUploaded, UploadCompleted, UploadInitiated, UploadObserver};
pub use policy::{PartLimits, PartSizer};
pub use session::{
    upload_stream, CancelHandle, SessionConfig, SessionState, UploadOutcome, UploadSession,
};

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Part limit exceeded: part {part_number} is over the maximum of {max_parts} parts")]
    PartLimitExceeded { part_number: u32, max_parts: u32 },

    #[error("Cannot {operation} while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Session failed earlier: {0}")]
    Poisoned(String),

    #[error("Initiate multipart upload failed: {0}")]
    Initiate(#[source] BackendError),

    #[error("Upload of part {part_number} failed: {source}")]
    UploadPart {
        part_number: u32,
        #[source]
        source: BackendError,
    },

    #[error("Missing completion token for part {0}")]
    MissingPart(u32),

    #[error("Complete multipart upload failed: {0}")]
    Complete(#[source] BackendError),

    #[error("Abort multipart upload failed: {0}")]
    Abort(#[source] BackendError),

    #[error("Upload task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl UploadError {
    /// Whether this error is a precondition violation rather than a backend failure
    ///
    /// Precondition violations are fatal for the session; retrying with the same
    /// sizing parameters cannot succeed.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::PartLimitExceeded { .. }
                | Self::InvalidState { .. }
                | Self::MissingPart(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_classification() {
        let limit = UploadError::PartLimitExceeded {
            part_number: 10_001,
            max_parts: 10_000,
        };
        assert!(limit.is_precondition());
        assert!(limit.to_string().contains("10001"));

        let state = UploadError::InvalidState {
            operation: "write",
            state: SessionState::Finalizing,
        };
        assert!(state.is_precondition());
        assert_eq!(
            state.to_string(),
            "Cannot write while the session is finalizing"
        );

        let backend = UploadError::UploadPart {
            part_number: 3,
            source: BackendError::Other("boom".into()),
        };
        assert!(!backend.is_precondition());
        assert!(!UploadError::Cancelled.is_precondition());
    }
}
