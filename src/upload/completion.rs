//! Completion coordinator
//!
//! Turns the concurrently collected completion tokens into the ordered part
//! list the backend needs, and issues the final complete or abort call.

use super::backend::{CompletedPart, UploadResult};
use super::observer::{UploadCompleted, UploadObserver};
use super::scheduler::SharedUpload;
use super::UploadError;
use dashmap::DashMap;

/// Tokens for parts `1..=part_count` in ascending order
///
/// Fails on the first part number without a token.
pub(crate) fn ordered_parts(
    tokens: &DashMap<u32, CompletedPart>,
    part_count: u32,
) -> Result<Vec<CompletedPart>, UploadError> {
    let mut parts: Vec<CompletedPart> = tokens.iter().map(|entry| entry.value().clone()).collect();
    parts.sort_by_key(|part| part.part_number);

    for expected in 1..=part_count {
        match parts.get(expected as usize - 1) {
            Some(part) if part.part_number == expected => {}
            _ => return Err(UploadError::MissingPart(expected)),
        }
    }
    parts.truncate(part_count as usize);

    Ok(parts)
}

pub(crate) struct CompletionCoordinator<'a> {
    shared: &'a SharedUpload,
}

impl<'a> CompletionCoordinator<'a> {
    pub(crate) fn new(shared: &'a SharedUpload) -> Self {
        Self { shared }
    }

    /// Submit every recorded token, ordered by part number
    ///
    /// Callers must have drained all in-flight parts first.
    pub(crate) async fn complete(
        &self,
        part_count: u32,
        bytes: u64,
    ) -> Result<UploadResult, UploadError> {
        let parts = ordered_parts(&self.shared.tokens, part_count)?;
        let upload_id = self
            .shared
            .initiated_upload_id()
            .ok_or(UploadError::MissingPart(1))?;

        let result = self
            .shared
            .backend
            .complete(&self.shared.destination, upload_id, &parts)
            .await
            .map_err(UploadError::Complete)?;

        tracing::info!(
            destination = %self.shared.destination,
            upload_id = %upload_id,
            parts = part_count,
            bytes = bytes,
            etag = %result.etag,
            "Completed multipart upload"
        );

        self.shared.observers.upload_completed(&UploadCompleted {
            destination: self.shared.destination.clone(),
            upload_id: upload_id.to_string(),
            parts: part_count,
            bytes,
            etag: result.etag.clone(),
        });

        Ok(result)
    }

    /// Abort the backend upload if one was initiated
    ///
    /// Returns `false` when there was nothing to abort.
    pub(crate) async fn abort(&self) -> Result<bool, UploadError> {
        let Some(upload_id) = self.shared.initiated_upload_id() else {
            return Ok(false);
        };

        self.shared
            .backend
            .abort(&self.shared.destination, upload_id)
            .await
            .map_err(UploadError::Abort)?;

        tracing::info!(
            destination = %self.shared.destination,
            upload_id = %upload_id,
            "Aborted multipart upload"
        );

        Ok(true)
    }
}
