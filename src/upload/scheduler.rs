//! Upload scheduler
//!
//! Hands each completed part buffer to its own tokio task and bounds the
//! number of tracked tasks with a batched barrier: once the tracked set holds
//! `max_in_flight` tasks, the writer waits for every tracked task before
//! admitting another part. The barrier fires on reaching the limit, not on
//! exceeding it, so `max_in_flight` is the true ceiling on concurrent part
//! uploads (never `max_in_flight + 1`). The first failure seen during that
//! wait is returned to the writer.

use super::backend::{
    BackendError, CompletedPart, Destination, MultipartBackend, PartRequest, UploadOptions,
};
use super::observer::{Observers, PartUploaded, UploadInitiated, UploadObserver};
use super::UploadError;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

/// State shared between the writer and every part upload task
pub(crate) struct SharedUpload {
    pub(crate) backend: Arc<dyn MultipartBackend>,
    pub(crate) destination: Destination,
    pub(crate) options: UploadOptions,
    pub(crate) observers: Observers,
    /// Set at most once, by whichever part task gets there first
    upload_id: OnceCell<Result<String, BackendError>>,
    /// Completion tokens keyed by part number
    pub(crate) tokens: DashMap<u32, CompletedPart>,
}

impl SharedUpload {
    pub(crate) fn new(
        backend: Arc<dyn MultipartBackend>,
        destination: Destination,
        options: UploadOptions,
        observers: Observers,
    ) -> Self {
        Self {
            backend,
            destination,
            options,
            observers,
            upload_id: OnceCell::new(),
            tokens: DashMap::new(),
        }
    }

    /// Upload id, initiating the upload on first use
    async fn upload_id(&self) -> Result<String, UploadError> {
        self.upload_id
            .get_or_init(|| async {
                let result = self
                    .backend
                    .initiate(&self.destination, &self.options)
                    .await;

                match &result {
                    Ok(upload_id) => {
                        tracing::info!(
                            destination = %self.destination,
                            upload_id = %upload_id,
                            "Initiated multipart upload"
                        );
                        self.observers.upload_initiated(&UploadInitiated {
                            destination: self.destination.clone(),
                            upload_id: upload_id.clone(),
                        });
                    }
                    Err(e) => {
                        tracing::error!(destination = %self.destination, error = %e, "Initiate failed");
                    }
                }

                result
            })
            .await
            .clone()
            .map_err(UploadError::Initiate)
    }

    /// Upload id if the backend has assigned one
    pub(crate) fn initiated_upload_id(&self) -> Option<&str> {
        match self.upload_id.get() {
            Some(Ok(upload_id)) => Some(upload_id.as_str()),
            _ => None,
        }
    }
}

/// Run one part upload to completion and record its token
async fn upload_part(
    shared: Arc<SharedUpload>,
    part_number: u32,
    body: Bytes,
    is_last: bool,
) -> Result<(), UploadError> {
    let upload_id = shared.upload_id().await?;
    let size = body.len() as u64;
    let checksum = shared.options.checksum.map(|algorithm| algorithm.digest(&body));

    let request = PartRequest {
        destination: shared.destination.clone(),
        upload_id: upload_id.clone(),
        part_number,
        is_last,
        body,
        checksum,
    };

    let part = shared
        .backend
        .upload_part(request)
        .await
        .map_err(|source| UploadError::UploadPart {
            part_number,
            source,
        })?;

    tracing::debug!(
        upload_id = %upload_id,
        part_number = part_number,
        size = size,
        etag = %part.etag,
        "Uploaded part"
    );

    shared.observers.part_uploaded(&PartUploaded {
        destination: shared.destination.clone(),
        upload_id,
        part_number,
        size,
        etag: part.etag.clone(),
    });
    shared.tokens.insert(part_number, part);

    Ok(())
}

/// Dispatches parts and tracks their tasks
pub(crate) struct UploadScheduler {
    shared: Arc<SharedUpload>,
    in_flight: Vec<JoinHandle<Result<(), UploadError>>>,
    max_in_flight: usize,
    max_parts: u32,
    part_counter: u32,
    cancelled: Arc<AtomicBool>,
}

impl UploadScheduler {
    pub(crate) fn new(
        shared: Arc<SharedUpload>,
        max_in_flight: usize,
        max_parts: u32,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            shared,
            in_flight: Vec::with_capacity(max_in_flight),
            max_in_flight,
            max_parts,
            part_counter: 0,
            cancelled,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<SharedUpload> {
        &self.shared
    }

    /// Number of parts dispatched so far
    pub(crate) fn part_count(&self) -> u32 {
        self.part_counter
    }

    /// Number of tracked part tasks
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Start uploading `body` as the next part and return its part number
    pub(crate) async fn dispatch(&mut self, body: Bytes, is_last: bool) -> Result<u32, UploadError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(UploadError::Cancelled);
        }

        let part_number = self.part_counter + 1;
        if part_number > self.max_parts {
            return Err(UploadError::PartLimitExceeded {
                part_number,
                max_parts: self.max_parts,
            });
        }

        if self.in_flight.len() >= self.max_in_flight {
            tracing::debug!(
                in_flight = self.in_flight.len(),
                "Waiting for in-flight parts before dispatching more"
            );
            self.wait_all().await?;
        }

        self.part_counter = part_number;
        tracing::debug!(
            part_number = part_number,
            size = body.len(),
            is_last = is_last,
            "Dispatching part"
        );

        let shared = Arc::clone(&self.shared);
        self.in_flight
            .push(tokio::spawn(upload_part(shared, part_number, body, is_last)));

        Ok(part_number)
    }

    /// Wait for every tracked task, clear the set and return the first failure
    pub(crate) async fn wait_all(&mut self) -> Result<(), UploadError> {
        let handles = std::mem::take(&mut self.in_flight);
        let mut first_error = None;

        for result in futures::future::join_all(handles).await {
            let result = result.unwrap_or_else(|e| Err(UploadError::TaskFailed(e.to_string())));
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    tracing::debug!(error = %e, "Additional part failure");
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
