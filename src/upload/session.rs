//! Upload session
//!
//! One session produces one destination object. Bytes written to the session
//! are assembled into part buffers; each full buffer is handed to the
//! scheduler, and `finish` uploads the tail, drains every in-flight part and
//! completes the object.
//!
//! # Example
//!
//! ```no_run
//! use mizuchi_stream::upload::{
//!     upload_stream, Destination, MemoryBackend, SessionConfig, UploadSession,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(MemoryBackend::new());
//! let config = SessionConfig::new(Destination::new("bucket", "data.csv"));
//! let session = UploadSession::new(backend, config)?;
//!
//! let mut input = tokio::io::stdin();
//! let outcome = upload_stream(session, &mut input).await?;
//! println!("{} parts, {} bytes", outcome.parts, outcome.bytes);
//! # Ok(())
//! # }
//! ```

use super::backend::{Destination, MultipartBackend, UploadOptions};
use super::completion::CompletionCoordinator;
use super::observer::{Observers, UploadObserver};
use super::policy::{PartLimits, PartSizer, DEFAULT_MAX_IN_FLIGHT};
use super::scheduler::{SharedUpload, UploadScheduler};
use super::UploadError;
use bytes::BytesMut;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

/// Largest up-front allocation for a part buffer
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

/// Read buffer size used by `copy_from`
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Nothing written yet
    Idle,
    /// A part buffer is being filled, nothing dispatched yet
    Accumulating,
    /// At least one part has been dispatched
    Uploading,
    /// `finish` has started; no more writes
    Finalizing,
    Completed,
    Aborted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Accumulating => "accumulating",
            Self::Uploading => "uploading",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Immutable per-session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub destination: Destination,
    pub limits: PartLimits,
    /// Target for the first part; defaults to `limits.min_part_size`
    pub initial_part_size: Option<u64>,
    /// Tracked part uploads before the writer waits on them
    pub max_in_flight: usize,
    pub options: UploadOptions,
}

impl SessionConfig {
    /// Configuration with S3 limits and default options
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            limits: PartLimits::default(),
            initial_part_size: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            options: UploadOptions::default(),
        }
    }

    pub fn with_limits(mut self, limits: PartLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_initial_part_size(mut self, size: u64) -> Self {
        self.initial_part_size = Some(size);
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_options(mut self, options: UploadOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), UploadError> {
        self.limits.validate()?;
        if self.max_in_flight == 0 {
            return Err(UploadError::InvalidConfig(
                "max_in_flight must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Result of a finished session
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub destination: Destination,
    pub upload_id: Option<String>,
    /// Object ETag; `None` when nothing was written and no object was created
    pub etag: Option<String>,
    pub location: Option<String>,
    pub parts: u32,
    pub bytes: u64,
}

impl UploadOutcome {
    /// Whether the stream was empty and no object was created
    pub fn is_empty(&self) -> bool {
        self.parts == 0
    }
}

/// Stops a session from dispatching new parts
///
/// Parts already in flight still run to completion.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Write-only multipart upload of one object
pub struct UploadSession {
    id: Uuid,
    sizer: PartSizer,
    buffer: Option<BytesMut>,
    bytes_written: u64,
    declared_length: u64,
    state: SessionState,
    failure: Option<String>,
    scheduler: UploadScheduler,
    cancelled: Arc<AtomicBool>,
}

impl UploadSession {
    /// Create a session; no backend call is made until the first part is dispatched
    pub fn new(
        backend: Arc<dyn MultipartBackend>,
        config: SessionConfig,
    ) -> Result<Self, UploadError> {
        Self::with_observers(backend, config, Vec::new())
    }

    /// Create a session that notifies `observers` of upload progress
    pub fn with_observers(
        backend: Arc<dyn MultipartBackend>,
        config: SessionConfig,
        observers: Vec<Arc<dyn UploadObserver>>,
    ) -> Result<Self, UploadError> {
        config.validate()?;

        let mut sinks = Observers::default();
        for observer in observers {
            sinks.push(observer);
        }

        let observer_count = sinks.len();
        let initial = config
            .initial_part_size
            .unwrap_or(config.limits.min_part_size);
        let sizer = PartSizer::new(config.limits, initial);
        let cancelled = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(SharedUpload::new(
            backend,
            config.destination,
            config.options,
            sinks,
        ));
        let scheduler = UploadScheduler::new(
            shared,
            config.max_in_flight,
            config.limits.max_part_count,
            Arc::clone(&cancelled),
        );

        let session = Self {
            id: Uuid::new_v4(),
            sizer,
            buffer: None,
            bytes_written: 0,
            declared_length: 0,
            state: SessionState::Idle,
            failure: None,
            scheduler,
            cancelled,
        };

        tracing::debug!(
            session_id = %session.id,
            destination = %session.destination(),
            part_target = session.sizer.target(),
            max_in_flight = config.max_in_flight,
            observers = observer_count,
            "Created upload session"
        );

        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn destination(&self) -> &Destination {
        &self.scheduler.shared().destination
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of parts dispatched so far
    pub fn part_count(&self) -> u32 {
        self.scheduler.part_count()
    }

    /// Target size of the part currently being filled
    pub fn part_target(&self) -> u64 {
        self.sizer.target()
    }

    /// Number of part uploads currently tracked
    pub fn in_flight(&self) -> usize {
        self.scheduler.in_flight()
    }

    /// Bytes sitting in the staging buffer
    pub fn buffered(&self) -> usize {
        self.buffer.as_ref().map_or(0, BytesMut::len)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Current position in the stream (bytes accepted so far)
    pub fn position(&self) -> u64 {
        self.bytes_written
    }

    /// Larger of the bytes written and the declared length hint
    pub fn length(&self) -> u64 {
        self.bytes_written.max(self.declared_length)
    }

    /// Backend upload id, once a part task has initiated the upload
    pub fn upload_id(&self) -> Option<&str> {
        self.scheduler.shared().initiated_upload_id()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancelled))
    }

    /// Declare the expected total length; raises the part target so the
    /// stream fits in the part ceiling. Returns the new part target.
    pub fn set_length_hint(&mut self, length: u64) -> u64 {
        self.declared_length = self.declared_length.max(length);
        let target = self.sizer.apply_length_hint(self.declared_length);

        tracing::debug!(
            session_id = %self.id,
            length = self.declared_length,
            part_target = target,
            "Applied length hint"
        );

        target
    }

    /// Append `data`, dispatching parts as they fill
    ///
    /// Only waits when the in-flight limit forces a barrier; a part failure
    /// observed during that wait is returned here.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, UploadError> {
        self.ensure_open("write")?;
        if data.is_empty() {
            return Ok(0);
        }

        let result = self.write_all(data).await;
        self.record_failure(result)?;
        Ok(data.len())
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), UploadError> {
        let mut remaining = data;

        while !remaining.is_empty() {
            let space = self.space_in_part().await?;
            let (chunk, rest) = remaining.split_at(remaining.len().min(space));

            if let Some(buffer) = self.buffer.as_mut() {
                buffer.extend_from_slice(chunk);
            }
            self.bytes_written += chunk.len() as u64;
            remaining = rest;
        }

        Ok(())
    }

    /// Bytes left in the current part, cutting a full part first
    async fn space_in_part(&mut self) -> Result<usize, UploadError> {
        let full = self
            .buffer
            .as_ref()
            .map_or(true, |buffer| buffer.len() as u64 >= self.sizer.target());

        if full {
            if let Some(buffer) = self.buffer.take() {
                self.dispatch(buffer, false).await?;
            }

            let target = self.sizer.open_part(self.scheduler.part_count() + 1);
            self.buffer = Some(BytesMut::with_capacity(
                target.min(MAX_PREALLOCATION) as usize,
            ));
            if self.state == SessionState::Idle {
                self.state = SessionState::Accumulating;
            }
        }

        let space = self.sizer.target() - self.buffered() as u64;
        Ok(usize::try_from(space).unwrap_or(usize::MAX))
    }

    async fn dispatch(&mut self, buffer: BytesMut, is_last: bool) -> Result<u32, UploadError> {
        let part_number = self.scheduler.dispatch(buffer.freeze(), is_last).await?;
        if matches!(
            self.state,
            SessionState::Idle | SessionState::Accumulating
        ) {
            self.state = SessionState::Uploading;
        }
        Ok(part_number)
    }

    /// Dispatch the current buffer if it has reached the minimum part size
    ///
    /// A smaller buffer is left untouched.
    pub async fn flush(&mut self) -> Result<(), UploadError> {
        self.ensure_open("flush")?;

        let min_part_size = self.sizer.limits().min_part_size;
        if (self.buffered() as u64) < min_part_size {
            return Ok(());
        }

        if let Some(buffer) = self.buffer.take() {
            let result = self.dispatch(buffer, false).await.map(|_| ());
            self.record_failure(result)?;
        }
        Ok(())
    }

    /// Pump `reader` into the session until end of stream
    pub async fn copy_from<R>(&mut self, reader: &mut R) -> Result<u64, UploadError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut chunk = vec![0u8; COPY_BUFFER_SIZE];
        let mut total = 0u64;

        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            self.write(&chunk[..n]).await?;
            total += n as u64;
        }

        Ok(total)
    }

    /// Upload the tail, drain in-flight parts and complete the object
    ///
    /// A session that never dispatched a part completes without any backend
    /// call. On failure the session stays in `Finalizing`; call `abort` to
    /// release the backend upload.
    #[tracing::instrument(
        name = "upload.session.finish",
        skip(self),
        fields(
            session_id = %self.id,
            destination = %self.destination(),
            parts = tracing::field::Empty,
            bytes = self.bytes_written
        ),
        err
    )]
    pub async fn finish(&mut self) -> Result<UploadOutcome, UploadError> {
        self.ensure_open("finish")?;
        self.state = SessionState::Finalizing;

        // the last part may be smaller than the minimum
        if let Some(buffer) = self.buffer.take().filter(|buffer| !buffer.is_empty()) {
            if let Err(e) = self.scheduler.dispatch(buffer.freeze(), true).await {
                self.drain_quietly().await;
                return Err(e);
            }
        }

        self.scheduler.wait_all().await?;

        let parts = self.scheduler.part_count();
        tracing::Span::current().record("parts", parts);

        let mut outcome = UploadOutcome {
            destination: self.destination().clone(),
            upload_id: None,
            etag: None,
            location: None,
            parts,
            bytes: self.bytes_written,
        };

        if parts == 0 {
            tracing::info!("Nothing written, no object created");
            self.state = SessionState::Completed;
            return Ok(outcome);
        }

        let result = CompletionCoordinator::new(self.scheduler.shared())
            .complete(parts, self.bytes_written)
            .await?;

        outcome.upload_id = self.upload_id().map(str::to_string);
        outcome.etag = Some(result.etag);
        outcome.location = result.location;
        self.state = SessionState::Completed;

        Ok(outcome)
    }

    /// Stop the upload and discard it on the backend
    ///
    /// In-flight parts are waited on first so no buffer is released while in
    /// use. Aborting an aborted session is a no-op.
    #[tracing::instrument(
        name = "upload.session.abort",
        skip(self),
        fields(session_id = %self.id, destination = %self.destination()),
        err
    )]
    pub async fn abort(&mut self) -> Result<(), UploadError> {
        match self.state {
            SessionState::Aborted => return Ok(()),
            SessionState::Completed => {
                return Err(UploadError::InvalidState {
                    operation: "abort",
                    state: self.state,
                })
            }
            _ => {}
        }

        self.cancelled.store(true, Ordering::SeqCst);
        self.buffer = None;
        self.drain_quietly().await;
        self.state = SessionState::Aborted;

        if !CompletionCoordinator::new(self.scheduler.shared())
            .abort()
            .await?
        {
            tracing::debug!("No upload was initiated, nothing to abort");
        }
        Ok(())
    }

    async fn drain_quietly(&mut self) {
        if let Err(e) = self.scheduler.wait_all().await {
            tracing::warn!(session_id = %self.id, error = %e, "Part failed while draining");
        }
    }

    fn ensure_open(&self, operation: &'static str) -> Result<(), UploadError> {
        match self.state {
            SessionState::Idle | SessionState::Accumulating | SessionState::Uploading => {}
            state => return Err(UploadError::InvalidState { operation, state }),
        }
        match &self.failure {
            Some(failure) => Err(UploadError::Poisoned(failure.clone())),
            None => Ok(()),
        }
    }

    fn record_failure<T>(&mut self, result: Result<T, UploadError>) -> Result<T, UploadError> {
        if let Err(e) = &result {
            tracing::error!(session_id = %self.id, error = %e, "Upload session failed");
            self.failure = Some(e.to_string());
        }
        result
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        if matches!(
            self.state,
            SessionState::Completed | SessionState::Aborted
        ) {
            return;
        }
        self.cancelled.store(true, Ordering::SeqCst);

        if self.scheduler.part_count() > 0 {
            tracing::warn!(
                session_id = %self.id,
                destination = %self.destination(),
                upload_id = ?self.upload_id(),
                parts = self.scheduler.part_count(),
                "Upload session dropped without finish or abort, multipart upload left incomplete"
            );
        }
    }
}

/// Copy `reader` into `session`, then finish it
///
/// Any failure aborts the upload and returns the original error; a failing
/// abort is only logged.
pub async fn upload_stream<R>(
    mut session: UploadSession,
    reader: &mut R,
) -> Result<UploadOutcome, UploadError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let result = match session.copy_from(reader).await {
        Ok(_) => session.finish().await,
        Err(e) => Err(e),
    };

    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            if let Err(abort_error) = session.abort().await {
                tracing::warn!(
                    error = %abort_error,
                    original = %e,
                    "Abort failed after upload error"
                );
            }
            Err(e)
        }
    }
}
