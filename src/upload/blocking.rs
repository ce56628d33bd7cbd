//! Synchronous writer over an upload session
//!
//! Lets code written against `std::io::Write` (encoders, `io::copy`, CSV
//! writers) feed an upload session. Each call blocks on the runtime handle, so
//! the writer must be driven from a thread that is not a runtime worker, such
//! as one started with `tokio::task::spawn_blocking`.

use super::session::{UploadOutcome, UploadSession};
use super::UploadError;
use std::io;
use tokio::runtime::Handle;

pub struct BlockingUploadWriter {
    session: UploadSession,
    handle: Handle,
}

impl BlockingUploadWriter {
    /// Wrap `session`, driving it on `handle`
    pub fn new(session: UploadSession, handle: Handle) -> Self {
        Self { session, handle }
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    /// Finish the upload; on failure the upload is aborted and the original
    /// error returned
    pub fn close(self) -> Result<UploadOutcome, UploadError> {
        let Self {
            mut session,
            handle,
        } = self;

        handle.block_on(async move {
            match session.finish().await {
                Ok(outcome) => Ok(outcome),
                Err(e) => {
                    if let Err(abort_error) = session.abort().await {
                        tracing::warn!(error = %abort_error, "Abort failed after finish error");
                    }
                    Err(e)
                }
            }
        })
    }

    /// Abort the upload
    pub fn abort(self) -> Result<(), UploadError> {
        let Self {
            mut session,
            handle,
        } = self;
        handle.block_on(session.abort())
    }
}

impl io::Write for BlockingUploadWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.handle
            .block_on(self.session.write(buf))
            .map_err(io::Error::other)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.handle
            .block_on(self.session.flush())
            .map_err(io::Error::other)
    }
}
