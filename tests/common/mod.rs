//! Shared test helpers
//!
//! `FaultyBackend` wraps the in-memory backend and can fail or delay
//! individual operations, count calls and track part upload concurrency.

#![allow(dead_code)]

use async_trait::async_trait;
use mizuchi_stream::upload::{
    BackendError, CompletedPart, Destination, MemoryBackend, MultipartBackend, PartRequest,
    UploadOptions, UploadResult,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const KB: u64 = 1024;
pub const MB: u64 = 1024 * 1024;

#[derive(Default)]
pub struct Calls {
    pub initiate: AtomicUsize,
    pub upload_part: AtomicUsize,
    pub complete: AtomicUsize,
    pub abort: AtomicUsize,
}

impl Calls {
    pub fn initiate(&self) -> usize {
        self.initiate.load(Ordering::SeqCst)
    }

    pub fn upload_part(&self) -> usize {
        self.upload_part.load(Ordering::SeqCst)
    }

    pub fn complete(&self) -> usize {
        self.complete.load(Ordering::SeqCst)
    }

    pub fn abort(&self) -> usize {
        self.abort.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FaultyBackend {
    pub inner: MemoryBackend,
    pub calls: Calls,
    fail_initiate: Mutex<bool>,
    fail_parts: Mutex<HashSet<u32>>,
    fail_complete: Mutex<bool>,
    fail_abort: Mutex<bool>,
    part_delay: Mutex<Option<Duration>>,
    active_parts: AtomicUsize,
    peak_parts: AtomicUsize,
    part_sizes: Mutex<Vec<(u32, u64)>>,
    last_flags: Mutex<Vec<(u32, bool)>>,
    checksums: Mutex<Vec<Option<String>>>,
}

impl FaultyBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_initiate(&self) {
        *self.fail_initiate.lock() = true;
    }

    pub fn fail_part(&self, part_number: u32) {
        self.fail_parts.lock().insert(part_number);
    }

    pub fn fail_complete(&self) {
        *self.fail_complete.lock() = true;
    }

    pub fn fail_abort(&self) {
        *self.fail_abort.lock() = true;
    }

    pub fn delay_parts(&self, delay: Duration) {
        *self.part_delay.lock() = Some(delay);
    }

    /// Highest number of part uploads observed running at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak_parts.load(Ordering::SeqCst)
    }

    /// Sizes of uploaded parts ordered by part number
    pub fn part_sizes(&self) -> Vec<u64> {
        let mut sizes = self.part_sizes.lock().clone();
        sizes.sort_by_key(|(number, _)| *number);
        sizes.into_iter().map(|(_, size)| size).collect()
    }

    /// Checksums received with each part, in arrival order
    pub fn checksums(&self) -> Vec<Option<String>> {
        self.checksums.lock().clone()
    }

    /// Part numbers that were flagged as the last part
    pub fn last_parts(&self) -> Vec<u32> {
        self.last_flags
            .lock()
            .iter()
            .filter(|(_, is_last)| *is_last)
            .map(|(number, _)| *number)
            .collect()
    }
}

#[async_trait]
impl MultipartBackend for FaultyBackend {
    async fn initiate(
        &self,
        destination: &Destination,
        options: &UploadOptions,
    ) -> Result<String, BackendError> {
        self.calls.initiate.fetch_add(1, Ordering::SeqCst);
        if *self.fail_initiate.lock() {
            return Err(BackendError::Other("initiate refused".into()));
        }
        self.inner.initiate(destination, options).await
    }

    async fn upload_part(&self, request: PartRequest) -> Result<CompletedPart, BackendError> {
        self.calls.upload_part.fetch_add(1, Ordering::SeqCst);
        let active = self.active_parts.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_parts.fetch_max(active, Ordering::SeqCst);

        let delay = *self.part_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let part_number = request.part_number;
        let rejected = self.fail_parts.lock().contains(&part_number);
        let result = if rejected {
            Err(BackendError::Other(format!("part {} rejected", part_number)))
        } else {
            self.part_sizes
                .lock()
                .push((part_number, request.body.len() as u64));
            self.last_flags.lock().push((part_number, request.is_last));
            self.checksums.lock().push(request.checksum.clone());
            self.inner.upload_part(request).await
        };

        self.active_parts.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn complete(
        &self,
        destination: &Destination,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<UploadResult, BackendError> {
        self.calls.complete.fetch_add(1, Ordering::SeqCst);
        if *self.fail_complete.lock() {
            return Err(BackendError::Other("complete refused".into()));
        }
        self.inner.complete(destination, upload_id, parts).await
    }

    async fn abort(&self, destination: &Destination, upload_id: &str) -> Result<(), BackendError> {
        self.calls.abort.fetch_add(1, Ordering::SeqCst);
        if *self.fail_abort.lock() {
            return Err(BackendError::Other("abort refused".into()));
        }
        self.inner.abort(destination, upload_id).await
    }
}
