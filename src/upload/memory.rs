//! In-memory multipart backend
//!
//! Keeps pending uploads and finished objects in process memory. Useful for
//! tests, dry runs and benchmarks.

use super::backend::{
    BackendError, CompletedPart, Destination, MultipartBackend, PartRequest, UploadOptions,
    UploadResult,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

struct PendingUpload {
    destination: Destination,
    options: UploadOptions,
    parts: BTreeMap<u32, StoredPart>,
}

struct StoredPart {
    etag: String,
    body: Bytes,
}

/// A finished object
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub etag: String,
    pub part_sizes: Vec<u64>,
    pub options: UploadOptions,
}

/// Multipart backend backed by process memory
#[derive(Default)]
pub struct MemoryBackend {
    next_id: AtomicU64,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    objects: Mutex<HashMap<Destination, StoredObject>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finished object at `destination`
    pub fn object(&self, destination: &Destination) -> Option<StoredObject> {
        self.objects.lock().get(destination).cloned()
    }

    /// Number of uploads initiated but neither completed nor aborted
    pub fn pending_uploads(&self) -> usize {
        self.uploads.lock().len()
    }

    /// Sizes of the parts received so far for a pending upload
    pub fn pending_part_sizes(&self, upload_id: &str) -> Option<Vec<u64>> {
        self.uploads
            .lock()
            .get(upload_id)
            .map(|upload| upload.parts.values().map(|p| p.body.len() as u64).collect())
    }
}

fn part_etag(body: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(body));
    format!("\"{}\"", &digest[..32])
}

#[async_trait]
impl MultipartBackend for MemoryBackend {
    async fn initiate(
        &self,
        destination: &Destination,
        options: &UploadOptions,
    ) -> Result<String, BackendError> {
        let upload_id = format!("upload-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.uploads.lock().insert(
            upload_id.clone(),
            PendingUpload {
                destination: destination.clone(),
                options: options.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(&self, request: PartRequest) -> Result<CompletedPart, BackendError> {
        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get_mut(&request.upload_id)
            .ok_or_else(|| BackendError::UnknownUpload(request.upload_id.clone()))?;

        if upload.destination != request.destination {
            return Err(BackendError::Other(format!(
                "part for {} sent to upload of {}",
                request.destination, upload.destination
            )));
        }

        let etag = part_etag(&request.body);
        upload.parts.insert(
            request.part_number,
            StoredPart {
                etag: etag.clone(),
                body: request.body,
            },
        );

        Ok(CompletedPart {
            part_number: request.part_number,
            etag,
            checksum: request.checksum,
        })
    }

    async fn complete(
        &self,
        destination: &Destination,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<UploadResult, BackendError> {
        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get(upload_id)
            .ok_or_else(|| BackendError::UnknownUpload(upload_id.to_string()))?;

        if parts.is_empty() {
            return Err(BackendError::InvalidPartList("no parts".into()));
        }

        let mut previous = 0;
        let mut body = BytesMut::new();
        let mut part_sizes = Vec::with_capacity(parts.len());
        let mut hasher = Sha256::new();

        for part in parts {
            if part.part_number <= previous {
                return Err(BackendError::InvalidPartList(format!(
                    "part {} is out of order",
                    part.part_number
                )));
            }
            previous = part.part_number;

            let stored = upload.parts.get(&part.part_number).ok_or_else(|| {
                BackendError::InvalidPartList(format!("part {} was never uploaded", part.part_number))
            })?;
            if stored.etag != part.etag {
                return Err(BackendError::InvalidPartList(format!(
                    "etag mismatch for part {}",
                    part.part_number
                )));
            }

            body.extend_from_slice(&stored.body);
            part_sizes.push(stored.body.len() as u64);
            hasher.update(stored.etag.as_bytes());
        }

        let etag = format!(
            "\"{}-{}\"",
            &hex::encode(hasher.finalize())[..32],
            parts.len()
        );

        let upload = uploads
            .remove(upload_id)
            .ok_or_else(|| BackendError::UnknownUpload(upload_id.to_string()))?;
        self.objects.lock().insert(
            destination.clone(),
            StoredObject {
                body: body.freeze(),
                etag: etag.clone(),
                part_sizes,
                options: upload.options,
            },
        );

        Ok(UploadResult {
            etag,
            location: Some(destination.to_string()),
        })
    }

    async fn abort(&self, _destination: &Destination, upload_id: &str) -> Result<(), BackendError> {
        self.uploads
            .lock()
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| BackendError::UnknownUpload(upload_id.to_string()))
    }
}
