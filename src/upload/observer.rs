//! Upload notifications
//!
//! Observers are informational sinks. They are called from the writer and
//! from upload tasks and have no effect on control flow.

use super::backend::Destination;
use std::sync::Arc;

/// Emitted once the backend has assigned an upload id
#[derive(Debug, Clone)]
pub struct UploadInitiated {
    pub destination: Destination,
    pub upload_id: String,
}

/// Emitted after each part upload succeeds
#[derive(Debug, Clone)]
pub struct PartUploaded {
    pub destination: Destination,
    pub upload_id: String,
    pub part_number: u32,
    pub size: u64,
    pub etag: String,
}

/// Emitted after the backend confirms completion
#[derive(Debug, Clone)]
pub struct UploadCompleted {
    pub destination: Destination,
    pub upload_id: String,
    pub parts: u32,
    pub bytes: u64,
    pub etag: String,
}

/// Notification sink for upload progress
pub trait UploadObserver: Send + Sync {
    fn upload_initiated(&self, _event: &UploadInitiated) {}

    fn part_uploaded(&self, _event: &PartUploaded) {}

    fn upload_completed(&self, _event: &UploadCompleted) {}
}

/// Fan-out over every registered observer
#[derive(Clone, Default)]
pub(crate) struct Observers(Vec<Arc<dyn UploadObserver>>);

impl Observers {
    pub(crate) fn push(&mut self, observer: Arc<dyn UploadObserver>) {
        self.0.push(observer);
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

impl UploadObserver for Observers {
    fn upload_initiated(&self, event: &UploadInitiated) {
        self.0.iter().for_each(|o| o.upload_initiated(event));
    }

    fn part_uploaded(&self, event: &PartUploaded) {
        self.0.iter().for_each(|o| o.part_uploaded(event));
    }

    fn upload_completed(&self, event: &UploadCompleted) {
        self.0.iter().for_each(|o| o.upload_completed(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        parts: AtomicUsize,
    }

    impl UploadObserver for Counting {
        fn part_uploaded(&self, _event: &PartUploaded) {
            self.parts.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_fan_out() {
        let a = Arc::new(Counting::default());
        let b = Arc::new(Counting::default());
        let mut observers = Observers::default();
        observers.push(a.clone());
        observers.push(b.clone());
        assert_eq!(observers.len(), 2);

        let event = PartUploaded {
            destination: Destination::new("bucket", "key"),
            upload_id: "upload".into(),
            part_number: 1,
            size: 10,
            etag: "\"etag\"".into(),
        };
        observers.part_uploaded(&event);
        // default methods are no-ops
        observers.upload_completed(&UploadCompleted {
            destination: event.destination.clone(),
            upload_id: "upload".into(),
            parts: 1,
            bytes: 10,
            etag: "\"etag\"".into(),
        });

        assert_eq!(a.parts.load(Ordering::SeqCst), 1);
        assert_eq!(b.parts.load(Ordering::SeqCst), 1);
    }
}
