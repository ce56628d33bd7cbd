//! Metrics module
//!
//! Prometheus counters and histograms for multipart uploads, fed by
//! [`MetricsObserver`] and rendered in the text exposition format.

use crate::upload::{PartUploaded, UploadCompleted, UploadInitiated, UploadObserver};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};

lazy_static! {
    pub static ref UPLOADS_INITIATED: CounterVec = register_counter_vec!(
        "mizuchi_multipart_uploads_initiated_total",
        "Multipart uploads initiated",
        &["bucket"]
    ).unwrap();

    pub static ref UPLOADS_FINISHED: CounterVec = register_counter_vec!(
        "mizuchi_multipart_uploads_total",
        "Finished multipart uploads by status",
        &["bucket", "status"]
    ).unwrap();

    pub static ref PARTS_UPLOADED: CounterVec = register_counter_vec!(
        "mizuchi_parts_uploaded_total",
        "Parts uploaded",
        &["bucket"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "mizuchi_upload_bytes_total",
        "Total bytes uploaded in parts"
    ).unwrap();

    // 1MiB to 4GiB
    pub static ref PART_SIZE_BYTES: Histogram = register_histogram!(
        "mizuchi_part_size_bytes",
        "Size of uploaded parts in bytes",
        prometheus::exponential_buckets(1_048_576.0, 4.0, 12).unwrap()
    ).unwrap();

    pub static ref MULTIPART_PARTS: Histogram = register_histogram!(
        "mizuchi_multipart_parts",
        "Number of parts per completed multipart upload",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 10000.0]
    ).unwrap();
}

/// Record a failed upload
pub fn record_upload_failure(bucket: &str) {
    UPLOADS_FINISHED.with_label_values(&[bucket, "failure"]).inc();
}

/// Upload observer that records Prometheus metrics
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl UploadObserver for MetricsObserver {
    fn upload_initiated(&self, event: &UploadInitiated) {
        UPLOADS_INITIATED
            .with_label_values(&[event.destination.bucket.as_str()])
            .inc();
    }

    fn part_uploaded(&self, event: &PartUploaded) {
        PARTS_UPLOADED
            .with_label_values(&[event.destination.bucket.as_str()])
            .inc();
        UPLOAD_BYTES_TOTAL.inc_by(event.size as f64);
        PART_SIZE_BYTES.observe(event.size as f64);
    }

    fn upload_completed(&self, event: &UploadCompleted) {
        UPLOADS_FINISHED
            .with_label_values(&[event.destination.bucket.as_str(), "success"])
            .inc();
        MULTIPART_PARTS.observe(f64::from(event.parts));
    }
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
