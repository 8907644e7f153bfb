//! Exam uploads that survive flaky networks and restarts.
//!
//! - `UploadQueue`: persisted jobs under `uploads/`, one JSON file each,
//!   retried with exponential backoff while the failure is transient
//! - `ExamUploader`: the single-attempt upload the queue drives

pub mod queue;

pub use queue::{
    ExamUploader, UploadJob, UploadQueue, UploadRun, UploadState, MAX_UPLOAD_ATTEMPTS,
};
