//! The contract every upload provider implements.
//!
//! The engine never looks inside a [`Task`]: it validates settings at
//! creation time, and later hands the task an [`UploadRequest`] plus a
//! [`LogSink`] inside an isolated worker.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CoreError;
use crate::job::JobRecord;
use crate::types::{JobId, Settings};

/// Failure of a task's own upload logic.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload was cancelled")]
    Cancelled,

    /// The worker went away without reporting an outcome.
    #[error("worker aborted: {0}")]
    Aborted(String),
}

/// Everything a task needs to perform one upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub job_id: JobId,
    pub image_name: String,
    pub image_path: PathBuf,
    pub settings: Settings,
}

impl UploadRequest {
    /// Build the request for a job that has its image.
    pub fn from_record(record: &JobRecord) -> Result<Self, CoreError> {
        let image_path = record.artifact_path().ok_or_else(|| {
            CoreError::Validation(format!("Upload {} has no image yet", record.id()))
        })?;
        Ok(Self {
            job_id: record.id(),
            image_name: record.image_name().to_string(),
            image_path: image_path.to_path_buf(),
            settings: record.settings().clone(),
        })
    }
}

/// Ordered, append-only destination for a running task's log lines.
///
/// Cloning is cheap; all clones feed the same receiver, which the worker
/// pool drains into the job record.
#[derive(Debug, Clone)]
pub struct LogSink {
    job_id: JobId,
    tx: mpsc::UnboundedSender<String>,
}

impl LogSink {
    pub fn channel(job_id: JobId) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { job_id, tx }, rx)
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Append a message. Multi-line messages become one entry per line.
    pub fn line(&self, message: impl fmt::Display) {
        for line in message.to_string().lines() {
            tracing::info!(job_id = %self.job_id, "{line}");
            // The receiver only goes away once the job is no longer tracked.
            let _ = self.tx.send(line.to_string());
        }
    }
}

/// One cloud provider's upload logic.
#[async_trait]
pub trait Task: Send + Sync {
    /// Static identifier, also the tag stored in job records.
    fn provider_name(&self) -> &str;

    /// Reject settings this provider cannot work with. Called at creation
    /// and reset time.
    fn validate_settings(&self, settings: &Settings) -> Result<(), CoreError>;

    /// Perform the upload. Must tolerate being interrupted at any point.
    async fn run(&self, request: &UploadRequest, log: &LogSink) -> Result<(), TaskError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn sink_splits_multi_line_messages_in_order() {
        let (sink, mut rx) = LogSink::channel(uuid::Uuid::new_v4());
        sink.line("first");
        sink.line("second\nthird");
        drop(sink);

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        assert_eq!(lines, ["first", "second", "third"]);
    }

    #[test]
    fn sink_survives_dropped_receiver() {
        let (sink, rx) = LogSink::channel(uuid::Uuid::new_v4());
        drop(rx);
        sink.line("nobody listening");
    }

    #[test]
    fn request_requires_artifact() {
        let record = JobRecord::new("dummy", "img", Settings::new());
        assert_matches!(UploadRequest::from_record(&record), Err(CoreError::Validation(_)));
    }

    #[test]
    fn request_copies_record_fields() {
        let mut record = JobRecord::new("dummy", "img", Settings::new());
        record.mark_ready("/tmp/x.img").unwrap();
        let request = UploadRequest::from_record(&record).unwrap();
        assert_eq!(request.job_id, record.id());
        assert_eq!(request.image_name, "img");
        assert_eq!(request.image_path, PathBuf::from("/tmp/x.img"));
    }
}
