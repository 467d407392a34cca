//! The persisted upload job record and its transitions.
//!
//! Every transition method checks its precondition first and leaves the
//! record untouched when it fails, so a caller can apply a transition to a
//! copy, persist the copy, and only then treat the transition as done.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::status::JobStatus;
use crate::types::{JobId, Settings, Timestamp};

/// Error recorded on jobs found RUNNING when the engine starts.
pub const ABANDONED_ERROR: &str = "upload was abandoned: worker did not survive a restart";

/// Identifies the execution context running a job so it can be signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerHandle {
    /// A child OS process (and its process group).
    Process { pid: u32 },
    /// A task inside the engine process, stopped through its token.
    Local { slot: u64 },
}

impl fmt::Display for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process { pid } => write!(f, "process {pid}"),
            Self::Local { slot } => write!(f, "local worker {slot}"),
        }
    }
}

/// One upload job as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    id: JobId,
    provider: String,
    image_name: String,
    status: JobStatus,
    created_at: Timestamp,
    updated_at: Timestamp,
    #[serde(default)]
    artifact_path: Option<PathBuf>,
    #[serde(default)]
    log: Vec<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    worker: Option<WorkerHandle>,
    #[serde(default)]
    settings: Settings,
}

/// Caller-facing view of a job: everything except settings and log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub provider: String,
    pub image_name: String,
    pub artifact_path: Option<PathBuf>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub error: Option<String>,
}

impl JobRecord {
    /// Create a WAITING job. Settings are expected to be validated by the
    /// provider before this is called.
    pub fn new(provider: impl Into<String>, image_name: impl Into<String>, settings: Settings) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4(),
            provider: provider.into(),
            image_name: image_name.into(),
            status: JobStatus::Waiting,
            created_at: now,
            updated_at: now,
            artifact_path: None,
            log: Vec::new(),
            error: None,
            worker: None,
            settings,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact_path.as_deref()
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn worker(&self) -> Option<WorkerHandle> {
        self.worker
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            status: self.status,
            provider: self.provider.clone(),
            image_name: self.image_name.clone(),
            artifact_path: self.artifact_path.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            error: self.error.clone(),
        }
    }

    /// Append one line to the job log. The log is never truncated.
    pub fn append_log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
        self.touch();
    }

    /// WAITING -> READY once the image to upload is known.
    pub fn mark_ready(&mut self, artifact_path: impl Into<PathBuf>) -> Result<(), CoreError> {
        let artifact_path = artifact_path.into();
        if artifact_path.as_os_str().is_empty() {
            return Err(CoreError::Validation("Image path cannot be empty".to_string()));
        }
        if self.artifact_path.is_some() {
            return Err(CoreError::Validation(format!(
                "Upload {} already has an image",
                self.id
            )));
        }
        self.check(JobStatus::Ready, "ready")?;

        let line = format!("Marked ready: {}", artifact_path.display());
        self.artifact_path = Some(artifact_path);
        self.enter(JobStatus::Ready, line);
        Ok(())
    }

    /// READY -> RUNNING, owned by `handle`.
    pub fn start(&mut self, handle: WorkerHandle) -> Result<(), CoreError> {
        self.check(JobStatus::Running, "start")?;
        self.worker = Some(handle);
        self.enter(JobStatus::Running, format!("Started by {handle}"));
        Ok(())
    }

    /// RUNNING -> FINISHED.
    pub fn finish(&mut self) -> Result<(), CoreError> {
        self.check(JobStatus::Finished, "finish")?;
        self.worker = None;
        self.error = None;
        self.enter(JobStatus::Finished, "Upload finished.".to_string());
        Ok(())
    }

    /// RUNNING -> FAILED with a human-readable reason.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        self.check(JobStatus::Failed, "fail")?;
        let error = error.into();
        self.worker = None;
        self.enter(JobStatus::Failed, format!("Upload failed: {error}"));
        self.error = Some(error);
        Ok(())
    }

    /// RUNNING -> FAILED for a job no live worker can own any more.
    pub fn abandon(&mut self) -> Result<(), CoreError> {
        if self.status != JobStatus::Running {
            return Err(self.invalid("abandon"));
        }
        self.worker = None;
        self.error = Some(ABANDONED_ERROR.to_string());
        self.enter(JobStatus::Failed, "Abandoned on restart.".to_string());
        Ok(())
    }

    /// Any non-terminal status -> CANCELLED.
    ///
    /// Returns the handle of the worker that was running the job, if any,
    /// so the caller can signal it.
    pub fn cancel(&mut self) -> Result<Option<WorkerHandle>, CoreError> {
        self.check(JobStatus::Cancelled, "cancel")?;
        let handle = self.worker.take();
        self.enter(JobStatus::Cancelled, "Cancelled.".to_string());
        Ok(handle)
    }

    /// Terminal status -> READY so the upload is attempted again.
    ///
    /// `image_name` and `settings` replace the stored values when given;
    /// they must already be validated against the provider.
    pub fn reset(
        &mut self,
        image_name: Option<String>,
        settings: Option<Settings>,
    ) -> Result<(), CoreError> {
        self.check(JobStatus::Ready, "reset")?;
        if self.artifact_path.is_none() {
            return Err(CoreError::Validation(format!(
                "Cannot reset upload {}: no image supplied yet",
                self.id
            )));
        }
        if let Some(name) = image_name {
            if name.trim().is_empty() {
                return Err(CoreError::Validation("Image name cannot be empty".to_string()));
            }
            self.image_name = name;
        }
        if let Some(settings) = settings {
            self.settings = settings;
        }
        self.error = None;
        self.worker = None;
        self.enter(JobStatus::Ready, "Resetting...".to_string());
        Ok(())
    }

    fn check(&self, next: JobStatus, action: &'static str) -> Result<(), CoreError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &'static str) -> CoreError {
        CoreError::InvalidTransition {
            id: self.id,
            status: self.status,
            action,
        }
    }

    fn enter(&mut self, status: JobStatus, line: String) {
        self.status = status;
        self.append_log(line);
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn waiting() -> JobRecord {
        JobRecord::new("dummy", "my-image", Settings::new())
    }

    fn running() -> JobRecord {
        let mut job = waiting();
        job.mark_ready("/tmp/x.img").unwrap();
        job.start(WorkerHandle::Local { slot: 1 }).unwrap();
        job
    }

    #[test]
    fn new_job_is_waiting_without_artifact() {
        let job = waiting();
        assert_eq!(job.status(), JobStatus::Waiting);
        assert!(job.artifact_path().is_none());
        assert!(job.error().is_none());
        assert!(job.worker().is_none());
        assert_eq!(job.created_at(), job.updated_at());
    }

    #[test]
    fn happy_path_logs_every_transition() {
        let mut job = running();
        job.finish().unwrap();
        assert_eq!(job.status(), JobStatus::Finished);
        assert!(job.worker().is_none());
        assert_eq!(
            job.log(),
            [
                "Marked ready: /tmp/x.img",
                "Started by local worker 1",
                "Upload finished."
            ]
        );
    }

    #[test]
    fn ready_rejects_empty_path() {
        let mut job = waiting();
        assert_matches!(job.mark_ready(""), Err(CoreError::Validation(_)));
        assert_eq!(job.status(), JobStatus::Waiting);
        assert!(job.log().is_empty());
    }

    #[test]
    fn ready_twice_is_rejected() {
        let mut job = waiting();
        job.mark_ready("/tmp/x.img").unwrap();
        assert_matches!(job.mark_ready("/tmp/y.img"), Err(CoreError::Validation(_)));
        assert_eq!(job.artifact_path(), Some(Path::new("/tmp/x.img")));
    }

    #[test]
    fn waiting_job_cannot_start() {
        let mut job = waiting();
        assert_matches!(
            job.start(WorkerHandle::Process { pid: 10 }),
            Err(CoreError::InvalidTransition { action: "start", status: JobStatus::Waiting, .. })
        );
        assert!(job.worker().is_none());
    }

    #[test]
    fn fail_records_error_and_clears_worker() {
        let mut job = running();
        job.fail("bucket missing").unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error(), Some("bucket missing"));
        assert!(job.worker().is_none());
        assert_eq!(job.log().last().map(String::as_str), Some("Upload failed: bucket missing"));
    }

    #[test]
    fn cancel_returns_running_worker_handle() {
        let mut job = running();
        let handle = job.cancel().unwrap();
        assert_eq!(handle, Some(WorkerHandle::Local { slot: 1 }));
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert!(job.worker().is_none());
    }

    #[test]
    fn cancel_waiting_job_has_no_handle() {
        let mut job = waiting();
        assert_eq!(job.cancel().unwrap(), None);
        assert_eq!(job.status(), JobStatus::Cancelled);
    }

    #[test]
    fn cancelling_twice_fails_without_mutation() {
        let mut job = waiting();
        job.cancel().unwrap();
        let log_len = job.log().len();
        assert_matches!(job.cancel(), Err(CoreError::InvalidTransition { .. }));
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert_eq!(job.log().len(), log_len);
    }

    #[test]
    fn abandon_only_applies_to_running_jobs() {
        let mut ready = waiting();
        ready.mark_ready("/tmp/x.img").unwrap();
        assert_matches!(ready.abandon(), Err(CoreError::InvalidTransition { .. }));

        let mut job = running();
        job.abandon().unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error(), Some(ABANDONED_ERROR));
        assert!(job.worker().is_none());
    }

    #[test]
    fn reset_requires_terminal_status() {
        let mut job = running();
        assert_matches!(
            job.reset(None, None),
            Err(CoreError::InvalidTransition { action: "reset", .. })
        );
        assert_eq!(job.status(), JobStatus::Running);
    }

    #[test]
    fn reset_requires_artifact() {
        let mut job = waiting();
        job.cancel().unwrap();
        assert_matches!(job.reset(None, None), Err(CoreError::Validation(_)));
        assert_eq!(job.status(), JobStatus::Cancelled);
    }

    #[test]
    fn reset_clears_error_and_replaces_values() {
        let mut job = running();
        job.fail("boom").unwrap();

        let mut settings = Settings::new();
        settings.insert("region".into(), "eu-west-1".into());
        job.reset(Some("renamed".into()), Some(settings.clone())).unwrap();

        assert_eq!(job.status(), JobStatus::Ready);
        assert!(job.error().is_none());
        assert_eq!(job.image_name(), "renamed");
        assert_eq!(job.settings(), &settings);
        assert_eq!(job.log().last().map(String::as_str), Some("Resetting..."));
    }

    #[test]
    fn reset_rejects_empty_image_name() {
        let mut job = running();
        job.finish().unwrap();
        assert_matches!(job.reset(Some(String::new()), None), Err(CoreError::Validation(_)));
        assert_matches!(job.reset(Some(" \t ".into()), None), Err(CoreError::Validation(_)));
        assert_eq!(job.status(), JobStatus::Finished);
        assert_eq!(job.image_name(), "my-image");
    }

    #[test]
    fn worker_handle_is_tagged_in_json() {
        let job = running();
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "RUNNING");
        assert_eq!(json["worker"]["kind"], "local");
        assert_eq!(json["worker"]["slot"], 1);
    }

    #[test]
    fn summary_omits_settings_and_log() {
        let mut settings = Settings::new();
        settings.insert("secret_key".into(), "hunter2".into());
        let job = JobRecord::new("dummy", "img", settings);
        let json = serde_json::to_value(job.summary()).unwrap();
        assert!(json.get("settings").is_none());
        assert!(json.get("log").is_none());
        assert_eq!(json["provider"], "dummy");
    }
}
