//! Queue management operations.
//!
//! [`UploadQueue`] is what callers hold. Each operation maps to one
//! transition of the job lifecycle, checks its precondition against the
//! persisted record, and persists the result before returning.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lifted_core::{
    CoreError, JobId, JobRecord, JobStatus, JobSummary, ProviderRegistry, Settings,
};
use lifted_store::JobStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::JobDispatcher;
use crate::error::EngineError;
use crate::executor::Executor;
use crate::pool::WorkerPool;
use crate::supervisor;

#[derive(Clone)]
pub struct UploadQueue {
    store: Arc<JobStore>,
    registry: ProviderRegistry,
    pool: WorkerPool,
    poll_interval: Duration,
}

impl UploadQueue {
    pub fn new(
        store: JobStore,
        registry: ProviderRegistry,
        executor: Arc<dyn Executor>,
        max_concurrent_uploads: usize,
        poll_interval: Duration,
    ) -> Self {
        let store = Arc::new(store);
        let pool = WorkerPool::new(Arc::clone(&store), executor, max_concurrent_uploads);
        Self {
            store,
            registry,
            pool,
            poll_interval,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// A dispatcher bound to this queue's store and pool.
    pub fn dispatcher(&self) -> JobDispatcher {
        JobDispatcher::new(Arc::clone(&self.store), self.pool.clone())
            .with_poll_interval(self.poll_interval)
    }

    /// Create a WAITING upload after validating its settings.
    pub fn create(
        &self,
        provider: &str,
        image_name: &str,
        settings: Settings,
    ) -> Result<JobId, EngineError> {
        let task = self.registry.get(provider)?;
        if image_name.trim().is_empty() {
            return Err(CoreError::Validation("Image name cannot be empty".into()).into());
        }
        task.validate_settings(&settings)?;

        let record = JobRecord::new(task.provider_name(), image_name, settings);
        self.store.put(&record)?;
        tracing::info!(job_id = %record.id(), provider, image_name, "Upload created");
        Ok(record.id())
    }

    /// Supply the image and move the upload to READY.
    pub fn ready(&self, id: JobId, image_path: impl Into<PathBuf>) -> Result<JobSummary, EngineError> {
        let image_path = image_path.into();
        let record = self.store.update(id, |r| r.mark_ready(image_path))?;
        tracing::info!(job_id = %id, "Upload ready");
        Ok(record.summary())
    }

    /// All uploads, oldest first. Unreadable records are left out.
    pub fn list(&self) -> Result<Vec<JobSummary>, EngineError> {
        let mut records = self.store.load_all()?;
        records.sort_by_key(JobRecord::created_at);
        Ok(records.iter().map(JobRecord::summary).collect())
    }

    pub fn summary(&self, id: JobId) -> Result<JobSummary, EngineError> {
        Ok(self.store.get(id)?.summary())
    }

    pub fn log(&self, id: JobId) -> Result<Vec<String>, EngineError> {
        Ok(self.store.get(id)?.log().to_vec())
    }

    /// Cancel a WAITING, READY or RUNNING upload.
    ///
    /// A running worker is signalled before CANCELLED is persisted; whether
    /// the signal arrives does not change the outcome. Cancelling an upload
    /// that already ended fails without touching it.
    pub fn cancel(&self, id: JobId) -> Result<JobSummary, EngineError> {
        let executor = self.pool.executor();
        let record = self.store.update(id, |r| {
            if let Some(handle) = r.cancel()? {
                tracing::info!(job_id = %id, worker = %handle, "Stopping upload worker");
                executor.request_stop(handle);
            }
            Ok(())
        })?;
        tracing::info!(job_id = %id, "Upload cancelled");
        Ok(record.summary())
    }

    /// Move an ended upload back to READY, optionally with a new image name
    /// or new settings. Empty settings keep the stored ones.
    pub fn reset(
        &self,
        id: JobId,
        image_name: Option<String>,
        settings: Option<Settings>,
    ) -> Result<JobSummary, EngineError> {
        if self.pool.is_claimed(id) {
            return Err(EngineError::Conflict(format!(
                "Cannot reset upload {id}: its worker is still stopping"
            )));
        }

        let settings = settings.filter(|s| !s.is_empty());
        let current = self.store.get(id)?;
        let task = self.registry.get(current.provider())?;
        task.validate_settings(settings.as_ref().unwrap_or(current.settings()))?;

        let record = self.store.update(id, |r| r.reset(image_name, settings))?;
        tracing::info!(job_id = %id, "Upload reset");
        Ok(record.summary())
    }

    /// Remove an upload that is not RUNNING.
    pub fn delete(&self, id: JobId) -> Result<(), EngineError> {
        self.store.delete_if(id, |r| {
            if r.status() == JobStatus::Running {
                return Err(EngineError::Conflict(format!(
                    "Cannot delete upload {id} while it is running; cancel it first"
                )));
            }
            Ok(())
        })?;
        tracing::info!(job_id = %id, "Upload deleted");
        Ok(())
    }

    /// Recover abandoned uploads, then start dispatching in the background.
    pub fn start(&self) -> Result<EngineHandle, EngineError> {
        supervisor::recover(&self.store)?;

        let dispatcher = self.dispatcher();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { dispatcher.run(token).await });
        Ok(EngineHandle { cancel, task })
    }
}

/// A running dispatcher.
pub struct EngineHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Stop dispatching and wait for the loop to exit.
    ///
    /// Uploads already running are not waited for; if the process exits
    /// they are recovered as abandoned on the next start.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Upload dispatcher task failed");
        }
    }
}
