//! Upload dispatcher.
//!
//! Polls the queue directory every `poll_interval` and hands READY uploads
//! to the [`WorkerPool`], oldest first. The pool's claimed set keeps a job
//! from being submitted twice while it runs.

use std::sync::Arc;
use std::time::Duration;

use lifted_core::{JobRecord, JobStatus};
use lifted_store::JobStore;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::pool::WorkerPool;

/// Default polling interval for the dispatcher loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A single long-lived loop matching READY uploads with free worker slots.
pub struct JobDispatcher {
    store: Arc<JobStore>,
    pool: WorkerPool,
    poll_interval: Duration,
}

impl JobDispatcher {
    /// Create a new dispatcher with the default 1-second poll interval.
    pub fn new(store: Arc<JobStore>, pool: WorkerPool) -> Self {
        Self {
            store,
            pool,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            capacity = self.pool.capacity(),
            "Upload dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Upload dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "Dispatch cycle failed");
                    }
                }
            }
        }
    }

    /// One dispatch cycle. Returns how many uploads were started.
    ///
    /// Unreadable records are skipped and a job that fails to start does
    /// not stop the others; only a failure to list the queue is an error.
    pub async fn tick(&self) -> Result<usize, EngineError> {
        let free = self.pool.available_slots();
        if free == 0 {
            tracing::debug!("No free worker slot, skipping dispatch cycle");
            return Ok(0);
        }

        let mut ready: Vec<JobRecord> = self
            .store
            .load_all()?
            .into_iter()
            .filter(|r| r.status() == JobStatus::Ready && !self.pool.is_claimed(r.id()))
            .collect();
        ready.sort_by_key(JobRecord::created_at);

        let mut started = 0;
        for record in ready.into_iter().take(free) {
            match self.pool.submit(record.id()).await {
                Ok(_) => started += 1,
                Err(EngineError::PoolFull) => break,
                Err(EngineError::AlreadyClaimed(_)) => {}
                Err(e) => {
                    tracing::warn!(job_id = %record.id(), error = %e, "Failed to start upload");
                }
            }
        }

        if started > 0 {
            tracing::debug!(started, "Dispatch cycle finished");
        }
        Ok(started)
    }
}
