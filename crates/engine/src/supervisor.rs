//! Startup recovery.
//!
//! No worker survives an engine restart, so any upload still RUNNING on
//! disk when the engine starts is failed as abandoned before the first
//! dispatch cycle.

use lifted_core::{JobId, JobStatus};
use lifted_store::JobStore;

use crate::error::EngineError;

/// Fail every RUNNING upload. Returns the ids that were failed.
pub fn recover(store: &JobStore) -> Result<Vec<JobId>, EngineError> {
    let mut abandoned = Vec::new();
    for record in store.load_all()? {
        if record.status() != JobStatus::Running {
            continue;
        }
        let id = record.id();
        match store.update(id, |r| r.abandon()) {
            Ok(_) => {
                tracing::warn!(job_id = %id, worker = ?record.worker(), "Failed abandoned upload");
                abandoned.push(id);
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Could not fail abandoned upload");
            }
        }
    }
    if !abandoned.is_empty() {
        tracing::info!(count = abandoned.len(), "Recovered abandoned uploads");
    }
    Ok(abandoned)
}
