//! Bounded worker pool.
//!
//! The pool is the only writer of transitions into and out of RUNNING. A
//! job is claimed for the whole time a worker may be touching it; the claim
//! and the worker slot are released only after the terminal status has been
//! persisted.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use lifted_core::{CoreError, JobId, JobStatus, LogSink, TaskError, WorkerHandle};
use lifted_store::{JobStore, StoreError};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::error::EngineError;
use crate::executor::Executor;

type Claims = Arc<Mutex<HashSet<JobId>>>;

/// Runs at most `capacity` uploads at once through an [`Executor`].
#[derive(Clone)]
pub struct WorkerPool {
    store: Arc<JobStore>,
    executor: Arc<dyn Executor>,
    slots: Arc<Semaphore>,
    capacity: usize,
    claims: Claims,
}

impl WorkerPool {
    pub fn new(store: Arc<JobStore>, executor: Arc<dyn Executor>, capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            store,
            executor,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            claims: Arc::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn is_claimed(&self, id: JobId) -> bool {
        lock(&self.claims).contains(&id)
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Start a READY job.
    ///
    /// Fails with [`EngineError::AlreadyClaimed`] if this pool is already
    /// running the job, [`EngineError::PoolFull`] if every slot is busy, and
    /// with an invalid transition if the job is not READY. On success the
    /// job is persisted RUNNING with its worker handle before this returns.
    pub async fn submit(&self, id: JobId) -> Result<WorkerHandle, EngineError> {
        let claim = Claim::take(&self.claims, id)?;
        let permit = Arc::clone(&self.slots)
            .try_acquire_owned()
            .map_err(|_| EngineError::PoolFull)?;

        let record = self.store.get(id)?;
        if record.status() != JobStatus::Ready {
            return Err(CoreError::InvalidTransition {
                id,
                status: record.status(),
                action: "start",
            }
            .into());
        }

        let (sink, rx) = LogSink::channel(id);
        let launched = self.executor.launch(&record, sink).await?;
        let handle = launched.handle;

        if let Err(e) = self.store.update(id, |r| r.start(handle)) {
            // Cancelled or otherwise changed while launching. The worker may
            // outlive the stop request, so it keeps its claim and slot.
            self.executor.request_stop(handle);
            let outcome = launched.outcome;
            tokio::spawn(async move {
                if let Ok(Err(err)) = outcome.await {
                    tracing::debug!(job_id = %id, error = %err, "Unrecorded worker exited");
                }
                drop(claim);
                drop(permit);
            });
            return Err(e.into());
        }
        tracing::info!(job_id = %id, provider = %record.provider(), worker = %handle, "Upload started");

        tokio::spawn(supervise(
            Arc::clone(&self.store),
            id,
            rx,
            launched.outcome,
            claim,
            permit,
        ));
        Ok(handle)
    }

    /// Wait until no job is running.
    pub async fn idle(&self) {
        let permits = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        // The semaphore is never closed, so acquiring only fails on misuse.
        if let Ok(all) = self.slots.acquire_many(permits).await {
            drop(all);
        }
    }
}

/// Follow one job until its worker is gone and its outcome is persisted.
async fn supervise(
    store: Arc<JobStore>,
    id: JobId,
    mut log: mpsc::UnboundedReceiver<String>,
    mut outcome: JoinHandle<Result<(), TaskError>>,
    claim: Claim,
    permit: OwnedSemaphorePermit,
) {
    let result = loop {
        tokio::select! {
            Some(line) = log.recv() => append_log(&store, id, line),
            joined = &mut outcome => {
                break joined.unwrap_or_else(|e| Err(TaskError::Aborted(e.to_string())));
            }
        }
    };
    while let Ok(line) = log.try_recv() {
        append_log(&store, id, line);
    }

    let settled = store.update(id, |r| match &result {
        Ok(()) => r.finish(),
        Err(e) => r.fail(e.to_string()),
    });
    match settled {
        Ok(record) => {
            tracing::info!(job_id = %id, status = %record.status(), "Upload settled");
        }
        Err(StoreError::Core(CoreError::InvalidTransition { status, .. })) => {
            tracing::info!(job_id = %id, %status, "Worker exited after the upload left RUNNING");
        }
        Err(StoreError::NotFound(_)) => {
            tracing::warn!(job_id = %id, "Upload record vanished while running");
        }
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "Failed to persist upload outcome");
        }
    }

    // Claim first: once a slot frees up the job must already be visible as
    // unclaimed.
    drop(claim);
    drop(permit);
}

fn append_log(store: &JobStore, id: JobId, line: String) {
    let appended = store.update(id, |r| {
        r.append_log(line);
        Ok(())
    });
    match appended {
        Ok(_) => {}
        Err(StoreError::NotFound(_)) => {
            tracing::debug!(job_id = %id, "Dropping log line for deleted upload");
        }
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "Failed to append to upload log");
        }
    }
}

/// Membership of a job id in the claimed set, released on drop.
struct Claim {
    claims: Claims,
    id: JobId,
}

impl Claim {
    fn take(claims: &Claims, id: JobId) -> Result<Self, EngineError> {
        if !lock(claims).insert(id) {
            return Err(EngineError::AlreadyClaimed(id));
        }
        Ok(Self {
            claims: Arc::clone(claims),
            id,
        })
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        lock(&self.claims).remove(&self.id);
    }
}

fn lock(claims: &Claims) -> MutexGuard<'_, HashSet<JobId>> {
    claims.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
