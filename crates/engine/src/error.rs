use lifted_core::{CoreError, JobId};
use lifted_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// The job is already owned by a worker of this pool.
    #[error("Upload {0} is already running")]
    AlreadyClaimed(JobId),

    #[error("No free worker slot")]
    PoolFull,

    /// The request is valid but clashes with the job's current state.
    #[error("{0}")]
    Conflict(String),

    #[error("Could not launch worker: {0}")]
    Launch(String),
}
