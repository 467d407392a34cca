//! Execution contexts for upload tasks.
//!
//! The pool only needs two primitives from an executor: start a job and get
//! back a [`WorkerHandle`] plus a future outcome, and ask a handle to stop.
//! [`ProcessExecutor`] isolates each job in a child process;
//! [`LocalExecutor`] runs it as a cancellable tokio task.

mod local;
mod process;

use async_trait::async_trait;
use lifted_core::{JobRecord, LogSink, TaskError, WorkerHandle};
use tokio::task::JoinHandle;

use crate::error::EngineError;

pub use local::LocalExecutor;
pub use process::{ProcessExecutor, RUN_JOB_COMMAND};

/// A job that has been handed to an execution context.
#[derive(Debug)]
pub struct Launched {
    pub handle: WorkerHandle,
    /// Resolves once the worker is gone. A join error means the worker
    /// panicked.
    pub outcome: JoinHandle<Result<(), TaskError>>,
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Start running `record`'s task, streaming its log lines into `log`.
    async fn launch(&self, record: &JobRecord, log: LogSink) -> Result<Launched, EngineError>;

    /// Ask the worker behind `handle` to stop. Fire-and-forget: delivery
    /// failures are logged, never returned.
    fn request_stop(&self, handle: WorkerHandle);
}
