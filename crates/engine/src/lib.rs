//! The upload queue engine.
//!
//! [`UploadQueue`] is the entry point: it owns the [`lifted_store::JobStore`],
//! the provider registry and the [`pool::WorkerPool`], exposes the queue
//! management operations, and starts the [`dispatcher::JobDispatcher`] after
//! the [`supervisor`] has reconciled jobs left over from a previous run.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod pool;
pub mod queue;
pub mod supervisor;

pub use config::{ConfigError, EngineConfig};
pub use dispatcher::JobDispatcher;
pub use error::EngineError;
pub use executor::{Executor, Launched, LocalExecutor, ProcessExecutor};
pub use pool::WorkerPool;
pub use queue::{EngineHandle, UploadQueue};
