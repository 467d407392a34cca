//! Domain logic for the image upload queue.
//!
//! Everything here is free of store access: job records and their status
//! transitions, the [`task::Task`] contract provider code implements, and
//! the built-in providers. Persistence lives in `lifted-store`, scheduling
//! in `lifted-engine`.

pub mod error;
pub mod hashing;
pub mod job;
pub mod providers;
pub mod settings;
pub mod status;
pub mod subprocess;
pub mod task;
pub mod types;

pub use error::CoreError;
pub use job::{JobRecord, JobSummary, WorkerHandle, ABANDONED_ERROR};
pub use providers::{ProviderOptions, ProviderRegistry};
pub use status::JobStatus;
pub use task::{LogSink, Task, TaskError, UploadRequest};
pub use types::{JobId, Settings, Timestamp};
