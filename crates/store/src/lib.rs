//! File-backed persistence for upload jobs.
//!
//! One JSON file per job, named by the job's UUID, inside a single queue
//! directory. See [`JobStore`].

pub mod error;
pub mod job_store;

pub use error::StoreError;
pub use job_store::JobStore;
