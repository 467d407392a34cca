//! Upload job status lifecycle.
//!
//! ```text
//! WAITING -> READY -> RUNNING -> FINISHED | FAILED
//!    \         \         \
//!     +---------+---------+--> CANCELLED
//! FINISHED | FAILED | CANCELLED --(reset)--> READY
//! ```
//!
//! The names serialize in `SCREAMING_SNAKE_CASE` so persisted records read
//! the same as the status strings shown to callers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of an upload job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Created, waiting for the image to be supplied.
    Waiting,
    /// Image supplied, waiting for the dispatcher.
    Ready,
    /// Owned by a worker.
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        Self::Waiting,
        Self::Ready,
        Self::Running,
        Self::Finished,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Jobs that have not yet reached a terminal status can be cancelled.
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::Waiting | Self::Ready | Self::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }

    /// Whether the lifecycle graph has an edge from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Waiting, Ready) | (Ready, Running) => true,
            (Running, Finished) | (Running, Failed) => true,
            (from, Cancelled) => from.is_cancellable(),
            (from, Ready) => from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
