use crate::status::JobStatus;
use crate::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Cannot {action} upload {id}: status is {status}")]
    InvalidTransition {
        id: JobId,
        status: JobStatus,
        action: &'static str,
    },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid provider {name}: {reason}")]
    InvalidProvider { name: String, reason: String },
}
