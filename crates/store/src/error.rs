use lifted_core::{CoreError, JobId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Could not find upload {0}")]
    NotFound(JobId),

    #[error("Could not parse upload {id}: {source}")]
    Corrupt {
        id: JobId,
        #[source]
        source: serde_json::Error,
    },

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not serialize upload: {0}")]
    Serialize(serde_json::Error),

    /// A mutation applied through [`crate::JobStore::update`] was rejected.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl StoreError {
    /// Per-record conditions that bulk scans skip instead of aborting.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Corrupt { .. })
    }
}
