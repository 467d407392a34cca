/// Every job is keyed by a random UUID, which doubles as its file name.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Provider-specific settings, stored verbatim with the job. May contain
/// credentials.
pub type Settings = serde_json::Map<String, serde_json::Value>;
