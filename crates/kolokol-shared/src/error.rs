use thiserror::Error;

/// Failures reported by the hosted backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote write rejected: {0}")]
    Write(String),

    #[error("Media upload failed: {0}")]
    Upload(String),

    #[error("Remote query failed: {0}")]
    Query(String),

    #[error("Subscription to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("Record not found: {0}")]
    NotFound(String),
}
