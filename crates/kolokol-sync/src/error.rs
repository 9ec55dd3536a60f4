use thiserror::Error;

use kolokol_shared::{CorrelationId, MessageId, RemoteError};

/// Errors produced by the sync layer.
///
/// None of these is fatal: every variant maps to a recoverable UI state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Bad local input, rejected before anything is sent.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A write was attempted without a logged-in user.
    #[error("Write rejected: no active session")]
    NoSession,

    #[error("Remote write failed: {0}")]
    RemoteWrite(RemoteError),

    #[error("Upload failed: {0}")]
    Upload(RemoteError),

    #[error("Subscription failed: {0}")]
    Subscription(RemoteError),

    #[error("Remote query failed: {0}")]
    Query(RemoteError),

    #[error("No pending write with correlation id {0}")]
    UnknownPending(CorrelationId),

    /// Only failed writes can be retried.
    #[error("Write {0} has not failed")]
    NotRetryable(CorrelationId),

    #[error("Message not found in the active chat: {0}")]
    UnknownMessage(MessageId),

    /// Only failed writes can be discarded.
    #[error("Write {0} is still in flight")]
    StillInFlight(CorrelationId),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;
