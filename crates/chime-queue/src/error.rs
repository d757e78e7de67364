//! Error types for the work queue.

use thiserror::Error;

/// Errors that can occur in queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Redis transport or script error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Job payload could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The job is not reserved by this consumer.
    #[error("job not reserved: {0}")]
    NotReserved(uuid::Uuid),
}

/// Failure reported by a job handler.
///
/// Returning it asks the queue to retry the job under its retry policy.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
