//! Error types for lease stores.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to a lease store.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// Redis transport or script error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The store did not answer within the call timeout.
    #[error("lease store timed out after {0:?}")]
    Timeout(Duration),

    /// The requested TTL cannot be expressed by the store.
    #[error("lease ttl {0:?} is out of range for the store")]
    TtlOutOfRange(Duration),

    /// Failure reported by a [`LeaseStore`](crate::LeaseStore) implemented
    /// outside this crate, e.g. one backed by a database or a remote
    /// coordination service. The built-in stores never return it.
    #[error("lease store unavailable: {0}")]
    Unavailable(String),
}
