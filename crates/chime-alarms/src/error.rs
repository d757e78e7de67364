//! Error types for alarm stores.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when reading or mutating alarms.
#[derive(Debug, Error)]
pub enum AlarmError {
    /// Alarm not found.
    #[error("alarm not found: {0}")]
    NotFound(String),

    /// No subscription carries this deactivate code.
    #[error("invalid deactivate code")]
    InvalidDeactivateCode,

    /// Reading the backing file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing document is malformed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failure reported by an [`AlarmSource`](crate::AlarmSource) implemented
    /// outside this crate, e.g. one reading a relational database. The file
    /// and memory stores never return it.
    #[error("alarm store unavailable: {0}")]
    Unavailable(String),
}
