//! Error types for delivery.

use thiserror::Error;

/// Errors from the mail transport.
#[derive(Debug, Error)]
pub enum MailError {
    /// An address could not be parsed as a mailbox.
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The message could not be assembled.
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    /// The SMTP server rejected the message or could not be reached.
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Errors that fail a whole trigger.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The alarm could not be read.
    #[error("alarm source error: {0}")]
    Source(#[from] chime_alarms::AlarmError),
}
