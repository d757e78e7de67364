//! Worker side of chime: turns a trigger into one email per active subscriber.
//!
//! Deliveries for one trigger run concurrently and fail independently. The
//! queue consumer runs one trigger at a time per worker process.

mod error;
mod mailer;
mod worker;

pub use error::{MailError, WorkerError};
pub use mailer::{Mailer, SmtpConfig, SmtpMailer};
pub use worker::{DeliveryReport, Worker};
