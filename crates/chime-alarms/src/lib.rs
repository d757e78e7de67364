//! Alarm definitions and the sources that serve them.
//!
//! The scheduler reads the full definition set every tick; the worker reads
//! one alarm with its currently active subscriptions per trigger. Both go
//! through [`AlarmSource`], so the backing store can change underneath them
//! at any time.

mod error;
mod file;
mod memory;
mod source;
mod types;

pub use error::AlarmError;
pub use file::FileAlarmStore;
pub use memory::{AlarmUpdate, MemoryAlarmStore};
pub use source::AlarmSource;
pub use types::{AlarmDefinition, AlarmDelivery, Recipient, Subscription};
