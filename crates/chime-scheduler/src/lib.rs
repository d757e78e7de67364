//! Leader-elected cron scheduler for chime.
//!
//! This crate provides:
//! - [`CronRegistry`], the live set of per-alarm cron timers owned by one process
//! - [`Scheduler`], a tick loop that competes for a shared lease and, while it
//!   holds it, reconciles the registry against the current alarm definitions
//!
//! Fired timers only enqueue a trigger; delivery happens in the workers.

mod error;
mod registry;
mod schedule;
mod scheduler;
mod types;

pub use error::SchedulerError;
pub use registry::{CronJobHandle, CronRegistry};
pub use schedule::parse_cron;
pub use scheduler::Scheduler;
pub use types::{ReconcileReport, Role, SchedulerConfig};
