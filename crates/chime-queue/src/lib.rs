//! Trigger queue between the scheduler and the workers.
//!
//! This crate provides:
//! - [`TriggerEvent`], the message produced when an alarm's cron schedule fires
//! - [`WorkQueue`], an at-least-once queue with delayed retry and dead letters
//! - [`Consumer`], a bounded-concurrency loop that feeds jobs to a [`JobHandler`]
//!   and applies a [`RetryPolicy`] to failures
//!
//! Once `enqueue` returns, surviving restarts is the queue's job. Handlers
//! must tolerate seeing the same trigger more than once.

mod consumer;
mod error;
mod memory;
mod redis_queue;
mod retry;
mod types;

pub use consumer::{Consumer, ConsumerConfig, JobHandler};
pub use error::{HandlerError, QueueError};
pub use memory::MemoryWorkQueue;
pub use redis_queue::RedisWorkQueue;
pub use retry::RetryPolicy;
pub use types::{DeadLetter, QueueStats, QueuedJob, TriggerEvent, WorkQueue};
