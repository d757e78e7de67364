//! Queue types.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::QueueError;

/// "Dispatch notifications for this alarm now."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub alarm_id: String,
    pub enqueued_at: DateTime<Utc>,
}

impl TriggerEvent {
    /// A trigger for `alarm_id` stamped with the current time.
    pub fn now(alarm_id: impl Into<String>) -> Self {
        Self {
            alarm_id: alarm_id.into(),
            enqueued_at: Utc::now(),
        }
    }
}

/// A trigger as stored in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: Uuid,
    /// Failed attempts so far.
    pub attempts: u32,
    pub event: TriggerEvent,
    /// Exact payload this job was reserved with, used to acknowledge it.
    #[serde(skip)]
    pub(crate) receipt: Option<String>,
}

impl QueuedJob {
    pub fn new(event: TriggerEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempts: 0,
            event,
            receipt: None,
        }
    }
}

/// A job that exhausted its retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub job: QueuedJob,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Queue depth snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub waiting: usize,
    pub delayed: usize,
    pub reserved: usize,
    pub dead: usize,
}

/// At-least-once job queue.
///
/// A reserved job stays owned by the consumer until it is acknowledged,
/// scheduled for retry or dead-lettered.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Durably add a trigger. Duplicate submissions are allowed.
    async fn enqueue(&self, event: TriggerEvent) -> Result<Uuid, QueueError>;

    /// Take the next ready job, waiting at most `wait` for one to arrive.
    async fn reserve(&self, wait: Duration) -> Result<Option<QueuedJob>, QueueError>;

    /// Mark a reserved job as done.
    async fn ack(&self, job: &QueuedJob) -> Result<(), QueueError>;

    /// Put a reserved job back, ready again after `delay`.
    async fn retry(&self, job: QueuedJob, delay: Duration) -> Result<(), QueueError>;

    /// Move a reserved job to the dead-letter store.
    async fn dead_letter(&self, job: QueuedJob, reason: &str) -> Result<(), QueueError>;

    /// Return jobs left reserved by a previous run of this consumer to the
    /// waiting queue. Returns how many were recovered.
    async fn recover_reserved(&self) -> Result<usize, QueueError> {
        Ok(0)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError>;
}
