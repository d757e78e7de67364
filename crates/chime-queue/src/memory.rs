//! In-process work queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::time::{Instant, sleep, timeout_at};
use uuid::Uuid;

use crate::{DeadLetter, QueueError, QueueStats, QueuedJob, TriggerEvent, WorkQueue};

#[derive(Debug, Default)]
struct State {
    waiting: VecDeque<QueuedJob>,
    delayed: usize,
    reserved: HashMap<Uuid, QueuedJob>,
    dead: Vec<DeadLetter>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    ready: Notify,
}

impl Inner {
    async fn push(&self, job: QueuedJob) {
        self.state.lock().await.waiting.push_back(job);
        self.ready.notify_one();
    }
}

/// FIFO work queue held in process memory.
///
/// Nothing survives a restart; use it for tests and single-process runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorkQueue {
    inner: Arc<Inner>,
}

impl MemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs that exhausted their retries.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.state.lock().await.dead.clone()
    }

    /// Events currently waiting, oldest first.
    pub async fn waiting(&self) -> Vec<TriggerEvent> {
        self.inner
            .state
            .lock()
            .await
            .waiting
            .iter()
            .map(|job| job.event.clone())
            .collect()
    }

    async fn take_reserved(&self, id: Uuid) -> Result<QueuedJob, QueueError> {
        self.inner
            .state
            .lock()
            .await
            .reserved
            .remove(&id)
            .ok_or(QueueError::NotReserved(id))
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn enqueue(&self, event: TriggerEvent) -> Result<Uuid, QueueError> {
        let job = QueuedJob::new(event);
        let id = job.id;
        self.inner.push(job).await;
        Ok(id)
    }

    async fn reserve(&self, wait: Duration) -> Result<Option<QueuedJob>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            {
                let mut state = self.inner.state.lock().await;
                if let Some(job) = state.waiting.pop_front() {
                    state.reserved.insert(job.id, job.clone());
                    return Ok(Some(job));
                }
            }
            if timeout_at(deadline, self.inner.ready.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, job: &QueuedJob) -> Result<(), QueueError> {
        self.take_reserved(job.id).await.map(|_| ())
    }

    async fn retry(&self, job: QueuedJob, delay: Duration) -> Result<(), QueueError> {
        {
            let mut state = self.inner.state.lock().await;
            state
                .reserved
                .remove(&job.id)
                .ok_or(QueueError::NotReserved(job.id))?;
            state.delayed += 1;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            sleep(delay).await;
            {
                let mut state = inner.state.lock().await;
                state.delayed -= 1;
                state.waiting.push_back(job);
            }
            inner.ready.notify_one();
        });
        Ok(())
    }

    async fn dead_letter(&self, job: QueuedJob, reason: &str) -> Result<(), QueueError> {
        let mut state = self.inner.state.lock().await;
        state
            .reserved
            .remove(&job.id)
            .ok_or(QueueError::NotReserved(job.id))?;
        state.dead.push(DeadLetter {
            job,
            reason: reason.to_string(),
            failed_at: Utc::now(),
        });
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let state = self.inner.state.lock().await;
        Ok(QueueStats {
            waiting: state.waiting.len(),
            delayed: state.delayed,
            reserved: state.reserved.len(),
            dead: state.dead.len(),
        })
    }
}
