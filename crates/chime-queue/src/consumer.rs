//! Bounded-concurrency queue consumer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, info, warn};

use crate::{HandlerError, QueuedJob, RetryPolicy, TriggerEvent, WorkQueue};

/// Processes one trigger. Must be safe to call repeatedly for the same trigger.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, event: &TriggerEvent) -> Result<(), HandlerError>;
}

/// Consumer settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Jobs processed at the same time by this consumer.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Longest wait for a job before re-checking for shutdown.
    pub poll_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Pulls jobs from a [`WorkQueue`] and runs them through a [`JobHandler`].
pub struct Consumer {
    queue: Arc<dyn WorkQueue>,
    handler: Arc<dyn JobHandler>,
    config: ConsumerConfig,
}

impl Consumer {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        handler: Arc<dyn JobHandler>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            config,
        }
    }

    /// Run until `shutdown_rx` turns true, then wait for in-flight jobs.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let concurrency = self.config.concurrency.max(1);
        info!(concurrency, "consumer starting");

        match self.queue.recover_reserved().await {
            Ok(0) => {}
            Ok(recovered) => info!(recovered, "recovered jobs reserved by a previous run"),
            Err(e) => warn!(error = %e, "failed to recover previously reserved jobs"),
        }

        let slots = Arc::new(Semaphore::new(concurrency));
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            max_elapsed_time: None,
            ..Default::default()
        };

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match self.queue.reserve(self.config.poll_interval).await {
                Ok(Some(job)) => {
                    backoff.reset();
                    let queue = Arc::clone(&self.queue);
                    let handler = Arc::clone(&self.handler);
                    let retry = self.config.retry.clone();
                    tokio::spawn(async move {
                        process(queue, handler, &retry, job).await;
                        drop(permit);
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    drop(permit);
                    let wait = backoff.next_backoff().unwrap_or(Duration::from_secs(30));
                    warn!(error = %e, wait_ms = wait.as_millis() as u64, "failed to reserve job, backing off");
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }

        info!("consumer draining in-flight jobs");
        let _ = slots.acquire_many(concurrency as u32).await;
        info!("consumer shut down gracefully");
    }
}

/// Run one job and settle it with the queue.
#[tracing::instrument(skip_all, fields(job_id = %job.id, alarm_id = %job.event.alarm_id, attempt = job.attempts + 1))]
async fn process(
    queue: Arc<dyn WorkQueue>,
    handler: Arc<dyn JobHandler>,
    retry: &RetryPolicy,
    mut job: QueuedJob,
) {
    let event = job.event.clone();
    // A separate task turns a panicking handler into an ordinary failure.
    let outcome = tokio::spawn(async move { handler.handle(&event).await }).await;

    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(join_error) => Some(format!("handler panicked: {join_error}")),
    };

    let Some(reason) = failure else {
        debug!("job completed");
        if let Err(e) = queue.ack(&job).await {
            error!(error = %e, "failed to acknowledge job");
        }
        return;
    };

    job.attempts += 1;
    if retry.should_retry(job.attempts) {
        let delay = retry.delay_for(job.attempts);
        warn!(
            failures = job.attempts,
            retry_in_ms = delay.as_millis() as u64,
            error = %reason,
            "job failed, scheduled retry"
        );
        if let Err(e) = queue.retry(job, delay).await {
            error!(error = %e, "failed to schedule retry");
        }
    } else {
        error!(failures = job.attempts, error = %reason, "job failed permanently");
        if let Err(e) = queue.dead_letter(job, &reason).await {
            error!(error = %e, "failed to dead-letter job");
        }
    }
}
