//! Live cron timers, one per alarm.
//!
//! The registry is only ever mutated by the scheduler's tick loop. A timer
//! task reads nothing but what it captured at creation plus its own schedule
//! channel, so no lock is shared between the loop and firing timers.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chime_queue::{TriggerEvent, WorkQueue};

use crate::SchedulerError;
use crate::schedule::{next_after, parse_cron};

/// A running timer for one alarm.
///
/// Dropping the handle stops the timer. A trigger already handed to the
/// queue is not affected.
#[derive(Debug)]
pub struct CronJobHandle {
    alarm_id: String,
    cron_expression: String,
    generation: u64,
    schedule_tx: watch::Sender<Schedule>,
    task: JoinHandle<()>,
}

impl CronJobHandle {
    pub fn alarm_id(&self) -> &str {
        &self.alarm_id
    }

    pub fn cron_expression(&self) -> &str {
        &self.cron_expression
    }

    /// Creation order of this timer. Unchanged across schedule updates.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Next time this timer fires.
    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        next_after(&self.schedule_tx.borrow(), Utc::now())
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for CronJobHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Alarm id to live timer.
pub struct CronRegistry {
    queue: Arc<dyn WorkQueue>,
    handles: BTreeMap<String, CronJobHandle>,
    next_generation: u64,
}

impl CronRegistry {
    /// Create an empty registry whose timers enqueue onto `queue`.
    pub fn new(queue: Arc<dyn WorkQueue>) -> Self {
        Self {
            queue,
            handles: BTreeMap::new(),
            next_generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn contains(&self, alarm_id: &str) -> bool {
        self.handles.contains_key(alarm_id)
    }

    pub fn get(&self, alarm_id: &str) -> Option<&CronJobHandle> {
        self.handles.get(alarm_id)
    }

    /// Alarm ids with a live timer, in order.
    pub fn alarm_ids(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(String::as_str)
    }

    /// Start a timer for `alarm_id`, replacing any existing one.
    pub fn add(&mut self, alarm_id: &str, cron_expression: &str) -> Result<(), SchedulerError> {
        let schedule = parse_cron(cron_expression)?;
        let (schedule_tx, schedule_rx) = watch::channel(schedule);

        let task = tokio::spawn(run_timer(
            alarm_id.to_string(),
            schedule_rx,
            Arc::clone(&self.queue),
        ));

        let generation = self.next_generation;
        self.next_generation += 1;

        self.handles.insert(
            alarm_id.to_string(),
            CronJobHandle {
                alarm_id: alarm_id.to_string(),
                cron_expression: cron_expression.to_string(),
                generation,
                schedule_tx,
                task,
            },
        );
        info!(alarm_id, cron = cron_expression, "started cron timer");
        Ok(())
    }

    /// Swap the schedule of a running timer without restarting it.
    ///
    /// On a parse error the timer keeps its previous schedule.
    pub fn update(&mut self, alarm_id: &str, cron_expression: &str) -> Result<(), SchedulerError> {
        let Some(handle) = self.handles.get_mut(alarm_id) else {
            return self.add(alarm_id, cron_expression);
        };

        let schedule = parse_cron(cron_expression)?;
        handle.schedule_tx.send_replace(schedule);
        info!(
            alarm_id,
            from = %handle.cron_expression,
            to = cron_expression,
            "updated cron timer"
        );
        handle.cron_expression = cron_expression.to_string();
        Ok(())
    }

    /// Stop and forget the timer for `alarm_id`. Returns whether one existed.
    pub fn remove(&mut self, alarm_id: &str) -> bool {
        let removed = self.handles.remove(alarm_id).is_some();
        if removed {
            info!(alarm_id, "stopped cron timer");
        }
        removed
    }

    /// Stop every timer. Returns how many were stopped.
    pub fn clear(&mut self) -> usize {
        let count = self.handles.len();
        self.handles.clear();
        if count > 0 {
            info!(count, "stopped all cron timers");
        }
        count
    }
}

async fn run_timer(
    alarm_id: String,
    mut schedule_rx: watch::Receiver<Schedule>,
    queue: Arc<dyn WorkQueue>,
) {
    let mut last_fired: Option<DateTime<Utc>> = None;

    loop {
        // Never plan from before the last fire, so an early wake cannot fire twice.
        let now = Utc::now();
        let from = last_fired.map_or(now, |fired| fired.max(now));
        let next = next_after(&schedule_rx.borrow_and_update(), from);

        let Some(next) = next else {
            debug!(alarm_id = %alarm_id, "schedule has no future occurrence");
            if schedule_rx.changed().await.is_err() {
                return;
            }
            continue;
        };

        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::select! {
            changed = schedule_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = tokio::time::sleep(wait) => {
                last_fired = Some(next);
                fire(&alarm_id, &queue);
            }
        }
    }
}

/// Hand a trigger to the queue in its own task so stopping the timer never
/// cancels an enqueue that has already started.
fn fire(alarm_id: &str, queue: &Arc<dyn WorkQueue>) {
    let queue = Arc::clone(queue);
    let event = TriggerEvent::now(alarm_id);
    tokio::spawn(async move {
        let alarm_id = event.alarm_id.clone();
        match queue.enqueue(event).await {
            Ok(job_id) => debug!(alarm_id = %alarm_id, %job_id, "enqueued trigger"),
            Err(e) => warn!(alarm_id = %alarm_id, error = %e, "failed to enqueue trigger"),
        }
    });
}
