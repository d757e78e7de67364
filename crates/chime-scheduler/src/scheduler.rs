//! Leader-elected reconciliation loop.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use chime_alarms::{AlarmDefinition, AlarmSource};
use chime_lease::{HolderToken, LeaseLock, LeaseStore, ReleaseOutcome};
use chime_queue::WorkQueue;

use crate::{CronRegistry, ReconcileReport, Role, SchedulerConfig, SchedulerError};

/// One scheduler instance.
///
/// Any number of instances may run against the same lease store. Each tick,
/// the instance that wins the lease reconciles its timers against the alarm
/// definitions; every other instance drops whatever timers it still holds.
pub struct Scheduler {
    config: SchedulerConfig,
    lock: LeaseLock,
    token: HolderToken,
    alarms: Arc<dyn AlarmSource>,
    registry: CronRegistry,
    role: Role,
}

impl Scheduler {
    /// Create a scheduler. Fails if `config` is inconsistent.
    pub fn new(
        config: SchedulerConfig,
        lease_store: Arc<dyn LeaseStore>,
        token: HolderToken,
        alarms: Arc<dyn AlarmSource>,
        queue: Arc<dyn WorkQueue>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let lock = LeaseLock::new(lease_store).with_call_timeout(config.lock_timeout);
        Ok(Self {
            config,
            lock,
            token,
            alarms,
            registry: CronRegistry::new(queue),
            role: Role::Follower,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn token(&self) -> &HolderToken {
        &self.token
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn registry(&self) -> &CronRegistry {
        &self.registry
    }

    /// Compete for the lease, then reconcile as leader or tear down as follower.
    #[tracing::instrument(skip(self), fields(token = %self.token))]
    pub async fn tick(&mut self) -> Role {
        let outcome = self
            .lock
            .acquire_or_extend(&self.config.lease_key, &self.token, self.config.lease_ttl)
            .await;

        if outcome.is_granted() {
            if self.role == Role::Follower {
                info!(key = %self.config.lease_key, "became leader");
            }
            self.role = Role::Leader;

            match self.reconcile().await {
                Ok(report) if report.changed() || report.failed > 0 => {
                    info!(
                        added = report.added,
                        updated = report.updated,
                        removed = report.removed,
                        unchanged = report.unchanged,
                        failed = report.failed,
                        "reconciled cron timers"
                    );
                }
                Ok(report) => debug!(unchanged = report.unchanged, "cron timers up to date"),
                Err(e) => warn!(error = %e, "skipping reconcile this tick"),
            }
        } else {
            if self.role == Role::Leader {
                warn!(key = %self.config.lease_key, "lost leadership");
            }
            self.role = Role::Follower;
            self.teardown();
        }

        self.role
    }

    /// Bring the registry in line with the current alarm definitions.
    ///
    /// A failure to read the definitions leaves the registry untouched. A bad
    /// cron expression only affects its own alarm.
    pub async fn reconcile(&mut self) -> Result<ReconcileReport, SchedulerError> {
        let definitions = self.alarms.list_all().await?;

        let mut wanted: BTreeMap<&str, &AlarmDefinition> = BTreeMap::new();
        for definition in &definitions {
            if wanted.insert(&definition.id, definition).is_some() {
                warn!(alarm_id = %definition.id, "duplicate alarm id, using the last definition");
            }
        }

        let mut report = ReconcileReport::default();

        let stale: Vec<String> = self
            .registry
            .alarm_ids()
            .filter(|id| !wanted.contains_key(id))
            .map(str::to_string)
            .collect();
        for id in stale {
            self.registry.remove(&id);
            report.removed += 1;
        }

        for (id, definition) in wanted {
            let current = self
                .registry
                .get(id)
                .map(|handle| handle.cron_expression().to_string());

            let result = match current {
                Some(expression) if expression == definition.cron_expression => {
                    report.unchanged += 1;
                    continue;
                }
                Some(_) => self
                    .registry
                    .update(id, &definition.cron_expression)
                    .map(|()| report.updated += 1),
                None => self
                    .registry
                    .add(id, &definition.cron_expression)
                    .map(|()| report.added += 1),
            };

            if let Err(e) = result {
                error!(alarm_id = %id, error = %e, "failed to schedule alarm");
                report.failed += 1;
            }
        }

        Ok(report)
    }

    /// Stop every local timer. Returns how many were stopped.
    pub fn teardown(&mut self) -> usize {
        self.registry.clear()
    }

    /// Tick until `shutdown_rx` turns true, then stop all timers and give up
    /// the lease so another instance can take over without waiting for expiry.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            token = %self.token,
            key = %self.config.lease_key,
            tick_ms = self.config.tick_interval.as_millis() as u64,
            "scheduler starting"
        );

        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Stop all timers and release the lease if held.
    pub async fn shutdown(&mut self) {
        info!("scheduler shutting down");
        self.teardown();
        if self.role == Role::Leader {
            if self.lock.release(&self.config.lease_key, &self.token).await == ReleaseOutcome::Released {
                info!(key = %self.config.lease_key, "released leadership");
            }
            self.role = Role::Follower;
        }
        info!("scheduler shut down gracefully");
    }
}
