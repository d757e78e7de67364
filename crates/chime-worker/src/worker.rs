//! Trigger fan-out.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{error, info, warn};

use chime_alarms::{AlarmDefinition, AlarmSource, Subscription};
use chime_queue::{HandlerError, JobHandler, TriggerEvent};

use crate::{Mailer, WorkerError};

/// Outcome of one trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
}

/// Delivers alarm notifications to active subscribers.
pub struct Worker {
    alarms: Arc<dyn AlarmSource>,
    mailer: Arc<dyn Mailer>,
}

impl Worker {
    pub fn new(alarms: Arc<dyn AlarmSource>, mailer: Arc<dyn Mailer>) -> Self {
        Self { alarms, mailer }
    }

    /// Send the alarm behind `event` to each of its active subscribers.
    ///
    /// An alarm deleted since the trigger was queued yields an empty report.
    /// Failed sends are counted, never returned; only a failed read of the
    /// alarm fails the trigger, and nothing has been sent at that point.
    #[tracing::instrument(skip_all, fields(alarm_id = %event.alarm_id))]
    pub async fn on_trigger(&self, event: &TriggerEvent) -> Result<DeliveryReport, WorkerError> {
        let Some(delivery) = self.alarms.get_alarm(&event.alarm_id).await? else {
            info!("alarm no longer exists, discarding trigger");
            return Ok(DeliveryReport::default());
        };

        let sends = delivery
            .subscriptions
            .iter()
            .filter(|subscription| subscription.active)
            .map(|subscription| self.deliver(&delivery.alarm, subscription));
        let outcomes = join_all(sends).await;

        let sent = outcomes.iter().filter(|&&ok| ok).count();
        let report = DeliveryReport {
            sent,
            failed: outcomes.len() - sent,
        };
        info!(sent = report.sent, failed = report.failed, "trigger delivered");
        Ok(report)
    }

    async fn deliver(&self, alarm: &AlarmDefinition, subscription: &Subscription) -> bool {
        let address = &subscription.recipient.address;
        let body = notification_body(alarm, subscription);
        match self.mailer.send(address, &alarm.subject, &body).await {
            Ok(()) => true,
            Err(e) => {
                warn!(recipient_id = %subscription.recipient.id, %address, error = %e, "delivery failed");
                false
            }
        }
    }
}

fn notification_body(alarm: &AlarmDefinition, subscription: &Subscription) -> String {
    format!(
        "{}. Deactivate code is {}",
        alarm.message, subscription.deactivate_code
    )
}

#[async_trait]
impl JobHandler for Worker {
    async fn handle(&self, event: &TriggerEvent) -> Result<(), HandlerError> {
        self.on_trigger(event).await.map(|_| ()).map_err(|e| {
            error!(alarm_id = %event.alarm_id, error = %e, "trigger failed");
            HandlerError::new(e.to_string())
        })
    }
}
