//! In-memory alarm repository.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::{AlarmDefinition, AlarmDelivery, AlarmError, AlarmSource, Recipient, Subscription};

/// Partial update of an alarm. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct AlarmUpdate {
    pub cron_expression: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
struct SubscriptionRecord {
    alarm_id: String,
    recipient_id: String,
    active: bool,
    deactivate_code: String,
}

#[derive(Debug, Default)]
struct Tables {
    alarms: BTreeMap<String, AlarmDefinition>,
    /// Keyed by address; addresses are unique.
    recipients: BTreeMap<String, Recipient>,
    subscriptions: Vec<SubscriptionRecord>,
    next_id: u64,
}

impl Tables {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    fn recipient_by_id(&self, id: &str) -> Option<&Recipient> {
        self.recipients.values().find(|r| r.id == id)
    }

    fn subscription_by_code(&mut self, code: &str) -> Option<&mut SubscriptionRecord> {
        self.subscriptions
            .iter_mut()
            .find(|s| s.deactivate_code == code)
    }
}

/// Alarm repository held in process memory.
///
/// Implements the repository operations the CRUD surface relies on, plus
/// [`AlarmSource`] for the scheduler and worker.
#[derive(Debug, Default)]
pub struct MemoryAlarmStore {
    tables: RwLock<Tables>,
}

impl MemoryAlarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an alarm with a newly allocated id.
    pub async fn create_alarm(
        &self,
        cron_expression: &str,
        subject: &str,
        message: &str,
    ) -> AlarmDefinition {
        let mut tables = self.tables.write().await;
        let alarm = AlarmDefinition {
            id: tables.allocate_id(),
            cron_expression: cron_expression.to_string(),
            subject: subject.to_string(),
            message: message.to_string(),
        };
        tables.alarms.insert(alarm.id.clone(), alarm.clone());
        info!(alarm_id = %alarm.id, cron = %alarm.cron_expression, "created alarm");
        alarm
    }

    /// Insert or replace an alarm under its own id.
    pub async fn put_alarm(&self, alarm: AlarmDefinition) {
        self.tables
            .write()
            .await
            .alarms
            .insert(alarm.id.clone(), alarm);
    }

    pub async fn update_alarm(
        &self,
        id: &str,
        update: AlarmUpdate,
    ) -> Result<AlarmDefinition, AlarmError> {
        let mut tables = self.tables.write().await;
        let alarm = tables
            .alarms
            .get_mut(id)
            .ok_or_else(|| AlarmError::NotFound(id.to_string()))?;

        if let Some(cron_expression) = update.cron_expression {
            alarm.cron_expression = cron_expression;
        }
        if let Some(subject) = update.subject {
            alarm.subject = subject;
        }
        if let Some(message) = update.message {
            alarm.message = message;
        }
        Ok(alarm.clone())
    }

    /// Delete an alarm and its subscriptions.
    pub async fn delete_alarm(&self, id: &str) -> Result<(), AlarmError> {
        let mut tables = self.tables.write().await;
        tables
            .alarms
            .remove(id)
            .ok_or_else(|| AlarmError::NotFound(id.to_string()))?;
        tables.subscriptions.retain(|s| s.alarm_id != id);
        info!(alarm_id = %id, "deleted alarm");
        Ok(())
    }

    /// Subscribe `address` to an alarm.
    ///
    /// Recipients are shared across alarms by address. Subscribing twice is a
    /// no-op that keeps the existing subscription and its state.
    pub async fn add_recipient(
        &self,
        alarm_id: &str,
        address: &str,
    ) -> Result<Recipient, AlarmError> {
        let mut tables = self.tables.write().await;
        if !tables.alarms.contains_key(alarm_id) {
            return Err(AlarmError::NotFound(alarm_id.to_string()));
        }

        let existing = tables.recipients.get(address).cloned();
        let recipient = match existing {
            Some(existing) => existing,
            None => {
                let recipient = Recipient {
                    id: tables.allocate_id(),
                    address: address.to_string(),
                };
                tables
                    .recipients
                    .insert(address.to_string(), recipient.clone());
                recipient
            }
        };

        let subscribed = tables
            .subscriptions
            .iter()
            .any(|s| s.alarm_id == alarm_id && s.recipient_id == recipient.id);
        if !subscribed {
            tables.subscriptions.push(SubscriptionRecord {
                alarm_id: alarm_id.to_string(),
                recipient_id: recipient.id.clone(),
                active: true,
                deactivate_code: Uuid::new_v4().to_string(),
            });
        }

        Ok(recipient)
    }

    /// Every subscription of an alarm, active or not.
    pub async fn subscriptions(&self, alarm_id: &str) -> Vec<Subscription> {
        let tables = self.tables.read().await;
        tables
            .subscriptions
            .iter()
            .filter(|s| s.alarm_id == alarm_id)
            .filter_map(|s| {
                let recipient = tables.recipient_by_id(&s.recipient_id)?;
                Some(Subscription {
                    alarm_id: s.alarm_id.clone(),
                    recipient: recipient.clone(),
                    active: s.active,
                    deactivate_code: s.deactivate_code.clone(),
                })
            })
            .collect()
    }

    /// Stop delivering to the subscription identified by `code`.
    pub async fn deactivate_subscription(&self, code: &str) -> Result<(), AlarmError> {
        self.set_active(code, false).await
    }

    /// Resume delivering to the subscription identified by `code`.
    pub async fn resubscribe(&self, code: &str) -> Result<(), AlarmError> {
        self.set_active(code, true).await
    }

    async fn set_active(&self, code: &str, active: bool) -> Result<(), AlarmError> {
        let mut tables = self.tables.write().await;
        let subscription = tables
            .subscription_by_code(code)
            .ok_or(AlarmError::InvalidDeactivateCode)?;
        subscription.active = active;
        Ok(())
    }
}

#[async_trait]
impl AlarmSource for MemoryAlarmStore {
    async fn list_all(&self) -> Result<Vec<AlarmDefinition>, AlarmError> {
        Ok(self.tables.read().await.alarms.values().cloned().collect())
    }

    async fn get_alarm(&self, id: &str) -> Result<Option<AlarmDelivery>, AlarmError> {
        let Some(alarm) = self.tables.read().await.alarms.get(id).cloned() else {
            return Ok(None);
        };
        let subscriptions = self
            .subscriptions(id)
            .await
            .into_iter()
            .filter(|s| s.active)
            .collect();
        Ok(Some(AlarmDelivery {
            alarm,
            subscriptions,
        }))
    }
}
