//! Alarm types.

use serde::{Deserialize, Serialize};

/// A recurring notification definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmDefinition {
    pub id: String,
    /// Cron expression, evaluated in UTC.
    #[serde(alias = "cron")]
    pub cron_expression: String,
    pub subject: String,
    pub message: String,
}

/// Someone who can receive alarm notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub address: String,
}

/// A recipient's subscription to one alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub alarm_id: String,
    pub recipient: Recipient,
    pub active: bool,
    /// Token embedded in every notification so the recipient can opt out.
    pub deactivate_code: String,
}

/// An alarm together with a snapshot of its active subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmDelivery {
    pub alarm: AlarmDefinition,
    pub subscriptions: Vec<Subscription>,
}
