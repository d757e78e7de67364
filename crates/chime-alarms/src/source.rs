//! The read interface consumed by the scheduler and worker.

use async_trait::async_trait;

use crate::{AlarmDefinition, AlarmDelivery, AlarmError, Recipient};

/// Read access to alarm definitions and their recipients.
#[async_trait]
pub trait AlarmSource: Send + Sync {
    /// Every alarm definition currently stored.
    async fn list_all(&self) -> Result<Vec<AlarmDefinition>, AlarmError>;

    /// One alarm with its active subscriptions, or `None` if it no longer exists.
    async fn get_alarm(&self, id: &str) -> Result<Option<AlarmDelivery>, AlarmError>;

    /// Recipients with an active subscription to `id`.
    async fn active_recipients(&self, id: &str) -> Result<Vec<Recipient>, AlarmError> {
        Ok(self
            .get_alarm(id)
            .await?
            .map(|delivery| {
                delivery
                    .subscriptions
                    .into_iter()
                    .map(|subscription| subscription.recipient)
                    .collect()
            })
            .unwrap_or_default())
    }
}
