//! JSON-file alarm source.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::{AlarmDefinition, AlarmDelivery, AlarmError, AlarmSource, Recipient, Subscription};

/// On-disk shape of the alarm document.
#[derive(Debug, Default, Deserialize)]
struct AlarmDocument {
    #[serde(default)]
    alarms: Vec<AlarmEntry>,
}

#[derive(Debug, Deserialize)]
struct AlarmEntry {
    #[serde(flatten)]
    definition: AlarmDefinition,
    #[serde(default)]
    subscriptions: Vec<SubscriptionEntry>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionEntry {
    recipient_id: String,
    address: String,
    #[serde(default = "default_active")]
    active: bool,
    deactivate_code: String,
}

fn default_active() -> bool {
    true
}

impl AlarmEntry {
    fn into_delivery(self) -> AlarmDelivery {
        let alarm_id = self.definition.id.clone();
        let subscriptions = self
            .subscriptions
            .into_iter()
            .filter(|s| s.active)
            .map(|s| Subscription {
                alarm_id: alarm_id.clone(),
                recipient: Recipient {
                    id: s.recipient_id,
                    address: s.address,
                },
                active: s.active,
                deactivate_code: s.deactivate_code,
            })
            .collect();
        AlarmDelivery {
            alarm: self.definition,
            subscriptions,
        }
    }
}

/// Alarm source that re-reads a JSON document on every call.
///
/// Edits made to the file by other tools are picked up on the next read,
/// which for the scheduler means within one tick.
#[derive(Debug, Clone)]
pub struct FileAlarmStore {
    path: PathBuf,
}

impl FileAlarmStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<AlarmDocument, AlarmError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| AlarmError::Io {
                path: self.path.clone(),
                source,
            })?;
        let document: AlarmDocument = serde_json::from_slice(&bytes)?;
        debug!(path = %self.path.display(), count = document.alarms.len(), "loaded alarm document");
        Ok(document)
    }
}

#[async_trait]
impl AlarmSource for FileAlarmStore {
    async fn list_all(&self) -> Result<Vec<AlarmDefinition>, AlarmError> {
        Ok(self
            .load()
            .await?
            .alarms
            .into_iter()
            .map(|entry| entry.definition)
            .collect())
    }

    /// A duplicated id resolves to its last entry, as in reconciliation.
    async fn get_alarm(&self, id: &str) -> Result<Option<AlarmDelivery>, AlarmError> {
        Ok(self
            .load()
            .await?
            .alarms
            .into_iter()
            .rev()
            .find(|entry| entry.definition.id == id)
            .map(AlarmEntry::into_delivery))
    }
}
