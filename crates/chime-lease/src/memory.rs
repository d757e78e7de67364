//! In-process lease store.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

use crate::{LeaseError, LeaseStore};

#[derive(Debug, Clone)]
struct LeaseEntry {
    holder: String,
    expires_at: Instant,
}

impl LeaseEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Lease table with explicit clock.
///
/// Each operation runs under the entry lock of its key, so the
/// check-then-act of acquire-or-extend is atomic per key.
#[derive(Debug, Default)]
pub struct LeaseTable {
    entries: DashMap<String, LeaseEntry>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire_or_extend_at(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
        now: Instant,
    ) -> bool {
        let Some(expires_at) = now.checked_add(ttl) else {
            return false;
        };
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_live(now) && entry.holder != holder {
                    return false;
                }
                entry.holder = holder.to_string();
                entry.expires_at = expires_at;
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LeaseEntry {
                    holder: holder.to_string(),
                    expires_at,
                });
                true
            }
        }
    }

    pub fn release_at(&self, key: &str, holder: &str, now: Instant) -> bool {
        self.entries
            .remove_if(key, |_, entry| entry.is_live(now) && entry.holder == holder)
            .is_some()
    }

    pub fn holder_at(&self, key: &str, now: Instant) -> Option<String> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.holder.clone())
    }
}

/// [`LeaseStore`] backed by a [`LeaseTable`] and the tokio clock.
///
/// Useful for single-process deployments and tests; it coordinates only
/// callers sharing the same instance.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    table: LeaseTable,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn acquire_or_extend(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, LeaseError> {
        Ok(self
            .table
            .acquire_or_extend_at(key, holder, ttl, Instant::now()))
    }

    async fn release(&self, key: &str, holder: &str) -> Result<bool, LeaseError> {
        Ok(self.table.release_at(key, holder, Instant::now()))
    }

    async fn holder(&self, key: &str) -> Result<Option<String>, LeaseError> {
        Ok(self.table.holder_at(key, Instant::now()))
    }
}
