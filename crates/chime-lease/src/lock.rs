//! Lease lock facade.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{HolderToken, LeaseError};

/// Default bound on a single store call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest lease a [`LeaseLock`] will request.
pub const MAX_LEASE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A shared key-value store able to run the two lease primitives atomically.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Set `key` to `holder` if absent, or refresh its expiry if already
    /// owned by `holder`. Returns whether the lease is now held by `holder`.
    async fn acquire_or_extend(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, LeaseError>;

    /// Delete `key` only if its value is `holder`. Returns whether a key was deleted.
    async fn release(&self, key: &str, holder: &str) -> Result<bool, LeaseError>;

    /// Current holder of `key`, if any.
    async fn holder(&self, key: &str) -> Result<Option<String>, LeaseError>;
}

/// Result of an acquire-or-extend attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    Granted,
    Denied,
}

impl LeaseOutcome {
    pub fn is_granted(self) -> bool {
        matches!(self, LeaseOutcome::Granted)
    }
}

/// Result of a release attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    Noop,
}

/// Fail-safe lease lock over a [`LeaseStore`].
///
/// Every store call is bounded by a timeout. Errors and timeouts are logged
/// and reported as `Denied` / `Noop`: when in doubt, assume the lease is not held.
#[derive(Clone)]
pub struct LeaseLock {
    store: Arc<dyn LeaseStore>,
    call_timeout: Duration,
}

impl LeaseLock {
    /// Create a lock with the default call timeout.
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self {
            store,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Override the per-call timeout.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Acquire `key` for `holder`, or extend it if `holder` already owns it.
    #[tracing::instrument(skip(self, holder), fields(holder = %holder))]
    pub async fn acquire_or_extend(
        &self,
        key: &str,
        holder: &HolderToken,
        ttl: Duration,
    ) -> LeaseOutcome {
        if ttl.is_zero() {
            warn!(key, "refusing lease with zero ttl");
            return LeaseOutcome::Denied;
        }
        if ttl > MAX_LEASE_TTL {
            warn!(key, ttl_secs = ttl.as_secs(), "refusing lease longer than the maximum ttl");
            return LeaseOutcome::Denied;
        }

        let call = self.store.acquire_or_extend(key, holder.as_str(), ttl);
        match timeout(self.call_timeout, call).await {
            Ok(Ok(true)) => {
                debug!(key, "lease granted");
                LeaseOutcome::Granted
            }
            Ok(Ok(false)) => {
                debug!(key, "lease held by another holder");
                LeaseOutcome::Denied
            }
            Ok(Err(e)) => {
                warn!(key, error = %e, "lease store error, assuming lease is not held");
                LeaseOutcome::Denied
            }
            Err(_) => {
                warn!(
                    key,
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "lease store timed out, assuming lease is not held"
                );
                LeaseOutcome::Denied
            }
        }
    }

    /// Release `key` if and only if `holder` currently owns it.
    #[tracing::instrument(skip(self, holder), fields(holder = %holder))]
    pub async fn release(&self, key: &str, holder: &HolderToken) -> ReleaseOutcome {
        match timeout(self.call_timeout, self.store.release(key, holder.as_str())).await {
            Ok(Ok(true)) => {
                debug!(key, "lease released");
                ReleaseOutcome::Released
            }
            Ok(Ok(false)) => ReleaseOutcome::Noop,
            Ok(Err(e)) => {
                warn!(key, error = %e, "failed to release lease");
                ReleaseOutcome::Noop
            }
            Err(_) => {
                warn!(key, "lease release timed out");
                ReleaseOutcome::Noop
            }
        }
    }

    /// Read the current holder of `key`.
    ///
    /// Unlike the lease operations this is diagnostic, so failures are returned.
    pub async fn holder(&self, key: &str) -> Result<Option<String>, LeaseError> {
        timeout(self.call_timeout, self.store.holder(key))
            .await
            .map_err(|_| LeaseError::Timeout(self.call_timeout))?
    }
}
