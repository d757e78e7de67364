//! Scheduler types.

use std::time::Duration;

use chime_lease::MAX_LEASE_TTL;

use crate::SchedulerError;

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Shared key all scheduler instances compete for.
    pub lease_key: String,
    /// How often the lease is renewed and the registry reconciled.
    pub tick_interval: Duration,
    /// Lease lifetime. Must exceed `tick_interval` so a live leader renews in time.
    pub lease_ttl: Duration,
    /// Bound on a single lease store call. Must be shorter than `tick_interval`.
    pub lock_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lease_key: "alarmLeader:lock".to_string(),
            tick_interval: Duration::from_secs(5),
            lease_ttl: Duration::from_secs(10),
            lock_timeout: Duration::from_secs(2),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.lease_key.is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "lease key must not be empty".to_string(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "tick interval must be positive".to_string(),
            ));
        }
        if self.lease_ttl <= self.tick_interval {
            return Err(SchedulerError::InvalidConfig(format!(
                "lease ttl ({:?}) must be longer than the tick interval ({:?})",
                self.lease_ttl, self.tick_interval
            )));
        }
        if self.lease_ttl > MAX_LEASE_TTL {
            return Err(SchedulerError::InvalidConfig(format!(
                "lease ttl ({:?}) must not exceed {:?}",
                self.lease_ttl, MAX_LEASE_TTL
            )));
        }
        if self.lock_timeout.is_zero() || self.lock_timeout >= self.tick_interval {
            return Err(SchedulerError::InvalidConfig(format!(
                "lock timeout ({:?}) must be positive and shorter than the tick interval ({:?})",
                self.lock_timeout, self.tick_interval
            )));
        }
        Ok(())
    }
}

/// Whether this instance currently owns cron dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Role {
    #[default]
    Follower,
    Leader,
}

/// What one reconcile pass changed, counted in alarms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Alarms skipped because their cron expression was rejected.
    pub failed: usize,
}

impl ReconcileReport {
    /// Whether the pass changed any timer.
    pub fn changed(&self) -> bool {
        self.added + self.updated + self.removed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        SchedulerConfig::default().validate().unwrap();
    }

    #[test]
    fn ttl_must_exceed_tick() {
        let config = SchedulerConfig {
            lease_ttl: Duration::from_secs(5),
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn ttl_is_bounded_above() {
        let config = SchedulerConfig {
            lease_ttl: Duration::from_secs(u64::MAX),
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::InvalidConfig(_))
        ));

        let config = SchedulerConfig {
            lease_ttl: MAX_LEASE_TTL,
            ..SchedulerConfig::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn lock_timeout_must_fit_in_tick() {
        let config = SchedulerConfig {
            lock_timeout: Duration::from_secs(5),
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn empty_lease_key_is_rejected() {
        let config = SchedulerConfig {
            lease_key: String::new(),
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn report_changed() {
        assert!(!ReconcileReport::default().changed());
        assert!(
            ReconcileReport {
                removed: 1,
                ..ReconcileReport::default()
            }
            .changed()
        );
    }
}
