//! Cron expression parsing.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::SchedulerError;

/// Parse a cron expression into a [`Schedule`].
///
/// Five fields are read as classic minute-precision cron and fire at second 0.
/// Six or seven fields start with seconds (and may end with a year).
pub fn parse_cron(expression: &str) -> Result<Schedule, SchedulerError> {
    let fields = expression.split_whitespace().count();
    let normalized = match fields {
        5 => format!("0 {}", expression.trim()),
        6 | 7 => expression.trim().to_string(),
        _ => {
            return Err(SchedulerError::InvalidCron {
                expression: expression.to_string(),
                reason: format!("expected 5, 6 or 7 fields, found {fields}"),
            });
        }
    };

    Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// First occurrence strictly after `from`, in UTC.
pub(crate) fn next_after(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&from).next()
}
