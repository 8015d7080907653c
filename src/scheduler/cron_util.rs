//! Cron expression handling
//!
//! Tasks carry standard 5-field cron expressions; the parser crate wants a
//! seconds field, so a zero is prepended before parsing.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{Error, Result};
use crate::model::{ScheduleKind, ScheduledTask};

/// Parse a 5-field cron expression.
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() != 5 {
        return Err(Error::InvalidArgument(format!(
            "cron expression {:?} must have 5 fields",
            expr
        )));
    }

    let with_seconds = format!("0 {}", trimmed);
    Schedule::from_str(&with_seconds)
        .map_err(|e| Error::InvalidArgument(format!("invalid cron expression {:?}: {}", expr, e)))
}

/// The first fire time strictly after `now`, or None for an unparsable
/// expression.
pub fn next_cron_after(expr: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    parse_cron(expr).ok()?.after(&now).next()
}

/// The first `next_run` for a newly created or re-enabled task.
pub fn initial_next_run(task: &ScheduledTask, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    match task.schedule {
        ScheduleKind::Cron => {
            let expr = task
                .cron_expr
                .as_deref()
                .ok_or_else(|| Error::InvalidArgument("cron tasks require cron_expr".into()))?;
            Ok(parse_cron(expr)?.after(&now).next())
        }
        ScheduleKind::Interval => {
            let secs = task
                .interval_secs
                .ok_or_else(|| Error::InvalidArgument("interval tasks require interval_secs".into()))?;
            if secs == 0 {
                return Err(Error::InvalidArgument("interval must be non-zero".into()));
            }
            Ok(Some(now + chrono::Duration::seconds(secs as i64)))
        }
        ScheduleKind::Once => {
            let run_at = task
                .run_at
                .ok_or_else(|| Error::InvalidArgument("once tasks require run_at".into()))?;
            Ok(Some(run_at))
        }
    }
}
