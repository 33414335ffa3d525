//! Cron schedules evaluated in an IANA timezone.
//!
//! Parsing and occurrence search are done by `croner`: five fields
//! (`minute hour day-of-month month day-of-week`) with ranges, steps, lists,
//! month and weekday names, and the `@hourly`/`@daily`/`@weekly`/`@monthly`/
//! `@yearly` shorthands. When both day fields are restricted a day matches if
//! either does.

use crate::error::ScheduleError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use croner::Cron;
use rootcause::Report;
use std::fmt;

/// Timezone used when none is configured.
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// A parsed cron schedule.
#[derive(Clone)]
pub struct CronSchedule {
    expression: String,
    timezone: Tz,
    cron: Cron,
}

impl CronSchedule {
    /// Parses `expression`, evaluated in `timezone`.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression is malformed or the timezone is not
    /// a known IANA name.
    pub fn parse(expression: &str, timezone: &str) -> Result<Self, Report<ScheduleError>> {
        let timezone: Tz = timezone
            .trim()
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone {
                timezone: timezone.to_string(),
            })?;

        let trimmed = expression.trim();
        let cron = Cron::new(trimmed)
            .parse()
            .map_err(|e| ScheduleError::InvalidCronExpression {
                expression: trimmed.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            expression: trimmed.to_string(),
            timezone,
            cron,
        })
    }

    /// Returns the expression as written.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Returns the evaluation timezone.
    #[must_use]
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Returns the first fire time strictly after `after`, or `None` if the
    /// schedule never matches again (e.g. February 30th).
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.timezone);
        self.cron
            .find_next_occurrence(&local, false)
            .ok()
            .map(|fire| fire.with_timezone(&Utc))
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronSchedule")
            .field("expression", &self.expression)
            .field("timezone", &self.timezone.name())
            .finish()
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression && self.timezone == other.timezone
    }
}

impl Eq for CronSchedule {}
