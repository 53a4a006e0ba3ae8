//! Next-due computation for the two repeat policies a task can carry.
//!
//! Everything in here is pure: no clock is read and nothing is mutated. Callers pass the
//! reference instant explicitly.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;
use std::str::FromStr;

/// Errors raised while validating a cron expression.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RecurrenceError {
    /// The expression does not parse as six-field (seconds-first) cron syntax.
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },
    /// The expression parses but has no firing after the given instant.
    #[error("Cron expression '{0}' never fires")]
    NeverFires(String),
}

/// A parsed, validated cron expression that remembers its source text.
///
/// Serializes as the plain source string and re-validates on deserialization.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CronExpression {
    source: String,
    schedule: cron::Schedule,
}

impl CronExpression {
    /// Returns the expression as it was written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Next firing strictly after `instant`, if the schedule has one left.
    pub fn next_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&instant).next()
    }
}

impl FromStr for CronExpression {
    type Err = RecurrenceError;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let trimmed = expression.trim();
        let schedule =
            cron::Schedule::from_str(trimmed).map_err(|e| RecurrenceError::InvalidCron {
                expression: trimmed.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            source: trimmed.to_string(),
            schedule,
        })
    }
}

impl TryFrom<String> for CronExpression {
    type Error = RecurrenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CronExpression> for String {
    fn from(value: CronExpression) -> Self {
        value.source
    }
}

impl PartialEq for CronExpression {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for CronExpression {}

impl Display for CronExpression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// How a task's next due time is derived once the previous occurrence is done.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepeatPolicy {
    /// Due again a fixed number of hours after completion.
    FixedInterval { hours: NonZeroU32 },
    /// Due at the schedule's next firing after completion.
    CronSchedule { expression: CronExpression },
}

/// Why the next due time is being computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Occasion {
    /// The task is being constructed; the reference is the current time.
    Creation,
    /// The previous occurrence completed at the reference time.
    Completion,
}

/// Computes the next due timestamp for `policy`.
///
/// Fixed intervals start immediately due on creation and otherwise land exactly `hours`
/// after the reference. Cron schedules always land on a firing strictly after the
/// reference. A result that cannot be represented, or a schedule with no firings left,
/// parks the task at [`DateTime::<Utc>::MAX_UTC`].
pub fn compute_next(
    policy: &RepeatPolicy,
    reference: DateTime<Utc>,
    occasion: Occasion,
) -> DateTime<Utc> {
    match (policy, occasion) {
        (RepeatPolicy::FixedInterval { .. }, Occasion::Creation) => reference,
        (RepeatPolicy::FixedInterval { hours }, Occasion::Completion) => {
            TimeDelta::try_hours(i64::from(hours.get()))
                .and_then(|interval| reference.checked_add_signed(interval))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        }
        (RepeatPolicy::CronSchedule { expression }, _) => {
            expression.next_after(reference).unwrap_or_else(|| {
                tracing::warn!(cron = %expression, "cron schedule has no firings left");
                DateTime::<Utc>::MAX_UTC
            })
        }
    }
}
