//! Cron schedule parsing and next-fire computation.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::DaemonError;

/// Convert a Unix cron expression to the expressions the `cron` crate needs.
///
/// 5-field format: minute hour day-of-month month day-of-week
/// 6-field format: second minute hour day-of-month month day-of-week
/// 7-field format: second minute hour day-of-month month day-of-week year
///
/// The `cron` crate numbers weekdays 1-7 from Sunday while Unix cron uses
/// 0-6 (and accepts 7 for Sunday), so numeric day-of-week items are shifted.
/// Unix cron fires when *either* day field matches once both are restricted;
/// the crate requires both, so that case becomes two schedules.
///
/// 7-field expressions and `@` descriptors are already in the crate's
/// grammar and pass through as-is.
fn to_cron_crate_format(expression: &str) -> Vec<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let (seconds, minute, hour, dom, month, dow) = match fields.as_slice() {
        [minute, hour, dom, month, dow] => ("0", *minute, *hour, *dom, *month, *dow),
        [seconds, minute, hour, dom, month, dow] => (*seconds, *minute, *hour, *dom, *month, *dow),
        _ => return vec![expression.trim().to_string()],
    };
    let dow = translate_day_of_week(dow);

    if is_unrestricted(dom) || is_unrestricted(&dow) {
        vec![format!("{seconds} {minute} {hour} {dom} {month} {dow} *")]
    } else {
        vec![
            format!("{seconds} {minute} {hour} {dom} {month} * *"),
            format!("{seconds} {minute} {hour} * {month} {dow} *"),
        ]
    }
}

fn is_unrestricted(field: &str) -> bool {
    field == "*" || field == "?"
}

fn translate_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            if is_unrestricted(item) || item.chars().any(|c| c.is_ascii_alphabetic()) {
                return item.to_string();
            }
            match unix_weekdays(item) {
                Some(days) => days
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
                // Left for the crate to reject.
                None => item.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Expand one numeric day-of-week item (`n`, `a-b`, `*/s`, `a-b/s`, `n/s`)
/// to `cron` crate weekday numbers.
fn unix_weekdays(item: &str) -> Option<BTreeSet<u32>> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, step.parse::<usize>().ok().filter(|s| *s > 0)?),
        None => (item, 1),
    };
    let (start, end): (u32, u32) = match range.split_once('-') {
        _ if range == "*" => (0, 6),
        Some((start, end)) => (start.parse().ok()?, end.parse().ok()?),
        None => {
            let day = range.parse().ok()?;
            // `n/s` runs from `n` to the end of the week.
            (day, if step > 1 { 6 } else { day })
        }
    };
    if start > end || end > 7 {
        return None;
    }
    Some((start..=end).step_by(step).map(|day| day % 7 + 1).collect())
}

/// A validated cron schedule deciding when reconciliation cycles fire.
#[derive(Debug, Clone)]
pub struct CycleSchedule {
    expression: String,
    schedules: Vec<Schedule>,
}

impl CycleSchedule {
    /// Parse a 5-field (minute precision) or 6/7-field (second precision) expression.
    pub fn parse(expression: &str) -> Result<Self, DaemonError> {
        let schedules = to_cron_crate_format(expression)
            .iter()
            .map(|converted| Schedule::from_str(converted))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| DaemonError::Schedule {
                expression: expression.to_string(),
                source,
            })?;
        Ok(Self {
            expression: expression.to_string(),
            schedules,
        })
    }

    /// The expression as configured.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(after).next())
            .min()
    }

    /// Like [`next_after`](Self::next_after), but a schedule whose last fire
    /// time is already behind `now` (e.g. a pinned past year) is an error.
    pub fn upcoming(&self, now: &DateTime<Utc>) -> Result<DateTime<Utc>, DaemonError> {
        self.next_after(now)
            .ok_or_else(|| DaemonError::ScheduleExhausted {
                expression: self.expression.clone(),
            })
    }

    /// Time to wait from `now` until `next`; zero if `next` already passed.
    pub fn delay_until(now: DateTime<Utc>, next: DateTime<Utc>) -> Duration {
        (next - now).to_std().unwrap_or(Duration::ZERO)
    }
}
