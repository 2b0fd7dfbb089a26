//! Five-field cron expressions evaluated in UTC.
//!
//! Fields are `minute hour day-of-month month day-of-week`; each accepts `*`,
//! `*/n`, `a`, `a-b`, `a-b/n`, `a/n` and comma-separated lists. Day-of-week
//! runs 0-7 with both 0 and 7 meaning Sunday. When both day fields are
//! restricted a day matches if either does, as in classic cron.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use time::{Date, PrimitiveDateTime, Time};

use crate::domain::UtcDateTime;

/// How far ahead [`CronSchedule::next_after`] searches before giving up.
const SEARCH_DAYS: u32 = 366 * 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cron expression '{expression}': {reason}")]
pub struct CronError {
    pub expression: String,
    pub reason: String,
}

/// Parsed cron schedule. Each field is a bitmask of permitted values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let error = |reason: String| CronError {
            expression: expression.to_owned(),
            reason,
        };

        let fields = expression.split_whitespace().collect::<Vec<_>>();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(error(format!("expected 5 fields, found {}", fields.len())));
        };

        let mut days_of_week = parse_field(dow, 0, 7).map_err(|r| error(format!("day-of-week: {r}")))?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            expression: fields.join(" "),
            minutes: parse_field(minute, 0, 59).map_err(|r| error(format!("minute: {r}")))?,
            hours: parse_field(hour, 0, 23).map_err(|r| error(format!("hour: {r}")))?,
            days_of_month: parse_field(dom, 1, 31)
                .map_err(|r| error(format!("day-of-month: {r}")))?,
            months: parse_field(month, 1, 12).map_err(|r| error(format!("month: {r}")))?,
            days_of_week,
            dom_restricted: *dom != "*",
            dow_restricted: *dow != "*",
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First matching minute strictly after `after`.
    pub fn next_after(&self, after: UtcDateTime) -> Option<UtcDateTime> {
        let after = after.into_inner();
        let start = PrimitiveDateTime::new(
            after.date(),
            Time::from_hms(after.hour(), after.minute(), 0).ok()?,
        )
        .checked_add(time::Duration::minutes(1))?;
        let last_day = start.date().checked_add(time::Duration::days(i64::from(SEARCH_DAYS)))?;

        let mut candidate = start;
        while candidate.date() <= last_day {
            if !self.day_matches(candidate.date()) {
                candidate = PrimitiveDateTime::new(candidate.date().next_day()?, Time::MIDNIGHT);
                continue;
            }
            if !bit(self.hours, candidate.hour()) {
                let next_hour = PrimitiveDateTime::new(
                    candidate.date(),
                    Time::from_hms(candidate.hour(), 0, 0).ok()?,
                );
                candidate = next_hour.checked_add(time::Duration::hours(1))?;
                continue;
            }
            if !bit(self.minutes, candidate.minute()) {
                candidate = candidate.checked_add(time::Duration::minutes(1))?;
                continue;
            }
            return Some(UtcDateTime::from_naive_utc(candidate));
        }

        None
    }

    fn day_matches(&self, date: Date) -> bool {
        if !bit(self.months, u8::from(date.month())) {
            return false;
        }
        let dom = bit(self.days_of_month, date.day());
        let dow = bit(self.days_of_week, date.weekday().number_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl Display for CronSchedule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expression)
    }
}

fn bit(mask: u64, value: u8) -> bool {
    mask & (1u64 << value) != 0
}

fn parse_field(raw: &str, min: u8, max: u8) -> Result<u64, String> {
    let mut mask = 0u64;
    for item in raw.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step = parse_number(step)?;
                if step == 0 {
                    return Err(String::from("step must be positive"));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (low, high) = if range == "*" {
            (min, max)
        } else if let Some((low, high)) = range.split_once('-') {
            (parse_number(low)?, parse_number(high)?)
        } else {
            let value = parse_number(range)?;
            // `a/n` runs from `a` to the end of the field.
            (value, if step.is_some() { max } else { value })
        };

        if low < min || high > max || low > high {
            return Err(format!("'{item}' is outside {min}-{max}"));
        }

        let step = usize::from(step.unwrap_or(1));
        for value in (low..=high).step_by(step) {
            mask |= 1u64 << value;
        }
    }
    Ok(mask)
}

fn parse_number(raw: &str) -> Result<u8, String> {
    raw.trim()
        .parse::<u8>()
        .map_err(|_| format!("'{raw}' is not a number"))
}
