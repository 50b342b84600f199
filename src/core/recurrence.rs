//! Five-field recurrence rules (`minute hour day-of-month month day-of-week`).
//!
//! Each field accepts `*`, a number, a range `a-b`, a step `*/n` or `a-b/n`,
//! and comma-separated lists of those. Day-of-week runs 0-6 from Sunday;
//! `7` is accepted as Sunday. When both day fields are restricted a day
//! matches if either one does.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Searching stops after this many days without a match.
const SEARCH_HORIZON_DAYS: i64 = 366 * 5;

/// Rule parse failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// Wrong number of fields.
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),
    /// A field did not parse.
    #[error("invalid {field} field `{value}`: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Offending text.
        value: String,
        /// What went wrong.
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CronField {
    bits: u64,
    restricted: bool,
}

impl CronField {
    fn parse(text: &str, name: &'static str, min: u32, max: u32) -> Result<Self, RuleError> {
        let invalid = |reason: String| RuleError::InvalidField {
            field: name,
            value: text.to_string(),
            reason,
        };
        let number = |s: &str| -> Result<u32, RuleError> {
            let n: u32 = s
                .parse()
                .map_err(|_| invalid(format!("`{s}` is not a number")))?;
            if n < min || n > max {
                return Err(invalid(format!("{n} outside {min}-{max}")));
            }
            Ok(n)
        };

        let mut bits = 0u64;
        let mut restricted = false;
        for part in text.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| invalid(format!("bad step `{step}`")))?;
                    if step == 0 {
                        return Err(invalid("step must be positive".into()));
                    }
                    if step > max - min {
                        return Err(invalid(format!("step {step} exceeds the field span")));
                    }
                    (range, step)
                }
                None => (part, 1),
            };
            let (lo, hi) = if range == "*" {
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                let (a, b) = (number(a)?, number(b)?);
                if a > b {
                    return Err(invalid(format!("range {a}-{b} is reversed")));
                }
                (a, b)
            } else {
                let n = number(range)?;
                (n, if step > 1 { max } else { n })
            };
            if range != "*" || step > 1 {
                restricted = true;
            }
            let mut v = lo;
            while v <= hi {
                bits |= 1 << v;
                v += step;
            }
        }
        Ok(Self { bits, restricted })
    }

    const fn contains(self, v: u32) -> bool {
        v < 64 && self.bits & (1 << v) != 0
    }
}

/// Parsed recurrence rule. Serializes as its textual form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecurrenceRule {
    source: String,
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl RecurrenceRule {
    /// Parses `minute hour day-of-month month day-of-week`.
    pub fn parse(text: &str) -> Result<Self, RuleError> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(RuleError::FieldCount(fields.len()));
        };
        let mut day_of_week = CronField::parse(dow, "day-of-week", 0, 7)?;
        if day_of_week.contains(7) {
            day_of_week.bits = (day_of_week.bits & !(1 << 7)) | 1;
        }
        Ok(Self {
            source: fields.join(" "),
            minute: CronField::parse(minute, "minute", 0, 59)?,
            hour: CronField::parse(hour, "hour", 0, 23)?,
            day_of_month: CronField::parse(dom, "day-of-month", 1, 31)?,
            month: CronField::parse(month, "month", 1, 12)?,
            day_of_week,
        })
    }

    /// Every day at `hour:minute`.
    pub fn daily_at(hour: u32, minute: u32) -> Result<Self, RuleError> {
        Self::parse(&format!("{minute} {hour} * * *"))
    }

    /// On `day` of every month at `hour:minute`.
    pub fn monthly_on(day: u32, hour: u32, minute: u32) -> Result<Self, RuleError> {
        Self::parse(&format!("{minute} {hour} {day} * *"))
    }

    /// Whether the rule fires at this wall-clock minute.
    pub fn matches<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        self.minute.contains(at.minute())
            && self.hour.contains(at.hour())
            && self.month.contains(at.month())
            && self.day_matches(at.day(), at.weekday().num_days_from_sunday())
    }

    fn day_matches(&self, dom: u32, dow: u32) -> bool {
        let by_dom = self.day_of_month.contains(dom);
        let by_dow = self.day_of_week.contains(dow);
        if self.day_of_month.restricted && self.day_of_week.restricted {
            by_dom || by_dow
        } else {
            by_dom && by_dow
        }
    }

    /// First matching minute strictly after `after`, evaluated in `offset`.
    pub fn next_after(&self, after: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&offset);
        let start = local
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))?
            + Duration::minutes(1);
        let first_day = start.date_naive();

        for day_offset in 0..SEARCH_HORIZON_DAYS {
            let date = first_day + Duration::days(day_offset);
            if !self.month.contains(date.month())
                || !self.day_matches(date.day(), date.weekday().num_days_from_sunday())
            {
                continue;
            }
            let floor = (day_offset == 0).then(|| (start.hour(), start.minute()));
            if let Some(found) = self.first_time_on(date, floor, offset) {
                return Some(found);
            }
        }
        None
    }

    fn first_time_on(
        &self,
        date: NaiveDate,
        floor: Option<(u32, u32)>,
        offset: FixedOffset,
    ) -> Option<DateTime<Utc>> {
        let (min_hour, min_minute) = floor.unwrap_or((0, 0));
        for hour in (min_hour..24).filter(|h| self.hour.contains(*h)) {
            let from = if hour == min_hour { min_minute } else { 0 };
            if let Some(minute) = (from..60).find(|m| self.minute.contains(*m)) {
                let naive = date.and_hms_opt(hour, minute, 0)?;
                return offset
                    .from_local_datetime(&naive)
                    .single()
                    .map(|t| t.with_timezone(&Utc));
            }
        }
        None
    }

    /// Textual form.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for RecurrenceRule {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RecurrenceRule {
    type Error = RuleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RecurrenceRule> for String {
    fn from(rule: RecurrenceRule) -> Self {
        rule.source
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
