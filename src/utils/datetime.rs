use chrono::{
    DateTime, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike,
    Utc,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TimeSpecError;

/// Source of the current instant, injectable so fire times can be tested
pub trait Clock: Send + Sync {
    /// Current UTC instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A local time of day, persisted as `HH_MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeSpec(NaiveTime);

impl TimeSpec {
    /// Builds a time of day, validating hour and minute
    pub fn new(hour: u32, minute: u32) -> Result<Self, TimeSpecError> {
        if hour > 23 {
            return Err(TimeSpecError::HourOutOfRange(hour));
        }
        if minute > 59 {
            return Err(TimeSpecError::MinuteOutOfRange(minute));
        }
        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(TimeSpec)
            .ok_or_else(|| TimeSpecError::Malformed(format!("{hour}:{minute}")))
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }

    pub fn as_naive_time(&self) -> NaiveTime {
        self.0
    }

    /// `HH:MM`, the form shown to users
    pub fn clock_label(&self) -> String {
        format!("{:02}:{:02}", self.hour(), self.minute())
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}_{:02}", self.hour(), self.minute())
    }
}

impl FromStr for TimeSpec {
    type Err = TimeSpecError;

    /// Accepts both the stored `HH_MM` and the typed `HH:MM` forms
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let malformed = || TimeSpecError::Malformed(text.to_string());

        let (hour, minute) = text
            .split_once(|c| c == '_' || c == ':')
            .ok_or_else(malformed)?;

        let parse_part = |part: &str| -> Result<u32, TimeSpecError> {
            if part.is_empty() || part.len() > 2 || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(malformed());
            }
            part.parse().map_err(|_| malformed())
        };

        TimeSpec::new(parse_part(hour)?, parse_part(minute)?)
    }
}

/// How often a notification repeats after it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RepeatInterval {
    /// Fires once and is retired
    #[default]
    Once,
    Daily,
    Weekly,
    Monthly,
}

impl RepeatInterval {
    /// Persisted integer code: -1 once, 0 daily, 1 weekly, 2 monthly
    pub fn code(self) -> i64 {
        match self {
            RepeatInterval::Once => -1,
            RepeatInterval::Daily => 0,
            RepeatInterval::Weekly => 1,
            RepeatInterval::Monthly => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -1 => Some(RepeatInterval::Once),
            0 => Some(RepeatInterval::Daily),
            1 => Some(RepeatInterval::Weekly),
            2 => Some(RepeatInterval::Monthly),
            _ => None,
        }
    }

    pub fn is_repeating(self) -> bool {
        self != RepeatInterval::Once
    }

    pub fn label(self) -> &'static str {
        match self {
            RepeatInterval::Once => "once",
            RepeatInterval::Daily => "daily",
            RepeatInterval::Weekly => "weekly",
            RepeatInterval::Monthly => "monthly",
        }
    }

    /// Advances a local date-time by one interval step.
    ///
    /// Monthly steps keep the day of month, clamped to the last day of the
    /// target month (Jan 31 becomes Feb 28 or 29). Repeats step from the
    /// previous fire, so a clamped day stays clamped: Jan 31, Feb 29, Mar 29.
    pub fn advance(self, base: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            RepeatInterval::Once => Some(base),
            RepeatInterval::Daily => base.checked_add_signed(Duration::days(1)),
            RepeatInterval::Weekly => base.checked_add_signed(Duration::days(7)),
            RepeatInterval::Monthly => base.checked_add_months(Months::new(1)),
        }
    }
}

impl FromStr for RepeatInterval {
    type Err = TimeSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "once" | "none" | "-1" => Ok(RepeatInterval::Once),
            "daily" | "day" | "0" => Ok(RepeatInterval::Daily),
            "weekly" | "week" | "1" => Ok(RepeatInterval::Weekly),
            "monthly" | "month" | "2" => Ok(RepeatInterval::Monthly),
            other => Err(TimeSpecError::UnknownInterval(other.to_string())),
        }
    }
}

/// Fixed offset for a whole number of hours east of UTC
pub fn utc_offset(hours: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(hours.checked_mul(3600)?)
}

/// Calendar date at `now` in the configured local offset
pub fn local_date(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

fn local_to_utc(local: NaiveDateTime, offset: FixedOffset) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Moves a candidate that is not strictly in the future one day forward
pub fn roll_forward(candidate: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if candidate <= now {
        candidate + Duration::days(1)
    } else {
        candidate
    }
}

/// Next instant at which the local clock shows `time`
pub fn next_occurrence(
    time: TimeSpec,
    offset: FixedOffset,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    next_occurrence_after(time, RepeatInterval::Once, offset, now)
}

/// Today's occurrence of `time` advanced by one `interval` step, rolled
/// forward a day if that is still not in the future
pub fn next_occurrence_after(
    time: TimeSpec,
    interval: RepeatInterval,
    offset: FixedOffset,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    next_occurrence_from(time, interval, offset, now, now)
}

/// Like [`next_occurrence_after`], but the interval step starts from the
/// local date of `base` instead of the date of `now`
pub fn next_occurrence_from(
    time: TimeSpec,
    interval: RepeatInterval,
    offset: FixedOffset,
    base: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let base_day = local_date(base, offset).and_time(time.as_naive_time());
    let advanced = interval.advance(base_day)?;
    local_to_utc(advanced, offset).map(|candidate| roll_forward(candidate, now))
}

/// Sleep duration from `now` until `fire_at`, zero if already due
pub fn delay_until(fire_at: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
    (fire_at - now).to_std().unwrap_or_default()
}

pub fn format_datetime(dt: &DateTime<Utc>, offset: FixedOffset) -> String {
    dt.with_timezone(&offset).format("%d.%m.%Y %H:%M").to_string()
}
