use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Ms;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    #[error("invalid {field}: {value:?}")]
    InvalidFormat { field: &'static str, value: String },
    #[error("step must be positive, got {0} minutes")]
    InvalidStep(i64),
    #[error("end {end} must be after start {start}")]
    InvalidRange { start: TimeOfDay, end: TimeOfDay },
}

impl TimeError {
    fn format(field: &'static str, value: &str) -> Self {
        TimeError::InvalidFormat {
            field,
            value: value.to_string(),
        }
    }
}

/// Minute-precision time of day, `00:00..=23:59`.
///
/// Exchanged as a zero-padded 24-hour `HH:MM` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self((hour * 60 + minute) as u16))
        } else {
            None
        }
    }

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        (minutes < MINUTES_PER_DAY).then_some(Self(minutes as u16))
    }

    /// Minutes since midnight.
    pub fn minutes(self) -> u32 {
        u32::from(self.0)
    }

    pub fn hour(self) -> u32 {
        self.minutes() / 60
    }

    pub fn minute(self) -> u32 {
        self.minutes() % 60
    }

    pub fn checked_add_minutes(self, minutes: u32) -> Option<Self> {
        self.minutes()
            .checked_add(minutes)
            .and_then(Self::from_minutes)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for TimeOfDay {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_time_of_day(s)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = TimeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        parse_time_of_day(&s)
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

/// Strict `HH:MM` (24-hour, zero-padded). `9:00`, `09:0` and `24:00` are rejected.
///
/// The latest representable time is `23:59`, so no window can end at midnight;
/// a day's last slot ends at 23:59 at the latest.
pub fn parse_time_of_day(s: &str) -> Result<TimeOfDay, TimeError> {
    let bad = || TimeError::format("time of day", s);
    let b = s.as_bytes();
    if b.len() != 5 || b[2] != b':' {
        return Err(bad());
    }
    let digit = |c: u8| c.is_ascii_digit().then(|| u32::from(c - b'0'));
    let (Some(h1), Some(h2), Some(m1), Some(m2)) =
        (digit(b[0]), digit(b[1]), digit(b[3]), digit(b[4]))
    else {
        return Err(bad());
    };
    TimeOfDay::from_hm(h1 * 10 + h2, m1 * 10 + m2).ok_or_else(bad)
}

/// Half-open overlap test: `[a_start, a_end)` and `[b_start, b_end)` share at least one point.
pub fn range_overlaps<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && b_start < a_end
}

/// Evenly spaced boundaries `start, start+step, start+2*step, …` never past `end`.
///
/// `include_start` controls whether `start` itself is emitted; `include_end`
/// controls whether a boundary landing exactly on `end` is emitted.
pub fn generate_boundaries(
    start: TimeOfDay,
    end: TimeOfDay,
    step_minutes: i64,
    include_start: bool,
    include_end: bool,
) -> Result<Vec<TimeOfDay>, TimeError> {
    if step_minutes <= 0 {
        return Err(TimeError::InvalidStep(step_minutes));
    }
    if end <= start {
        return Err(TimeError::InvalidRange { start, end });
    }

    let step = step_minutes as u64;
    let end_m = u64::from(end.minutes());
    let mut current = u64::from(start.minutes());
    let mut boundaries = Vec::new();
    if include_start {
        boundaries.push(start);
    }
    loop {
        current += step;
        if current > end_m || (current == end_m && !include_end) {
            break;
        }
        boundaries.push(TimeOfDay(current as u16));
    }
    Ok(boundaries)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Monday => "MONDAY",
            DayOfWeek::Tuesday => "TUESDAY",
            DayOfWeek::Wednesday => "WEDNESDAY",
            DayOfWeek::Thursday => "THURSDAY",
            DayOfWeek::Friday => "FRIDAY",
            DayOfWeek::Saturday => "SATURDAY",
            DayOfWeek::Sunday => "SUNDAY",
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DayOfWeek {
    type Err = TimeError;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MONDAY" => Ok(DayOfWeek::Monday),
            "TUESDAY" => Ok(DayOfWeek::Tuesday),
            "WEDNESDAY" => Ok(DayOfWeek::Wednesday),
            "THURSDAY" => Ok(DayOfWeek::Thursday),
            "FRIDAY" => Ok(DayOfWeek::Friday),
            "SATURDAY" => Ok(DayOfWeek::Saturday),
            "SUNDAY" => Ok(DayOfWeek::Sunday),
            _ => Err(TimeError::format("day of week", s)),
        }
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(w: Weekday) -> Self {
        match w {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}

/// Calendar date from `YYYY-MM-DD`, `DD-MM-YYYY`, RFC 3339 or `YYYY-MM-DDTHH:MM`.
pub fn parse_date(s: &str) -> Result<NaiveDate, TimeError> {
    let trimmed = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%d-%m-%Y") {
        return Ok(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M") {
        return Ok(dt.date());
    }
    Err(TimeError::format("date", s))
}

/// ISO-8601 instant with an explicit offset or `Z`.
pub fn parse_instant(s: &str) -> Result<DateTime<FixedOffset>, TimeError> {
    DateTime::parse_from_rfc3339(s.trim()).map_err(|_| TimeError::format("instant", s))
}

/// Wall-clock view of a unix-ms instant at a fixed offset.
pub fn wall_clock(ms: Ms, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.with_timezone(&offset))
}

/// Unix ms of `date` at `time` on the wall clock of `offset`.
pub fn local_instant_ms(date: NaiveDate, time: TimeOfDay, offset: FixedOffset) -> Option<Ms> {
    date.and_hms_opt(time.hour(), time.minute(), 0)?
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.timestamp_millis())
}
