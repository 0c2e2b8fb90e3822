//! Five-field cron expressions: minute, hour, day of month, month, day of week.

use chrono::{DateTime, Datelike, TimeZone, Timelike};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("expected 5 fields, got {0}")]
    FieldCount(usize),

    #[error("{field} value {value} is out of range {min}-{max}")]
    OutOfRange {
        field: Field,
        value: u32,
        min: u8,
        max: u8,
    },

    #[error("cannot parse {field} item {item:?}")]
    Unparsable { field: Field, item: String },

    #[error("{field} step must be at least 1 in {item:?}")]
    ZeroStep { field: Field, item: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl Field {
    const ALL: [Field; 5] = [
        Field::Minute,
        Field::Hour,
        Field::DayOfMonth,
        Field::Month,
        Field::DayOfWeek,
    ];

    pub fn bounds(self) -> (u8, u8) {
        match self {
            Field::Minute => (0, 59),
            Field::Hour => (0, 23),
            Field::DayOfMonth => (1, 31),
            Field::Month => (1, 12),
            Field::DayOfWeek => (0, 6),
        }
    }

    fn span(self) -> usize {
        let (min, max) = self.bounds();
        usize::from(max - min) + 1
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Field::Minute => "minute",
            Field::Hour => "hour",
            Field::DayOfMonth => "day of month",
            Field::Month => "month",
            Field::DayOfWeek => "day of week",
        })
    }
}

/// The calendar position a schedule is tested against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub minute: u8,
    pub hour: u8,
    pub day: u8,
    pub month: u8,
    /// Days since Sunday.
    pub weekday: u8,
}

impl Tick {
    pub fn from_datetime<Tz: TimeZone>(at: &DateTime<Tz>) -> Self {
        // chrono keeps every component below 60, so the narrowing is lossless.
        Self {
            minute: at.minute() as u8,
            hour: at.hour() as u8,
            day: at.day() as u8,
            month: at.month() as u8,
            weekday: at.weekday().num_days_from_sunday() as u8,
        }
    }
}

/// A parsed cron expression: the set of matching values for each field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    minute: BTreeSet<u8>,
    hour: BTreeSet<u8>,
    day: BTreeSet<u8>,
    month: BTreeSet<u8>,
    weekday: BTreeSet<u8>,
}

impl Schedule {
    /// A tick matches when minute, hour and month all match and either day
    /// field does. A field left as a wildcard while the other day field is
    /// restricted never matches on its own.
    pub fn matches(&self, tick: &Tick) -> bool {
        self.minute.contains(&tick.minute)
            && self.hour.contains(&tick.hour)
            && self.month.contains(&tick.month)
            && (self.day.contains(&tick.day) || self.weekday.contains(&tick.weekday))
    }

    pub fn matches_at<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        self.matches(&Tick::from_datetime(at))
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != Field::ALL.len() {
            return Err(ScheduleError::FieldCount(parts.len()));
        }

        let mut sets = Vec::with_capacity(parts.len());
        for (field, part) in Field::ALL.into_iter().zip(parts) {
            sets.push(parse_field(field, part)?);
        }
        let [minute, hour, mut day, month, mut weekday]: [BTreeSet<u8>; 5] = sets
            .try_into()
            .map_err(|v: Vec<_>| ScheduleError::FieldCount(v.len()))?;

        let day_full = day.len() == Field::DayOfMonth.span();
        let weekday_full = weekday.len() == Field::DayOfWeek.span();
        if !day_full && weekday_full {
            weekday.clear();
        } else if day_full && !weekday_full {
            day.clear();
        }

        Ok(Self {
            minute,
            hour,
            day,
            month,
            weekday,
        })
    }
}

fn parse_field(field: Field, part: &str) -> Result<BTreeSet<u8>, ScheduleError> {
    let mut set = BTreeSet::new();
    for item in part.split(',') {
        set.extend(parse_item(field, item)?);
    }
    Ok(set)
}

fn parse_item(field: Field, item: &str) -> Result<Vec<u8>, ScheduleError> {
    let (min, max) = field.bounds();

    if let Some((base, step)) = item.rsplit_once('/') {
        let step: u32 = step.parse().map_err(|_| unparsable(field, item))?;
        if step == 0 {
            return Err(ScheduleError::ZeroStep {
                field,
                item: item.to_string(),
            });
        }
        let (start, end) = match base {
            "" | "*" => (min, max),
            _ => match base.split_once('-') {
                Some((a, b)) => range(field, a, b, item)?,
                None => (number(field, base, item)?, max),
            },
        };
        return Ok((start..=end).step_by(step as usize).collect());
    }

    if item == "*" {
        return Ok((min..=max).collect());
    }

    match item.split_once('-') {
        Some((a, b)) => {
            let (start, end) = range(field, a, b, item)?;
            Ok((start..=end).collect())
        }
        None => Ok(vec![number(field, item, item)?]),
    }
}

/// Bounds of an `a-b` item; a reversed range matches nothing and is rejected.
fn range(field: Field, a: &str, b: &str, item: &str) -> Result<(u8, u8), ScheduleError> {
    let (start, end) = (number(field, a, item)?, number(field, b, item)?);
    if start > end {
        return Err(unparsable(field, item));
    }
    Ok((start, end))
}

fn number(field: Field, raw: &str, item: &str) -> Result<u8, ScheduleError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(unparsable(field, item));
    }
    let value: u32 = raw.parse().map_err(|_| unparsable(field, item))?;
    let (min, max) = field.bounds();
    if value < u32::from(min) || value > u32::from(max) {
        return Err(ScheduleError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(value as u8)
}

fn unparsable(field: Field, item: &str) -> ScheduleError {
    ScheduleError::Unparsable {
        field,
        item: item.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(hh, mm, 0)
            .unwrap()
            .and_utc()
    }

    fn schedule(expr: &str) -> Schedule {
        expr.parse().unwrap()
    }

    #[test]
    fn wildcard_matches_every_minute() {
        let s = schedule("* * * * *");
        for day in 1..=31 {
            assert!(s.matches_at(&at(2024, 1, day, day % 24, day)));
        }
        assert!(s.matches_at(&at(2024, 2, 29, 23, 59)));
    }

    #[test]
    fn restricted_day_of_month_ignores_weekday() {
        let s = schedule("0 12 1 * *");
        // 2024-05-01 is a Wednesday, 2024-06-01 a Saturday.
        assert!(s.matches_at(&at(2024, 5, 1, 12, 0)));
        assert!(s.matches_at(&at(2024, 6, 1, 12, 0)));
        assert!(!s.matches_at(&at(2024, 5, 2, 12, 0)));
        assert!(!s.matches_at(&at(2024, 5, 1, 12, 1)));
        assert!(!s.matches_at(&at(2024, 5, 1, 13, 0)));
    }

    #[test]
    fn restricted_weekday_ignores_day_of_month() {
        let s = schedule("0 0 * * 1,2");
        // 2024-07-01 Monday, 07-02 Tuesday, 07-03 Wednesday.
        assert!(s.matches_at(&at(2024, 7, 1, 0, 0)));
        assert!(s.matches_at(&at(2024, 7, 2, 0, 0)));
        assert!(!s.matches_at(&at(2024, 7, 3, 0, 0)));
        // 2024-08-01 is a Thursday: the 1st alone is not enough.
        assert!(!s.matches_at(&at(2024, 8, 1, 0, 0)));
        for day in 3..=7 {
            assert!(!s.matches_at(&at(2024, 7, day, 0, 0)));
        }
    }

    #[test]
    fn first_of_month_fires_on_any_weekday() {
        let s = schedule("0 0 1 * *");
        for month in 1..=12 {
            assert!(s.matches_at(&at(2024, month, 1, 0, 0)));
            assert!(!s.matches_at(&at(2024, month, 2, 0, 0)));
        }
    }

    #[test]
    fn both_day_fields_restricted_fire_on_either() {
        let s = schedule("30 8 15 * 0");
        // 2024-09-15 is a Sunday; 2024-10-15 a Tuesday; 2024-10-13 a Sunday.
        assert!(s.matches_at(&at(2024, 9, 15, 8, 30)));
        assert!(s.matches_at(&at(2024, 10, 15, 8, 30)));
        assert!(s.matches_at(&at(2024, 10, 13, 8, 30)));
        assert!(!s.matches_at(&at(2024, 10, 14, 8, 30)));
    }

    #[test]
    fn steps_ranges_and_lists() {
        let s = schedule("*/15 9-17 * 1,6-7 *");
        assert!(s.matches_at(&at(2024, 1, 10, 9, 45)));
        assert!(s.matches_at(&at(2024, 7, 10, 17, 0)));
        assert!(!s.matches_at(&at(2024, 7, 10, 17, 10)));
        assert!(!s.matches_at(&at(2024, 3, 10, 9, 0)));

        assert_eq!(schedule("10/20 * * * *").minute, BTreeSet::from([10, 30, 50]));
        assert_eq!(schedule("5-20/5 * * * *").minute, BTreeSet::from([5, 10, 15, 20]));
    }

    #[test]
    fn extra_whitespace_is_tolerated() {
        assert_eq!(schedule("  0   12  1 *   * "), schedule("0 12 1 * *"));
    }

    #[test]
    fn out_of_range_hour_is_rejected() {
        let err = "0 25 * * *".parse::<Schedule>().unwrap_err();
        assert_eq!(
            err,
            ScheduleError::OutOfRange {
                field: Field::Hour,
                value: 25,
                min: 0,
                max: 23
            }
        );
        assert!(err.to_string().contains("hour"));
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert_eq!(
            "* * * *".parse::<Schedule>().unwrap_err(),
            ScheduleError::FieldCount(4)
        );
        assert!(matches!(
            "a * * * *".parse::<Schedule>(),
            Err(ScheduleError::Unparsable { .. })
        ));
        assert!(matches!(
            "*/0 * * * *".parse::<Schedule>(),
            Err(ScheduleError::ZeroStep { .. })
        ));
        assert!(matches!(
            "* * 0 * *".parse::<Schedule>(),
            Err(ScheduleError::OutOfRange { .. })
        ));
        assert!(matches!(
            "* * * * 7".parse::<Schedule>(),
            Err(ScheduleError::OutOfRange { .. })
        ));
        assert!("-5 * * * *".parse::<Schedule>().is_err());
        assert_eq!(
            "0 5-3 * * *".parse::<Schedule>().unwrap_err(),
            ScheduleError::Unparsable {
                field: Field::Hour,
                item: "5-3".to_string(),
            }
        );
        assert!(matches!(
            "0 0 31-1 * *".parse::<Schedule>(),
            Err(ScheduleError::Unparsable { .. })
        ));
        assert!(matches!(
            "50-10/5 * * * *".parse::<Schedule>(),
            Err(ScheduleError::Unparsable { .. })
        ));
        // A single-value range is fine.
        assert!("0 3-3 * * *".parse::<Schedule>().is_ok());
    }
}
