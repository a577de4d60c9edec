//! Value types for FHIR `date`, `time`, and `dateTime` primitives.
//!
//! These keep the precision the document author wrote: `2024`, `2024-06`,
//! and `2024-06-01` are distinct values. Comparisons between values of
//! different precision are undefined and yield `None`, which the FHIRPath
//! evaluator maps to an empty collection.

use crate::TimeError;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Precision carried by a parsed date or date-time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Precision {
    /// Only a year, e.g. `2024`.
    Year,
    /// Year and month, e.g. `2024-06`.
    Month,
    /// A full civil date.
    Day,
    /// A full timestamp with timezone.
    Instant,
}

// ---------------------------------------------------------------------------
// FhirDate
// ---------------------------------------------------------------------------

/// A FHIR `date`: year, optional month, optional day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FhirDate {
    year: i32,
    month: Option<u32>,
    day: Option<u32>,
}

impl FhirDate {
    /// The year component.
    pub fn year(&self) -> i32 {
        self.year
    }

    /// The month component, when given.
    pub fn month(&self) -> Option<u32> {
        self.month
    }

    /// The day component, when given.
    pub fn day(&self) -> Option<u32> {
        self.day
    }

    /// Precision of this value.
    pub fn precision(&self) -> Precision {
        match (self.month, self.day) {
            (Some(_), Some(_)) => Precision::Day,
            (Some(_), None) => Precision::Month,
            _ => Precision::Year,
        }
    }
}

fn digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

impl FromStr for FhirDate {
    type Err = TimeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.split('-').collect();
        let bad = || TimeError::Format(format!("not a date: {value}"));
        match parts.as_slice() {
            [year] if year.len() == 4 && digits(year) => Ok(Self {
                year: year.parse().map_err(|_| bad())?,
                month: None,
                day: None,
            }),
            [year, month] if year.len() == 4 && month.len() == 2 && digits(year) && digits(month) => {
                let month_num: u32 = month.parse().map_err(|_| bad())?;
                if !(1..=12).contains(&month_num) {
                    return Err(TimeError::NoSuchInstant(value.to_string()));
                }
                Ok(Self {
                    year: year.parse().map_err(|_| bad())?,
                    month: Some(month_num),
                    day: None,
                })
            }
            [year, month, day]
                if year.len() == 4
                    && month.len() == 2
                    && day.len() == 2
                    && digits(year)
                    && digits(month)
                    && digits(day) =>
            {
                let year_num: i32 = year.parse().map_err(|_| bad())?;
                let month_num: u32 = month.parse().map_err(|_| bad())?;
                let day_num: u32 = day.parse().map_err(|_| bad())?;
                // civil validity, e.g. 2015-02-29 must not pass
                NaiveDate::from_ymd_opt(year_num, month_num, day_num)
                    .ok_or_else(|| TimeError::NoSuchInstant(value.to_string()))?;
                Ok(Self {
                    year: year_num,
                    month: Some(month_num),
                    day: Some(day_num),
                })
            }
            _ => Err(bad()),
        }
    }
}

impl PartialOrd for FhirDate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.precision() != other.precision() {
            // comparable only up to the shared precision when unambiguous
            let by_year = self.year.cmp(&other.year);
            if by_year != Ordering::Equal {
                return Some(by_year);
            }
            return match (self.month, other.month) {
                (Some(a), Some(b)) if a != b => Some(a.cmp(&b)),
                _ => None,
            };
        }
        Some(
            self.year
                .cmp(&other.year)
                .then(self.month.cmp(&other.month))
                .then(self.day.cmp(&other.day)),
        )
    }
}

impl fmt::Display for FhirDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.month, self.day) {
            (Some(m), Some(d)) => write!(f, "{:04}-{m:02}-{d:02}", self.year),
            (Some(m), None) => write!(f, "{:04}-{m:02}", self.year),
            _ => write!(f, "{:04}", self.year),
        }
    }
}

// ---------------------------------------------------------------------------
// FhirTime
// ---------------------------------------------------------------------------

/// A FHIR `time`: `hh:mm:ss` with optional fraction, no timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FhirTime(NaiveTime);

impl FhirTime {
    /// The contained naive time.
    pub fn to_naive(self) -> NaiveTime {
        self.0
    }
}

impl FromStr for FhirTime {
    type Err = TimeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let bytes = value.as_bytes();
        if bytes.len() < 8 || bytes[2] != b':' || bytes[5] != b':' {
            return Err(TimeError::Format(format!("not a time: {value}")));
        }
        let fmt = if bytes.len() > 8 { "%H:%M:%S%.f" } else { "%H:%M:%S" };
        NaiveTime::parse_from_str(value, fmt)
            .map(Self)
            .map_err(|_| TimeError::NoSuchInstant(value.to_string()))
    }
}

impl fmt::Display for FhirTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M:%S%.3f"))
    }
}

// ---------------------------------------------------------------------------
// FhirDateTime
// ---------------------------------------------------------------------------

/// A FHIR `dateTime` of any precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FhirDateTime {
    /// Date-only precision (year, year-month, or full date).
    Date(FhirDate),
    /// Full timestamp; FHIR mandates a timezone once a time is present.
    Instant(DateTime<FixedOffset>),
}

impl FhirDateTime {
    /// Precision of this value.
    pub fn precision(&self) -> Precision {
        match self {
            Self::Date(d) => d.precision(),
            Self::Instant(_) => Precision::Instant,
        }
    }
}

impl FromStr for FhirDateTime {
    type Err = TimeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.is_empty() {
            return Err(TimeError::Format("empty dateTime".to_string()));
        }
        if value.len() <= 10 {
            return FhirDate::from_str(value).map(Self::Date);
        }
        let stamp = crate::parse_xs_date_time(value, None)?;
        let utc = stamp.to_utc();
        Ok(Self::Instant(
            FixedOffset::east_opt(0)
                .expect("utc offset")
                .from_utc_datetime(&utc.naive_utc()),
        ))
    }
}

impl PartialOrd for FhirDateTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Date(a), Self::Date(b)) => a.partial_cmp(b),
            (Self::Instant(a), Self::Instant(b)) => Some(a.cmp(b)),
            // mixed precision is not comparable
            _ => None,
        }
    }
}

impl fmt::Display for FhirDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date(d) => d.fmt(f),
            Self::Instant(i) => write!(f, "{}", i.format("%Y-%m-%dT%H:%M:%S%.3f%:z")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_precisions() {
        assert_eq!("2024".parse::<FhirDate>().unwrap().precision(), Precision::Year);
        assert_eq!(
            "2024-06".parse::<FhirDate>().unwrap().precision(),
            Precision::Month
        );
        assert_eq!(
            "2024-06-01".parse::<FhirDate>().unwrap().precision(),
            Precision::Day
        );
    }

    #[test]
    fn date_rejects_bad_widths() {
        assert!("24".parse::<FhirDate>().is_err());
        assert!("2024-6".parse::<FhirDate>().is_err());
        assert!("2024-06-1".parse::<FhirDate>().is_err());
        assert!("".parse::<FhirDate>().is_err());
    }

    #[test]
    fn date_rejects_nonexistent() {
        assert!(matches!(
            "2015-02-29".parse::<FhirDate>(),
            Err(TimeError::NoSuchInstant(_))
        ));
        assert!("2024-13".parse::<FhirDate>().is_err());
    }

    #[test]
    fn leap_day_accepted() {
        assert!("2016-02-29".parse::<FhirDate>().is_ok());
    }

    #[test]
    fn date_ordering_same_precision() {
        let a: FhirDate = "2024-06-01".parse().unwrap();
        let b: FhirDate = "2024-06-02".parse().unwrap();
        assert!(a < b);
    }

    #[test]
    fn date_ordering_mixed_precision_undefined_when_overlapping() {
        let a: FhirDate = "2024".parse().unwrap();
        let b: FhirDate = "2024-06".parse().unwrap();
        assert_eq!(a.partial_cmp(&b), None);
        let c: FhirDate = "2023".parse().unwrap();
        assert_eq!(c.partial_cmp(&b), Some(Ordering::Less));
    }

    #[test]
    fn time_parses() {
        assert!("12:30:45".parse::<FhirTime>().is_ok());
        assert!("12:30:45.500".parse::<FhirTime>().is_ok());
        assert!("12:30".parse::<FhirTime>().is_err());
        assert!("25:00:00".parse::<FhirTime>().is_err());
        assert!("".parse::<FhirTime>().is_err());
    }

    #[test]
    fn date_time_variants() {
        assert!(matches!(
            "2024".parse::<FhirDateTime>().unwrap(),
            FhirDateTime::Date(_)
        ));
        assert!(matches!(
            "2024-06-01T12:30:45+02:00".parse::<FhirDateTime>().unwrap(),
            FhirDateTime::Instant(_)
        ));
        // time without timezone violates the FHIR lexical rules
        assert!("2024-06-01T12:30:45".parse::<FhirDateTime>().is_err());
    }

    #[test]
    fn instant_comparison_uses_utc() {
        let a: FhirDateTime = "2024-06-01T12:00:00+02:00".parse().unwrap();
        let b: FhirDateTime = "2024-06-01T10:00:00Z".parse().unwrap();
        assert_eq!(a.partial_cmp(&b), Some(Ordering::Equal));
    }
}
