//! Timestamp handling for the e-prescription processing core.
//!
//! FHIR restricts the `xs:date`/`xs:dateTime` lexical space (fixed field
//! widths, no negative components, mandatory timezone on full timestamps)
//! and additionally requires values to denote existing civil instants —
//! `2015-02-29` is rejected even though it matches the grammar. This crate
//! implements those rules plus two legacy formats carried by the service:
//! the DTM form (`%Y%m%d%H%M%S`) and the database SUUID, which is only ever
//! read, never produced.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

mod fhir;

pub use fhir::{FhirDate, FhirDateTime, FhirTime, Precision};

/// Magic offset used by the legacy database SUUID format: the first 16 hex
/// digits of the UUID are microseconds relative to this constant (derived
/// from `1536-10-22T22:30:00Z`; the exact number is inherited from the
/// generator and must not change).
const DB_SUUID_MAGIC_SECONDS: i64 = 136_702_134_000;

/// Errors produced while interpreting timestamp strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    /// The value does not match the accepted lexical form.
    #[error("invalid timestamp format: {0}")]
    Format(String),
    /// The value matches the grammar but denotes no existing civil instant.
    #[error("no such civil instant: {0}")]
    NoSuchInstant(String),
    /// A legacy SUUID could not be interpreted.
    #[error("invalid suuid: {0}")]
    InvalidSuuid(String),
}

/// A point in time with UTC storage and millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Wrap an existing UTC instant.
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self(instant)
    }

    /// The wrapped UTC instant.
    pub fn to_utc(self) -> DateTime<Utc> {
        self.0
    }

    /// Construct from Unix seconds.
    pub fn from_unix(secs: i64) -> Option<Self> {
        Utc.timestamp_opt(secs, 0).single().map(Self)
    }

    /// Parse a full `xs:dateTime` with mandatory timezone and seconds.
    pub fn from_xs_date_time(value: &str) -> Result<Self, TimeError> {
        parse_xs_date_time(value, None)
    }

    /// Parse a FHIR `dateTime` of any precision. Partial values (year,
    /// year-month, date) resolve to the first contained instant in the
    /// fallback timezone.
    pub fn from_fhir_date_time(value: &str, fallback: FixedOffset) -> Result<Self, TimeError> {
        match value.len() {
            4 => {
                let date = FhirDate::from_str(value)?;
                Self::from_date_parts(date.year(), 1, 1, fallback)
            }
            7 => {
                let date = FhirDate::from_str(value)?;
                Self::from_date_parts(date.year(), date.month().unwrap_or(1), 1, fallback)
            }
            10 => Self::from_xs_date(value, fallback),
            _ => parse_xs_date_time(value, Some(fallback)),
        }
    }

    /// Parse an `xs:date` (`YYYY-MM-DD`); the result is midnight in the
    /// given timezone.
    pub fn from_xs_date(value: &str, zone: FixedOffset) -> Result<Self, TimeError> {
        let date = FhirDate::from_str(value)?;
        let (year, month, day) = match (date.month(), date.day()) {
            (Some(m), Some(d)) => (date.year(), m, d),
            _ => return Err(TimeError::Format(format!("not a full date: {value}"))),
        };
        Self::from_date_parts(year, month, day, zone)
    }

    /// Parse an `xs:time` (`hh:mm:ss[.sss]`), anchored at the Unix epoch day.
    pub fn from_xs_time(value: &str) -> Result<Self, TimeError> {
        let time = FhirTime::from_str(value)?;
        let day = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch day");
        Ok(Self(day.and_time(time.to_naive()).and_utc()))
    }

    /// Parse a date in German local time (midnight, Berlin offset).
    pub fn from_german_date(value: &str) -> Result<Self, TimeError> {
        let date = FhirDate::from_str(value)?;
        let (year, month, day) = match (date.month(), date.day()) {
            (Some(m), Some(d)) => (date.year(), m, d),
            _ => return Err(TimeError::Format(format!("not a full date: {value}"))),
        };
        let naive = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| TimeError::NoSuchInstant(value.to_string()))?;
        Self::from_date_parts(year, month, day, german_utc_offset(naive))
    }

    /// Parse the DTM form `YYYYMMDDhhmmss` (UTC).
    pub fn from_dtm(value: &str) -> Result<Self, TimeError> {
        if value.len() != 14 || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TimeError::Format(format!("not a DTM value: {value}")));
        }
        let naive = NaiveDateTime::parse_from_str(value, "%Y%m%d%H%M%S")
            .map_err(|_| TimeError::NoSuchInstant(value.to_string()))?;
        Ok(Self(naive.and_utc()))
    }

    /// Interpret a legacy database SUUID.
    ///
    /// The first 16 hex digits of the UUID form an integer of microseconds
    /// relative to [`DB_SUUID_MAGIC_SECONDS`]. Only reading is supported.
    pub fn from_database_suuid(value: &str) -> Result<Self, TimeError> {
        let uuid =
            Uuid::parse_str(value).map_err(|e| TimeError::InvalidSuuid(e.to_string()))?;
        let hex: String = uuid.simple().to_string().chars().take(16).collect();
        let intval = i64::from_str_radix(&hex, 16)
            .map_err(|e| TimeError::InvalidSuuid(e.to_string()))?;
        if intval <= 0 {
            return Err(TimeError::InvalidSuuid(format!(
                "non-positive timestamp part: {value}"
            )));
        }
        let micros = intval - DB_SUUID_MAGIC_SECONDS * 1_000_000;
        DateTime::<Utc>::from_timestamp_micros(micros)
            .map(Self)
            .ok_or_else(|| TimeError::InvalidSuuid(format!("out of range: {value}")))
    }

    /// Format as `xs:dateTime` in UTC with millisecond precision.
    pub fn to_xs_date_time(self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }

    /// Format as DTM (`YYYYMMDDhhmmss`, UTC).
    pub fn to_dtm(self) -> String {
        self.0.format("%Y%m%d%H%M%S").to_string()
    }

    /// Format as German local date (`YYYY-MM-DD`, Berlin offset).
    pub fn to_german_date(self) -> String {
        let offset = german_utc_offset(self.0.date_naive());
        self.0.with_timezone(&offset).format("%Y-%m-%d").to_string()
    }

    fn from_date_parts(
        year: i32,
        month: u32,
        day: u32,
        zone: FixedOffset,
    ) -> Result<Self, TimeError> {
        let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
            TimeError::NoSuchInstant(format!("{year:04}-{month:02}-{day:02}"))
        })?;
        let local = date.and_time(NaiveTime::MIN);
        match zone.from_local_datetime(&local) {
            chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
                Ok(Self(dt.with_timezone(&Utc)))
            }
            chrono::LocalResult::None => {
                Err(TimeError::NoSuchInstant(local.to_string()))
            }
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xs_date_time())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

/// UTC offset of German local time on the given date (CET/CEST per the EU
/// rule: summer time from the last Sunday of March to the last Sunday of
/// October).
pub fn german_utc_offset(date: NaiveDate) -> FixedOffset {
    let cet = FixedOffset::east_opt(3600).expect("static offset");
    let cest = FixedOffset::east_opt(7200).expect("static offset");
    let year = date.year();
    let dst_start = last_sunday(year, 3);
    let dst_end = last_sunday(year, 10);
    if date >= dst_start && date < dst_end {
        cest
    } else {
        cet
    }
}

fn last_sunday(year: i32, month: u32) -> NaiveDate {
    let last_day = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid month start")
        - Duration::days(1);
    let back = last_day.weekday().num_days_from_sunday() as i64;
    last_day - Duration::days(back)
}

/// Shared lexical validation for `xs:dateTime`-shaped strings.
///
/// Checks field widths and separators before chrono sees the value, so the
/// rejection messages name the offending field the way callers expect.
/// When `fallback` is given, a missing timezone resolves to it; otherwise
/// the timezone is mandatory.
fn parse_xs_date_time(
    value: &str,
    fallback: Option<FixedOffset>,
) -> Result<Timestamp, TimeError> {
    let bytes = value.as_bytes();
    if bytes.len() < 19 {
        return Err(TimeError::Format(format!(
            "date does not match YYYY-MM-DDThh:mm:ss: {value}"
        )));
    }
    let expect = |idx: usize, ch: u8, what: &str| -> Result<(), TimeError> {
        if bytes[idx] != ch {
            return Err(TimeError::Format(format!("expecting {what}: {value}")));
        }
        Ok(())
    };
    if bytes[0] == b'-' {
        return Err(TimeError::Format(format!(
            "negative years are not supported: {value}"
        )));
    }
    expect(4, b'-', "four digits for year")?;
    expect(7, b'-', "two digits for month")?;
    expect(10, b'T', "two digits for day")?;
    expect(13, b':', "two digits for hour")?;
    for idx in [5, 8, 11, 14] {
        if bytes[idx] == b'-' {
            return Err(TimeError::Format(format!(
                "negative components are not permitted: {value}"
            )));
        }
    }
    if bytes[16] != b':' {
        return Err(TimeError::Format(format!(
            "expecting two digits for seconds: {value}"
        )));
    }
    if bytes[17] == b'-' {
        return Err(TimeError::Format(format!(
            "negative components are not permitted: {value}"
        )));
    }
    let mut tz_start = 19;
    // skip over a sub-second part when present
    if bytes.len() > 19 && bytes[19] == b'.' {
        let frac_end = bytes[20..]
            .iter()
            .position(|b| !b.is_ascii_digit())
            .map(|p| p + 20)
            .unwrap_or(bytes.len());
        if frac_end == 20 {
            return Err(TimeError::Format(format!("sub-second part is empty: {value}")));
        }
        tz_start = frac_end;
    }
    let (stamp, zone) = value.split_at(tz_start.min(value.len()));
    let offset = match zone {
        "" => match fallback {
            Some(fb) => Some(fb),
            None => return Err(TimeError::Format(format!("timezone is missing: {value}"))),
        },
        "Z" => Some(FixedOffset::east_opt(0).expect("utc")),
        other => {
            if other.len() != 6 || other.as_bytes()[3] != b':' {
                return Err(TimeError::Format(format!(
                    "expecting timezone Z or +hh:mm: {value}"
                )));
            }
            let sign = match other.as_bytes()[0] {
                b'+' => 1,
                b'-' => -1,
                _ => {
                    return Err(TimeError::Format(format!(
                        "expecting timezone Z or +hh:mm: {value}"
                    )))
                }
            };
            let hours: i32 = other[1..3]
                .parse()
                .map_err(|_| TimeError::Format(format!("bad timezone hours: {value}")))?;
            let minutes: i32 = other[4..6]
                .parse()
                .map_err(|_| TimeError::Format(format!("bad timezone minutes: {value}")))?;
            FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        }
    };
    let offset = offset.ok_or_else(|| TimeError::Format(format!("bad timezone: {value}")))?;
    let fmt = if stamp.len() > 19 {
        "%Y-%m-%dT%H:%M:%S%.f"
    } else {
        "%Y-%m-%dT%H:%M:%S"
    };
    let naive = NaiveDateTime::parse_from_str(stamp, fmt)
        .map_err(|_| TimeError::NoSuchInstant(value.to_string()))?;
    match offset.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => Ok(Timestamp(dt.with_timezone(&Utc))),
        _ => Err(TimeError::NoSuchInstant(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_zulu() {
        let ts = Timestamp::from_xs_date_time("2024-03-01T12:30:45Z").expect("valid");
        assert_eq!(ts.to_xs_date_time(), "2024-03-01T12:30:45.000Z");
    }

    #[test]
    fn parses_offset() {
        let ts = Timestamp::from_xs_date_time("2024-03-01T12:30:45+01:00").expect("valid");
        assert_eq!(ts.to_xs_date_time(), "2024-03-01T11:30:45.000Z");
    }

    #[test]
    fn parses_subseconds() {
        let ts = Timestamp::from_xs_date_time("2024-03-01T12:30:45.123Z").expect("valid");
        assert_eq!(ts.to_xs_date_time(), "2024-03-01T12:30:45.123Z");
    }

    #[test]
    fn rejects_missing_timezone() {
        assert!(matches!(
            Timestamp::from_xs_date_time("2024-03-01T12:30:45"),
            Err(TimeError::Format(_))
        ));
    }

    #[test]
    fn rejects_nonexistent_day() {
        assert!(matches!(
            Timestamp::from_xs_date_time("2015-02-29T00:00:00Z"),
            Err(TimeError::NoSuchInstant(_))
        ));
    }

    #[test]
    fn rejects_negative_year() {
        assert!(Timestamp::from_xs_date_time("-024-03-01T12:30:45Z").is_err());
    }

    #[test]
    fn rejects_empty_subsecond() {
        assert!(Timestamp::from_xs_date_time("2024-03-01T12:30:45.Z").is_err());
    }

    #[test]
    fn fhir_date_time_partial_precision() {
        let berlin = FixedOffset::east_opt(3600).unwrap();
        let year = Timestamp::from_fhir_date_time("2024", berlin).expect("year");
        assert_eq!(year.to_xs_date_time(), "2023-12-31T23:00:00.000Z");
        let month = Timestamp::from_fhir_date_time("2024-06", berlin).expect("month");
        assert_eq!(month.to_xs_date_time(), "2024-05-31T23:00:00.000Z");
    }

    #[test]
    fn dtm_roundtrip() {
        let ts = Timestamp::from_dtm("20240301123045").expect("valid dtm");
        assert_eq!(ts.to_dtm(), "20240301123045");
        assert!(Timestamp::from_dtm("2024-03-01").is_err());
        assert!(Timestamp::from_dtm("20240230123045").is_err());
    }

    #[test]
    fn german_offset_switches_with_dst() {
        let winter = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let summer = NaiveDate::from_ymd_opt(2024, 7, 15).unwrap();
        assert_eq!(german_utc_offset(winter).local_minus_utc(), 3600);
        assert_eq!(german_utc_offset(summer).local_minus_utc(), 7200);
        // 2024: DST starts March 31, ends October 27
        assert_eq!(last_sunday(2024, 3), NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
        assert_eq!(last_sunday(2024, 10), NaiveDate::from_ymd_opt(2024, 10, 27).unwrap());
    }

    #[test]
    fn german_date_midnight() {
        let ts = Timestamp::from_german_date("2024-01-15").expect("valid");
        assert_eq!(ts.to_xs_date_time(), "2024-01-14T23:00:00.000Z");
        assert_eq!(ts.to_german_date(), "2024-01-15");
    }

    #[test]
    fn suuid_requires_valid_uuid() {
        assert!(Timestamp::from_database_suuid("not-a-uuid").is_err());
    }

    #[test]
    fn suuid_reads_timestamp_part() {
        let ts = Timestamp::from_database_suuid("01e5b000-0000-0000-0000-000000000000")
            .expect("valid suuid");
        // only the first 16 hex digits carry the timestamp
        assert_eq!(
            ts,
            Timestamp::from_database_suuid("01e5b000-0000-0000-ffff-00000000ffff").unwrap()
        );
    }

    proptest! {
        #[test]
        fn roundtrip_valid_instants(secs in 0i64..4_102_444_800) {
            let ts = Timestamp::from_unix(secs).expect("in range");
            let text = ts.to_xs_date_time();
            let back = Timestamp::from_xs_date_time(&text).expect("roundtrip");
            prop_assert_eq!(ts, back);
        }

        #[test]
        fn dtm_never_panics(s in "[0-9]{0,20}") {
            let _ = Timestamp::from_dtm(&s);
        }
    }
}
