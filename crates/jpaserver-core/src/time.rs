//! FHIR date handling.
//!
//! FHIR dates carry implicit precision: `2024` covers the whole year while
//! `2024-03-15T10:30Z` covers one minute. Both the indexer and the date
//! predicates work on that implicit range, expressed as a half-open
//! `[low, high)` interval in UTC.

use std::sync::LazyLock;

use time::format_description::well_known::Rfc3339;
use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::error::{CoreError, Result};

static DATE_TIME_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"^(\d{4})(?:-(\d{2})(?:-(\d{2})(?:T(\d{2}):(\d{2})(?::(\d{2})(?:\.(\d{1,9}))?)?(Z|[+-]\d{2}:\d{2})?)?)?)?$",
    )
    .expect("Invalid dateTime regex")
});

/// Current instant in UTC.
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Format an instant the way `meta.lastUpdated` carries it.
pub fn format_instant(instant: OffsetDateTime) -> Result<String> {
    instant
        .format(&Rfc3339)
        .map_err(|e| CoreError::invalid_date_time(e.to_string()))
}

/// Half-open `[low, high)` interval covered by a FHIR date value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub low: OffsetDateTime,
    pub high: OffsetDateTime,
}

impl DateRange {
    pub fn new(low: OffsetDateTime, high: OffsetDateTime) -> Self {
        Self { low, high }
    }

    /// Parse a FHIR date, dateTime or instant into the range its precision covers.
    ///
    /// A `+` offset that arrived form-decoded as a space is accepted.
    pub fn parse(value: &str) -> Result<Self> {
        let normalized = value.trim().replace(' ', "+");
        let caps = DATE_TIME_REGEX
            .captures(&normalized)
            .ok_or_else(|| CoreError::invalid_date_time(value))?;

        let num = |idx: usize| -> Result<Option<u32>> {
            caps.get(idx)
                .map(|m| {
                    m.as_str()
                        .parse::<u32>()
                        .map_err(|_| CoreError::invalid_date_time(value))
                })
                .transpose()
        };

        let year = num(1)?.unwrap_or_default() as i32;
        let invalid = |_| CoreError::invalid_date_time(value);

        let Some(month) = num(2)? else {
            let low = start_of(year, Month::January, 1, value)?;
            let high = start_of(year + 1, Month::January, 1, value).unwrap_or_else(|_| max_instant());
            return Ok(Self::new(low, high));
        };
        let month = Month::try_from(month as u8).map_err(invalid)?;

        let Some(day) = num(3)? else {
            let low = start_of(year, month, 1, value)?;
            let (next_year, next_month) = if month == Month::December {
                (year + 1, Month::January)
            } else {
                (year, month.next())
            };
            let high =
                start_of(next_year, next_month, 1, value).unwrap_or_else(|_| max_instant());
            return Ok(Self::new(low, high));
        };
        let date = Date::from_calendar_date(year, month, day as u8).map_err(invalid)?;

        let Some(hour) = num(4)? else {
            let low = date.midnight().assume_utc();
            return Ok(Self::new(low, add_clamped(low, Duration::DAY)));
        };
        let minute = num(5)?.unwrap_or_default();
        let second = num(6)?;

        let (nanos, width) = match (second, caps.get(7)) {
            (None, _) => (0, Duration::MINUTE),
            (Some(_), None) => (0, Duration::SECOND),
            (Some(_), Some(fraction)) => {
                let digits = fraction.as_str();
                let padded = format!("{digits:0<9}");
                let nanos: u32 = padded.parse().map_err(|_| CoreError::invalid_date_time(value))?;
                let width = Duration::nanoseconds(10_i64.pow(9 - digits.len() as u32));
                (nanos, width)
            }
        };

        let time = Time::from_hms_nano(
            hour as u8,
            minute as u8,
            second.unwrap_or_default() as u8,
            nanos,
        )
        .map_err(invalid)?;
        let offset = match caps.get(8).map(|m| m.as_str()) {
            None | Some("Z") => UtcOffset::UTC,
            Some(tz) => parse_offset(tz).ok_or_else(|| CoreError::invalid_date_time(value))?,
        };

        let low = PrimitiveDateTime::new(date, time)
            .checked_sub(Duration::seconds(offset.whole_seconds().into()))
            .ok_or_else(|| CoreError::invalid_date_time(value))?
            .assume_utc();
        Ok(Self::new(low, add_clamped(low, width)))
    }

    /// Range covered by a FHIR Period. An open end extends to the far future,
    /// an open start to the far past.
    pub fn from_period(start: Option<&str>, end: Option<&str>) -> Result<Option<Self>> {
        let low = start.map(Self::parse).transpose()?.map(|r| r.low);
        let high = end.map(Self::parse).transpose()?.map(|r| r.high);
        Ok(match (low, high) {
            (None, None) => None,
            (low, high) => Some(Self::new(
                low.unwrap_or(OffsetDateTime::UNIX_EPOCH - Duration::days(365 * 3000)),
                high.unwrap_or(OffsetDateTime::UNIX_EPOCH + Duration::days(365 * 3000)),
            )),
        })
    }

    pub fn width(&self) -> Duration {
        self.high - self.low
    }

    /// Widen both ends by `fraction` of the width, never less than `minimum`.
    pub fn widen(&self, fraction: f64, minimum: Duration) -> Self {
        let delta = (self.width() * fraction).max(minimum);
        Self::new(sub_clamped(self.low, delta), add_clamped(self.high, delta))
    }

    pub fn contains(&self, instant: OffsetDateTime) -> bool {
        self.low <= instant && instant < self.high
    }
}

/// Latest instant representable; ranges running past it are clamped here.
pub fn max_instant() -> OffsetDateTime {
    PrimitiveDateTime::MAX.assume_utc()
}

fn min_instant() -> OffsetDateTime {
    PrimitiveDateTime::MIN.assume_utc()
}

fn add_clamped(instant: OffsetDateTime, delta: Duration) -> OffsetDateTime {
    instant.checked_add(delta).unwrap_or_else(max_instant)
}

fn sub_clamped(instant: OffsetDateTime, delta: Duration) -> OffsetDateTime {
    instant.checked_sub(delta).unwrap_or_else(min_instant)
}

fn start_of(year: i32, month: Month, day: u8, raw: &str) -> Result<OffsetDateTime> {
    Date::from_calendar_date(year, month, day)
        .map(|d| d.midnight().assume_utc())
        .map_err(|_| CoreError::invalid_date_time(raw))
}

fn parse_offset(tz: &str) -> Option<UtcOffset> {
    let sign: i8 = if tz.starts_with('-') { -1 } else { 1 };
    let (hours, minutes) = tz[1..].split_once(':')?;
    let hours: i8 = hours.parse().ok()?;
    let minutes: i8 = minutes.parse().ok()?;
    UtcOffset::from_hms(sign * hours, sign * minutes, 0).ok()
}
