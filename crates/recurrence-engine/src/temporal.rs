//! Calendar helpers shared by the rule compiler, the generator and the mutator.
//!
//! Everything here is a pure function of its inputs: callers pass the
//! timezone and week start explicitly, there is no ambient "current locale".
//!
//! # Functions
//!
//! - [`parse_timezone`] / [`parse_rfc3339`] / [`parse_date`] — input parsing
//! - [`find_nth_weekday_in_month`] — Nth (or last) weekday of a month
//! - [`end_of_day_utc`] — the last instant of a local calendar day, in UTC
//! - [`weekday_code`] / [`parse_weekday_code`] — two-letter RRULE weekday tokens

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Offset, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::EngineError;

// ── Configurable week start ─────────────────────────────────────────────────

/// Which day begins a week for period computations.
///
/// Affects which weekday is "first" when aligning weekly recurrences to a
/// period boundary. It never changes which dates a weekday set selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekStartDay {
    /// ISO 8601 standard.
    #[default]
    Monday,
    /// US/Canada convention.
    Sunday,
    /// Used across much of the Middle East.
    Saturday,
}

impl WeekStartDay {
    /// The chrono weekday this week start corresponds to.
    pub fn weekday(self) -> Weekday {
        match self {
            WeekStartDay::Monday => Weekday::Mon,
            WeekStartDay::Sunday => Weekday::Sun,
            WeekStartDay::Saturday => Weekday::Sat,
        }
    }

    /// Map a weekday back to a supported week start, if it is one.
    pub fn from_weekday(weekday: Weekday) -> Option<Self> {
        match weekday {
            Weekday::Mon => Some(WeekStartDay::Monday),
            Weekday::Sun => Some(WeekStartDay::Sunday),
            Weekday::Sat => Some(WeekStartDay::Saturday),
            _ => None,
        }
    }
}

/// How many days `weekday` is from the week-start day.
pub fn days_from_week_start(weekday: Weekday, week_start: WeekStartDay) -> i64 {
    let start = week_start.weekday().num_days_from_monday() as i64;
    (weekday.num_days_from_monday() as i64 - start + 7) % 7
}

/// The first day of the week containing `date`.
pub fn start_of_week(date: NaiveDate, week_start: WeekStartDay) -> NaiveDate {
    date - Duration::days(days_from_week_start(date.weekday(), week_start))
}

// ── Parsing ─────────────────────────────────────────────────────────────────

/// Parse an IANA timezone string into `Tz`.
pub fn parse_timezone(s: &str) -> Result<Tz, EngineError> {
    s.parse::<Tz>()
        .map_err(|_| EngineError::InvalidTimezone(format!("'{}'", s)))
}

/// Parse an RFC 3339 datetime string into `DateTime<Utc>`.
pub fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::InvalidDatetime(format!("'{}': {}", s, e)))
}

/// Parse an ISO 8601 calendar date (`YYYY-MM-DD`).
pub fn parse_date(s: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| EngineError::InvalidDatetime(format!("'{}': {}", s, e)))
}

// ── Month arithmetic ────────────────────────────────────────────────────────

/// The last calendar day of a month.
pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (ny, nm) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(ny, nm, 1)?.pred_opt()
}

/// Find the Nth weekday in a month. ordinal < 0 means "last" (-1), "second to last" (-2), etc.
///
/// Returns `None` when the month has no such occurrence (e.g. a 5th Tuesday
/// in a month with four).
pub fn find_nth_weekday_in_month(
    year: i32,
    month: u32,
    weekday: Weekday,
    ordinal: i32,
) -> Option<NaiveDate> {
    let target = if ordinal > 0 {
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let diff = (weekday.num_days_from_monday() as i64
            - first.weekday().num_days_from_monday() as i64
            + 7)
            % 7;
        first + Duration::days(diff) + Duration::weeks((ordinal - 1) as i64)
    } else if ordinal < 0 {
        let last = last_day_of_month(year, month)?;
        let diff = (last.weekday().num_days_from_monday() as i64
            - weekday.num_days_from_monday() as i64
            + 7)
            % 7;
        last - Duration::days(diff) - Duration::weeks((-ordinal - 1) as i64)
    } else {
        return None;
    };
    (target.month() == month).then_some(target)
}

/// The natural ordinal of a date's weekday within its month (1 for days 1-7, 2 for 8-14, ...).
pub fn weekday_ordinal_in_month(date: NaiveDate) -> u32 {
    (date.day() - 1) / 7 + 1
}

// ── Timezone helpers ────────────────────────────────────────────────────────

/// The last second of `date` in `tz`, as a UTC instant.
///
/// Falls back to interpreting the wall-clock time as UTC if the local time
/// does not exist in `tz`.
pub fn end_of_day_utc(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default());
    tz.from_local_datetime(&naive)
        .latest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

/// The UTC offset in seconds of a zoned datetime.
pub fn utc_offset_seconds<T: TimeZone>(dt: &DateTime<T>) -> i32 {
    dt.offset().fix().local_minus_utc()
}

// ── Weekday tokens ──────────────────────────────────────────────────────────

/// The two-letter RRULE code for a weekday.
pub fn weekday_code(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

/// Parse a two-letter RRULE weekday code (case-insensitive).
pub fn parse_weekday_code(s: &str) -> Option<Weekday> {
    match s.to_ascii_uppercase().as_str() {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
