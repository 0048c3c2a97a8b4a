//! Period alignment of expansion anchors.
//!
//! Expansion starts at the beginning of the anchor's period (week start for
//! weekly rules, the 1st for monthly rules) so that interval counting lines up
//! with calendar periods. Moving the anchor back by days can cross a DST
//! transition; when the aligned wall-clock time has a different UTC offset (or
//! does not exist) the raw anchor is used instead, so the generated wall-clock
//! times stay the base event's.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone};
use chrono_tz::Tz;

use crate::rule::Frequency;
use crate::temporal::{self, WeekStartDay};

/// The first day of the period containing `date`.
///
/// Daily and yearly rules are not aligned.
pub fn period_start(date: NaiveDate, frequency: Frequency, week_start: WeekStartDay) -> NaiveDate {
    match frequency {
        Frequency::Daily | Frequency::Yearly => date,
        Frequency::Weekly => temporal::start_of_week(date, week_start),
        Frequency::Monthly => date.with_day(1).unwrap_or(date),
    }
}

/// Move a zoned anchor back to its period start, keeping its wall-clock time.
///
/// Returns `anchor` unchanged if the aligned local time is ambiguous,
/// nonexistent, or has a different UTC offset.
pub fn align_anchor(
    anchor: &DateTime<Tz>,
    frequency: Frequency,
    week_start: WeekStartDay,
) -> DateTime<Tz> {
    let date = anchor.date_naive();
    let aligned_date = period_start(date, frequency, week_start);
    if aligned_date == date {
        return *anchor;
    }

    let tz = anchor.timezone();
    let wall = aligned_date.and_time(anchor.time());
    let offset = temporal::utc_offset_seconds(anchor);
    match tz.from_local_datetime(&wall).single() {
        Some(aligned) if temporal::utc_offset_seconds(&aligned) == offset => aligned,
        _ => {
            tracing::debug!(
                anchor = %anchor,
                aligned_date = %aligned_date,
                "period start is on the other side of a DST change, expanding from the anchor"
            );
            *anchor
        }
    }
}
