//! Occurrence generation: expands a rule into concrete start times.
//!
//! Rules are lowered to their canonical form and handed to the `rrule` crate
//! as an RFC 5545 text block:
//!
//! ```text
//! DTSTART;TZID=Europe/Brussels:20260302T090000
//! RRULE:FREQ=WEEKLY;INTERVAL=1;BYDAY=TU,TH;WKST=MO;COUNT=10
//! ```
//!
//! Timed anchors expand in their own timezone, so occurrences keep the same
//! wall-clock time across DST changes. All-day anchors expand on UTC midnight
//! and only their dates are kept.
//!
//! No rule ever yields more than [`MAX_OCCURRENCES`] starts.

use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, Offset, SubsecRound, TimeZone, Utc,
};
use chrono_tz::Tz;
use rrule::RRuleSet;
use serde::Serialize;

use crate::compiler;
use crate::dst;
use crate::error::{EngineError, Result};
use crate::model::Timing;
use crate::rule::{RecurrenceRule, Termination};
use crate::temporal;

/// Upper bound on the occurrences generated for one rule.
pub const MAX_OCCURRENCES: usize = 720;

/// Where an expansion starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// A UTC instant whose wall-clock time is kept in `timezone`.
    Timed { start: DateTime<Utc>, timezone: Tz },
    AllDay { date: NaiveDate },
}

impl Anchor {
    /// The anchor for an event timing.
    pub fn of_timing(timing: &Timing, timezone: Tz) -> Self {
        match timing {
            Timing::Timed { start, .. } => Anchor::Timed {
                start: *start,
                timezone,
            },
            Timing::AllDay { start, .. } => Anchor::AllDay { date: *start },
        }
    }

    /// The anchor's calendar date, local to its timezone.
    pub fn local_date(&self) -> NaiveDate {
        match self {
            Anchor::Timed { start, timezone } => start.with_timezone(timezone).date_naive(),
            Anchor::AllDay { date } => *date,
        }
    }
}

/// A generated occurrence start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum OccurrenceStart {
    At(DateTime<Utc>),
    On(NaiveDate),
}

impl OccurrenceStart {
    /// The start as a UTC instant. Dates start at UTC midnight.
    pub fn instant(&self) -> DateTime<Utc> {
        match self {
            OccurrenceStart::At(at) => *at,
            OccurrenceStart::On(on) => Timing::all_day(*on, *on).start_instant(),
        }
    }
}

/// Expand `rule` from `anchor`.
///
/// Expansion starts at the anchor's period start (see [`crate::dst`]), so the
/// result may contain starts earlier than the anchor; callers filter those.
/// A `Count(n)` rule yields at most `n` starts, any rule at most
/// [`MAX_OCCURRENCES`].
///
/// # Errors
///
/// Returns [`EngineError::InvalidRule`] if the rule cannot be lowered and
/// [`EngineError::Expansion`] if the expansion engine rejects it.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use recurrence_engine::generator::{occurrences, Anchor, OccurrenceStart};
/// use recurrence_engine::rule::{Pattern, RecurrenceRule, Termination};
///
/// let rule = RecurrenceRule::new(Pattern::Daily).with_termination(Termination::Count(3));
/// let anchor = Anchor::AllDay { date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap() };
/// let starts = occurrences(&rule, &anchor).unwrap();
/// assert_eq!(starts.len(), 3);
/// assert_eq!(starts[2], OccurrenceStart::On(NaiveDate::from_ymd_opt(2026, 3, 4).unwrap()));
/// ```
pub fn occurrences(rule: &RecurrenceRule, anchor: &Anchor) -> Result<Vec<OccurrenceStart>> {
    let count = match rule.termination {
        Termination::Count(n) => Some(n),
        Termination::Until(_) | Termination::Forever => None,
    };
    expand(rule, anchor, count)
}

/// Expand `rule` from `anchor`, stopping after `count` starts instead of the
/// rule's own termination.
///
/// # Errors
///
/// Same as [`occurrences`].
pub fn occurrences_with_count(
    rule: &RecurrenceRule,
    anchor: &Anchor,
    count: u32,
) -> Result<Vec<OccurrenceStart>> {
    expand(rule, anchor, Some(count))
}

fn expand(
    rule: &RecurrenceRule,
    anchor: &Anchor,
    count: Option<u32>,
) -> Result<Vec<OccurrenceStart>> {
    let canonical = compiler::canonicalize(rule, anchor.local_date())?;
    let body = canonical.rrule_body();
    let limit = count.map_or(MAX_OCCURRENCES, |n| (n as usize).min(MAX_OCCURRENCES));
    if limit == 0 {
        return Ok(Vec::new());
    }
    let until = match (count, rule.termination) {
        (None, Termination::Until(date)) => Some(date),
        _ => None,
    };

    match anchor {
        Anchor::Timed { start, timezone } => {
            let local = start.with_timezone(timezone);
            let dtstart = dst::align_anchor(&local, rule.frequency(), rule.week_start);
            let until = until.map(|date| temporal::end_of_day_utc(date, timezone));
            if until.is_some_and(|u| u < dtstart.with_timezone(&Utc)) {
                return Ok(Vec::new());
            }

            // DTSTART carries whole seconds; the fraction is added back.
            let fraction = *start - start.trunc_subsecs(0);
            let wall_clock = timezone.from_local_datetime(&dtstart.naive_local());
            let starts = if wall_clock.single().is_some() {
                expand_zoned(&dtstart, &body, count, limit, until)?
            } else {
                expand_floating(&dtstart, &body, count, limit, until)?
            };
            Ok(starts
                .into_iter()
                .map(|at| OccurrenceStart::At(at + fraction))
                .collect())
        }
        Anchor::AllDay { date } => {
            let first = dst::period_start(*date, rule.frequency(), rule.week_start);
            let until = until.map(|date| temporal::end_of_day_utc(date, &chrono_tz::UTC));
            if until.is_some_and(|u| u.date_naive() < first) {
                return Ok(Vec::new());
            }

            let dtstart_line = format!("DTSTART:{}T000000Z", first.format("%Y%m%d"));
            let text = rrule_text(&dtstart_line, &body, count, limit, until);
            let dates = run(&text, limit)?;
            Ok(dates
                .into_iter()
                .map(|dt| OccurrenceStart::On(dt.date_naive()))
                .collect())
        }
    }
}

fn expand_zoned(
    dtstart: &DateTime<Tz>,
    body: &str,
    count: Option<u32>,
    limit: usize,
    until: Option<DateTime<Utc>>,
) -> Result<Vec<DateTime<Utc>>> {
    let timezone = dtstart.timezone();
    let dtstart_line = if timezone == chrono_tz::UTC {
        format!("DTSTART:{}", dtstart.format("%Y%m%dT%H%M%SZ"))
    } else {
        format!(
            "DTSTART;TZID={}:{}",
            timezone.name(),
            dtstart.format("%Y%m%dT%H%M%S")
        )
    };
    let text = rrule_text(&dtstart_line, body, count, limit, until);
    Ok(run(&text, limit)?
        .into_iter()
        .map(|dt| dt.with_timezone(&Utc))
        .collect())
}

/// Expand on wall-clock times written as UTC, then place each one back in
/// the anchor's timezone.
///
/// `rrule` refuses a zoned DTSTART whose wall-clock time is repeated or
/// skipped, which is where an anchor inside a DST change lands.
fn expand_floating(
    dtstart: &DateTime<Tz>,
    body: &str,
    count: Option<u32>,
    limit: usize,
    until: Option<DateTime<Utc>>,
) -> Result<Vec<DateTime<Utc>>> {
    let timezone = dtstart.timezone();
    let offset = dtstart.offset().fix();
    tracing::debug!(
        anchor = %dtstart,
        "anchor wall-clock time is not unique, expanding on local times"
    );

    let wall = dtstart.naive_local();
    let dtstart_line = format!("DTSTART:{}", wall.format("%Y%m%dT%H%M%SZ"));
    let until = until.map(|u| u.with_timezone(&timezone).naive_local().and_utc());
    let text = rrule_text(&dtstart_line, body, count, limit, until);
    Ok(run(&text, limit)?
        .into_iter()
        .map(|dt| localize(dt.naive_utc(), &timezone, offset))
        .collect())
}

/// The instant a wall-clock time names in `timezone`.
///
/// A repeated time takes `offset` when that is one of its two readings, the
/// earlier reading otherwise. A skipped time is read with `offset`.
fn localize(wall: NaiveDateTime, timezone: &Tz, offset: FixedOffset) -> DateTime<Utc> {
    let readings = timezone.from_local_datetime(&wall);
    match (readings.earliest(), readings.latest()) {
        (Some(earlier), Some(later)) => {
            let chosen = if later.offset().fix() == offset {
                later
            } else {
                earlier
            };
            chosen.with_timezone(&Utc)
        }
        _ => {
            let shift = Duration::seconds(i64::from(offset.local_minus_utc()));
            Utc.from_utc_datetime(&(wall - shift))
        }
    }
}

fn rrule_text(
    dtstart_line: &str,
    body: &str,
    count: Option<u32>,
    limit: usize,
    until: Option<DateTime<Utc>>,
) -> String {
    let termination = match (count, until) {
        (Some(_), _) => format!(";COUNT={limit}"),
        (None, Some(until)) => format!(";UNTIL={}", until.format("%Y%m%dT%H%M%SZ")),
        (None, None) => String::new(),
    };
    format!("{dtstart_line}\nRRULE:{body}{termination}")
}

fn run(text: &str, limit: usize) -> Result<Vec<DateTime<rrule::Tz>>> {
    let set: RRuleSet = text
        .parse()
        .map_err(|e: rrule::RRuleError| EngineError::Expansion(format!("{e} in {text:?}")))?;
    let limit = u16::try_from(limit).unwrap_or(u16::MAX);
    let result = set.all(limit);
    tracing::trace!(
        rule = text,
        produced = result.dates.len(),
        limited = result.limited,
        "expanded recurrence"
    );
    Ok(result.dates)
}
