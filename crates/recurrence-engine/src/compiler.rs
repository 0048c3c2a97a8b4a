//! Converts between structured rules, rule strings, and the engine form.
//!
//! Three representations are involved:
//!
//! - [`RecurrenceRule`]: the structured fields users edit
//! - the rule string: RFC 5545 `RRULE` text stored next to the rule
//!   (`FREQ=WEEKLY;INTERVAL=1;BYDAY=TU,TH;WKST=MO;COUNT=10`)
//! - [`CanonicalRule`]: what the expansion engine is fed. Yearly rules become
//!   monthly rules with a 12x interval, and weekday sets are ordered from the
//!   week start.
//!
//! Serializing then parsing a valid rule gives back the same rule.

use chrono::{Datelike, NaiveDate, Weekday};

use crate::error::{EngineError, Result};
use crate::rule::{
    Frequency, MonthBy, MonthOrdinal, Pattern, RecurrenceRule, Termination, WeekdaySet,
};
use crate::temporal::{self, WeekStartDay};

// ── Serialize ───────────────────────────────────────────────────────────────

fn frequency_token(frequency: Frequency) -> &'static str {
    match frequency {
        Frequency::Daily => "DAILY",
        Frequency::Weekly => "WEEKLY",
        Frequency::Monthly => "MONTHLY",
        Frequency::Yearly => "YEARLY",
    }
}

fn join_weekdays(weekdays: WeekdaySet, week_start: WeekStartDay) -> String {
    weekdays
        .iter_from(week_start)
        .map(temporal::weekday_code)
        .collect::<Vec<_>>()
        .join(",")
}

/// Serialize a rule to its rule string.
///
/// Tokens are emitted in a fixed order: `FREQ`, `INTERVAL`, the selector
/// (`BYDAY` or `BYMONTHDAY`), `WKST`, then `COUNT` or `UNTIL`.
///
/// # Errors
///
/// Returns [`EngineError::InvalidRule`] if the rule fails
/// [`RecurrenceRule::validate`].
///
/// # Examples
///
/// ```
/// use recurrence_engine::compiler;
/// use recurrence_engine::rule::{Pattern, RecurrenceRule, Termination};
///
/// let rule = RecurrenceRule::new(Pattern::Daily).with_termination(Termination::Count(5));
/// assert_eq!(
///     compiler::serialize(&rule).unwrap(),
///     "FREQ=DAILY;INTERVAL=1;WKST=MO;COUNT=5"
/// );
/// ```
pub fn serialize(rule: &RecurrenceRule) -> Result<String> {
    rule.validate()?;

    let mut parts = vec![
        format!("FREQ={}", frequency_token(rule.frequency())),
        format!("INTERVAL={}", rule.interval),
    ];

    match rule.pattern {
        Pattern::Weekly { weekdays } => {
            let days = join_weekdays(weekdays, rule.week_start);
            parts.push(format!("BYDAY={days}"));
        }
        Pattern::Monthly {
            by: MonthBy::ByDate { day },
        } => parts.push(format!("BYMONTHDAY={day}")),
        Pattern::Monthly {
            by: MonthBy::ByWeekday { ordinal, weekday },
        } => parts.push(format!(
            "BYDAY={}{}",
            ordinal.number(),
            temporal::weekday_code(weekday)
        )),
        Pattern::Daily | Pattern::Yearly => {}
    }

    let wkst = temporal::weekday_code(rule.week_start.weekday());
    parts.push(format!("WKST={wkst}"));

    match rule.termination {
        Termination::Count(n) => parts.push(format!("COUNT={n}")),
        Termination::Until(date) => parts.push(format!("UNTIL={}", date.format("%Y%m%d"))),
        Termination::Forever => {}
    }

    Ok(parts.join(";"))
}

// ── Parse ───────────────────────────────────────────────────────────────────

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidRule(message.into())
}

fn parse_frequency(value: &str) -> Result<Frequency> {
    match value.trim().to_ascii_uppercase().as_str() {
        "DAILY" => Ok(Frequency::Daily),
        "WEEKLY" => Ok(Frequency::Weekly),
        "MONTHLY" => Ok(Frequency::Monthly),
        "YEARLY" => Ok(Frequency::Yearly),
        other => Err(invalid(format!("unsupported FREQ '{other}'"))),
    }
}

fn parse_number(key: &str, value: &str) -> Result<u32> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| invalid(format!("{key} must be a non-negative integer (got '{value}')")))
}

/// `UNTIL` keeps only its date: `20260331`, `20260331T235959Z` and
/// `2026-03-31` all mean March 31.
fn parse_until(value: &str) -> Result<NaiveDate> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date);
    }
    value
        .get(..8)
        .and_then(|digits| NaiveDate::parse_from_str(digits, "%Y%m%d").ok())
        .ok_or_else(|| invalid(format!("UNTIL is not a date: '{value}'")))
}

/// Parse one `BYDAY` entry: `TU`, `2TU`, `+2TU`, `-1FR`.
fn parse_by_day_entry(entry: &str) -> Result<(Option<i32>, Weekday)> {
    let entry = entry.trim();
    if !entry.is_ascii() || entry.len() < 2 {
        return Err(invalid(format!("malformed BYDAY entry '{entry}'")));
    }
    let (prefix, code) = entry.split_at(entry.len() - 2);
    let weekday = temporal::parse_weekday_code(code)
        .ok_or_else(|| invalid(format!("unknown weekday '{code}'")))?;
    if prefix.is_empty() {
        return Ok((None, weekday));
    }
    let ordinal = prefix
        .parse::<i32>()
        .map_err(|_| invalid(format!("malformed BYDAY ordinal '{prefix}'")))?;
    Ok((Some(ordinal), weekday))
}

fn parse_week_start(value: &str) -> Result<WeekStartDay> {
    temporal::parse_weekday_code(value.trim())
        .and_then(WeekStartDay::from_weekday)
        .ok_or_else(|| invalid(format!("unsupported WKST '{value}'")))
}

/// Parse a rule string into a structured rule.
///
/// Selectors the string leaves out are taken from the anchor: a weekly rule
/// without `BYDAY` repeats on the anchor's weekday, a monthly rule without a
/// selector on the anchor's day of month. A yearly rule that selects by month
/// day or weekday is turned into a monthly rule with a 12x interval.
///
/// When both `UNTIL` and `COUNT` are present, `UNTIL` wins.
///
/// # Arguments
///
/// * `rule_string` - RRULE text; a leading `RRULE:` is accepted
/// * `anchor` - the base event's local calendar date
/// * `week_start` - used when the string has no `WKST`
///
/// # Errors
///
/// Returns [`EngineError::InvalidRule`] for unknown parts, malformed values,
/// several ordinal weekdays, or a resulting rule that fails validation.
pub fn parse(
    rule_string: &str,
    anchor: NaiveDate,
    week_start: WeekStartDay,
) -> Result<RecurrenceRule> {
    let trimmed = rule_string.trim();
    let body = match trimmed.get(..6) {
        Some(prefix) if prefix.eq_ignore_ascii_case("RRULE:") => &trimmed[6..],
        _ => trimmed,
    };

    let mut frequency = None;
    let mut interval = None;
    let mut count = None;
    let mut until = None;
    let mut by_day = Vec::new();
    let mut month_day = None;
    let mut wkst = None;

    for part in body.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| invalid(format!("malformed rule part '{part}'")))?;
        let key = key.trim().to_ascii_uppercase();
        match key.as_str() {
            "FREQ" => frequency = Some(parse_frequency(value)?),
            "INTERVAL" => interval = Some(parse_number(&key, value)?),
            "COUNT" => count = Some(parse_number(&key, value)?),
            "UNTIL" => until = Some(parse_until(value)?),
            "BYDAY" => {
                by_day = value
                    .split(',')
                    .filter(|e| !e.trim().is_empty())
                    .map(parse_by_day_entry)
                    .collect::<Result<Vec<_>>>()?;
            }
            "BYMONTHDAY" => month_day = Some(parse_number(&key, value)?),
            "WKST" => wkst = Some(parse_week_start(value)?),
            other => return Err(invalid(format!("unsupported rule part '{other}'"))),
        }
    }

    let frequency = frequency.ok_or_else(|| invalid("missing FREQ"))?;

    let mut pattern = match frequency {
        Frequency::Daily => Pattern::Daily,
        Frequency::Weekly => Pattern::Weekly {
            weekdays: WeekdaySet::single(anchor.weekday()),
        },
        Frequency::Monthly => Pattern::Monthly {
            by: MonthBy::ByDate { day: anchor.day() },
        },
        Frequency::Yearly => Pattern::Yearly,
    };

    let (ordinals, plain): (Vec<_>, Vec<_>) =
        by_day.into_iter().partition(|(n, _)| n.is_some());
    if !plain.is_empty() {
        pattern = Pattern::Weekly {
            weekdays: plain.into_iter().map(|(_, wd)| wd).collect(),
        };
    }
    match ordinals.as_slice() {
        [] => {}
        [(Some(n), weekday)] => {
            let ordinal = MonthOrdinal::from_number(*n)
                .ok_or_else(|| invalid(format!("unsupported BYDAY ordinal {n}")))?;
            pattern = Pattern::Monthly {
                by: MonthBy::ByWeekday {
                    ordinal,
                    weekday: *weekday,
                },
            };
        }
        _ => return Err(invalid("only one ordinal weekday is supported")),
    }
    if let Some(day) = month_day {
        pattern = Pattern::Monthly {
            by: MonthBy::ByDate { day },
        };
    }

    let mut interval = interval.unwrap_or(1);
    if frequency == Frequency::Yearly && matches!(pattern, Pattern::Monthly { .. }) {
        interval = interval
            .checked_mul(12)
            .ok_or_else(|| invalid(format!("interval {interval} is too large")))?;
    }

    let termination = match (until, count) {
        (Some(date), _) => Termination::Until(date),
        (None, Some(n)) => Termination::Count(n),
        (None, None) => Termination::Forever,
    };

    let rule = RecurrenceRule {
        pattern,
        interval,
        termination,
        week_start: wkst.unwrap_or(week_start),
    };
    rule.validate()?;
    Ok(rule)
}

// ── Canonical form ──────────────────────────────────────────────────────────

/// The frequencies the expansion engine is fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalFrequency {
    Daily,
    Weekly,
    Monthly,
}

/// A rule in the form handed to the expansion engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRule {
    pub frequency: CanonicalFrequency,
    pub interval: u16,
    /// Weekdays with an optional ordinal, ordered from `week_start`.
    pub by_day: Vec<(Option<i32>, Weekday)>,
    pub by_month_day: Option<u32>,
    pub week_start: WeekStartDay,
    pub termination: Termination,
}

impl CanonicalRule {
    /// The `RRULE` body without its termination part.
    pub fn rrule_body(&self) -> String {
        let frequency = match self.frequency {
            CanonicalFrequency::Daily => "DAILY",
            CanonicalFrequency::Weekly => "WEEKLY",
            CanonicalFrequency::Monthly => "MONTHLY",
        };
        let mut body = format!("FREQ={frequency};INTERVAL={}", self.interval);
        if !self.by_day.is_empty() {
            let days = self
                .by_day
                .iter()
                .map(|(ordinal, weekday)| match ordinal {
                    Some(n) => format!("{n}{}", temporal::weekday_code(*weekday)),
                    None => temporal::weekday_code(*weekday).to_string(),
                })
                .collect::<Vec<_>>()
                .join(",");
            body.push_str(&format!(";BYDAY={days}"));
        }
        if let Some(day) = self.by_month_day {
            body.push_str(&format!(";BYMONTHDAY={day}"));
        }
        let wkst = temporal::weekday_code(self.week_start.weekday());
        body.push_str(&format!(";WKST={wkst}"));
        body
    }
}

/// Lower a structured rule to the engine form.
///
/// # Errors
///
/// Returns [`EngineError::InvalidRule`] if the rule fails validation or the
/// effective interval does not fit the engine's 16-bit interval.
pub fn canonicalize(rule: &RecurrenceRule, anchor: NaiveDate) -> Result<CanonicalRule> {
    rule.validate()?;

    let (frequency, months, by_day, by_month_day) = match rule.pattern {
        Pattern::Daily => (CanonicalFrequency::Daily, 1, Vec::new(), None),
        Pattern::Weekly { weekdays } => (
            CanonicalFrequency::Weekly,
            1,
            weekdays
                .iter_from(rule.week_start)
                .map(|wd| (None, wd))
                .collect(),
            None,
        ),
        Pattern::Monthly {
            by: MonthBy::ByDate { day },
        } => (CanonicalFrequency::Monthly, 1, Vec::new(), Some(day)),
        Pattern::Monthly {
            by: MonthBy::ByWeekday { ordinal, weekday },
        } => (
            CanonicalFrequency::Monthly,
            1,
            vec![(Some(ordinal.number()), weekday)],
            None,
        ),
        Pattern::Yearly => (
            CanonicalFrequency::Monthly,
            12,
            Vec::new(),
            Some(anchor.day()),
        ),
    };

    let interval = rule
        .interval
        .checked_mul(months)
        .and_then(|i| u16::try_from(i).ok())
        .ok_or_else(|| invalid(format!("interval {} is too large", rule.interval)))?;

    Ok(CanonicalRule {
        frequency,
        interval,
        by_day,
        by_month_day,
        week_start: rule.week_start,
        termination: rule.termination,
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────
