//! Structured recurrence fields.
//!
//! A [`RecurrenceRule`] is the strongly-typed form of what a user configures:
//! how often a family of events repeats ([`Pattern`]), every how many periods
//! (`interval`), and when it stops ([`Termination`]). Selectors that only make
//! sense for one frequency live inside that frequency's [`Pattern`] variant,
//! so a daily rule cannot carry a stray weekday set.

use std::fmt;

use chrono::{Datelike, NaiveDate, Weekday};
use chrono_tz::Tz;
use serde::{Serialize, Serializer};

use crate::error::{EngineError, Result};
use crate::temporal::{self, WeekStartDay};

// ── Frequency ───────────────────────────────────────────────────────────────

/// The period unit of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

// ── Weekday set ─────────────────────────────────────────────────────────────

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// A subset of the seven weekdays, stored as a bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn single(weekday: Weekday) -> Self {
        let mut set = Self::empty();
        set.insert(weekday);
        set
    }

    fn bit(weekday: Weekday) -> u8 {
        1 << weekday.num_days_from_monday()
    }

    /// Add a weekday. Returns `true` if it was not already present.
    pub fn insert(&mut self, weekday: Weekday) -> bool {
        let present = self.contains(weekday);
        self.0 |= Self::bit(weekday);
        !present
    }

    /// Remove a weekday. Returns `true` if it was present.
    pub fn remove(&mut self, weekday: Weekday) -> bool {
        let present = self.contains(weekday);
        self.0 &= !Self::bit(weekday);
        present
    }

    pub fn contains(&self, weekday: Weekday) -> bool {
        self.0 & Self::bit(weekday) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Weekdays in ISO order (Monday first).
    pub fn iter(&self) -> impl Iterator<Item = Weekday> {
        let set = *self;
        WEEKDAYS.into_iter().filter(move |wd| set.contains(*wd))
    }

    /// Weekdays ordered from the given week start.
    pub fn iter_from(&self, week_start: WeekStartDay) -> impl Iterator<Item = Weekday> {
        let set = *self;
        std::iter::successors(Some(week_start.weekday()), |wd| Some(wd.succ()))
            .take(7)
            .filter(move |wd| set.contains(*wd))
    }
}

impl FromIterator<Weekday> for WeekdaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = Self::empty();
        for weekday in iter {
            set.insert(weekday);
        }
        set
    }
}

impl fmt::Debug for WeekdaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for WeekdaySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter().map(temporal::weekday_code))
    }
}

// ── Monthly selectors ───────────────────────────────────────────────────────

/// Which occurrence of a weekday within a month.
///
/// There is no literal "fifth": a month does not always have five of a given
/// weekday, so a fifth occurrence is canonicalised to [`MonthOrdinal::Last`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonthOrdinal {
    First,
    Second,
    Third,
    Fourth,
    Last,
}

impl MonthOrdinal {
    /// Map an RRULE ordinal to a month ordinal. `5` and `-1` both mean last.
    pub fn from_number(n: i32) -> Option<Self> {
        match n {
            1 => Some(MonthOrdinal::First),
            2 => Some(MonthOrdinal::Second),
            3 => Some(MonthOrdinal::Third),
            4 => Some(MonthOrdinal::Fourth),
            5 | -1 => Some(MonthOrdinal::Last),
            _ => None,
        }
    }

    /// The RRULE ordinal (`-1` for last).
    pub fn number(self) -> i32 {
        match self {
            MonthOrdinal::First => 1,
            MonthOrdinal::Second => 2,
            MonthOrdinal::Third => 3,
            MonthOrdinal::Fourth => 4,
            MonthOrdinal::Last => -1,
        }
    }

    /// The ordinal of `date`'s weekday within its month.
    ///
    /// A natural ordinal of 4 or 5 is reported as [`MonthOrdinal::Last`].
    pub fn of_date(date: NaiveDate) -> Self {
        match temporal::weekday_ordinal_in_month(date) {
            1 => MonthOrdinal::First,
            2 => MonthOrdinal::Second,
            3 => MonthOrdinal::Third,
            _ => MonthOrdinal::Last,
        }
    }

    /// The date this ordinal selects for `weekday` in the given month.
    pub fn date_in(self, year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
        temporal::find_nth_weekday_in_month(year, month, weekday, self.number())
    }
}

/// How a monthly rule picks its day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MonthBy {
    /// A fixed day of the month (1-31). Months without that day are skipped.
    ByDate { day: u32 },
    /// The Nth (or last) given weekday of the month.
    ByWeekday {
        ordinal: MonthOrdinal,
        weekday: Weekday,
    },
}

impl MonthBy {
    /// Same weekday position as `date` (e.g. "third Tuesday").
    pub fn weekday_of(date: NaiveDate) -> Self {
        MonthBy::ByWeekday {
            ordinal: MonthOrdinal::of_date(date),
            weekday: date.weekday(),
        }
    }
}

// ── Pattern / termination ───────────────────────────────────────────────────

/// Frequency together with the selectors that frequency uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "frequency", rename_all = "lowercase")]
pub enum Pattern {
    Daily,
    Weekly { weekdays: WeekdaySet },
    Monthly { by: MonthBy },
    /// Same month and day as the anchor.
    Yearly,
}

impl Pattern {
    pub fn frequency(&self) -> Frequency {
        match self {
            Pattern::Daily => Frequency::Daily,
            Pattern::Weekly { .. } => Frequency::Weekly,
            Pattern::Monthly { .. } => Frequency::Monthly,
            Pattern::Yearly => Frequency::Yearly,
        }
    }
}

/// When a rule stops producing occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Termination {
    /// After `n` occurrences.
    Count(u32),
    /// Through the given calendar date, inclusive.
    Until(NaiveDate),
    /// Never; expansion is still capped at [`crate::generator::MAX_OCCURRENCES`].
    Forever,
}

// ── RecurrenceRule ──────────────────────────────────────────────────────────

/// The structured recurrence fields of one recurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RecurrenceRule {
    #[serde(flatten)]
    pub pattern: Pattern,
    /// Repeat every `interval` periods. Must be at least 1.
    pub interval: u32,
    pub termination: Termination,
    pub week_start: WeekStartDay,
}

impl RecurrenceRule {
    /// A rule repeating every period, forever, with ISO week start.
    pub fn new(pattern: Pattern) -> Self {
        Self {
            pattern,
            interval: 1,
            termination: Termination::Forever,
            week_start: WeekStartDay::default(),
        }
    }

    /// The rule a newly recurring event starts from: weekly on its own weekday.
    pub fn default_for(date: NaiveDate) -> Self {
        Self::new(Pattern::Weekly {
            weekdays: WeekdaySet::single(date.weekday()),
        })
    }

    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_termination(mut self, termination: Termination) -> Self {
        self.termination = termination;
        self
    }

    pub fn with_week_start(mut self, week_start: WeekStartDay) -> Self {
        self.week_start = week_start;
        self
    }

    pub fn frequency(&self) -> Frequency {
        self.pattern.frequency()
    }

    /// Check the rule invariants.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRule`] if the interval or count is zero,
    /// a weekly rule has no weekdays, or a month day is outside 1-31.
    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(EngineError::InvalidRule(
                "interval must be at least 1".to_string(),
            ));
        }
        if let Termination::Count(0) = self.termination {
            return Err(EngineError::InvalidRule(
                "count must be at least 1".to_string(),
            ));
        }
        match self.pattern {
            Pattern::Weekly { weekdays } if weekdays.is_empty() => Err(EngineError::InvalidRule(
                "weekly rule needs at least one weekday".to_string(),
            )),
            Pattern::Monthly {
                by: MonthBy::ByDate { day },
            } if !(1..=31).contains(&day) => Err(EngineError::InvalidRule(format!(
                "month day must be between 1 and 31 (got {day})"
            ))),
            _ => Ok(()),
        }
    }

    /// Follow an anchor that moved from one weekday to another.
    ///
    /// Only weekly rules change, and only when `from` was selected and `to`
    /// was not: `from` is swapped for `to`.
    pub fn with_moved_weekday(mut self, from: Weekday, to: Weekday) -> Self {
        if let Pattern::Weekly { weekdays } = &mut self.pattern {
            if from != to && weekdays.contains(from) && !weekdays.contains(to) {
                weekdays.remove(from);
                weekdays.insert(to);
            }
        }
        self
    }
}

// ── RuleChanges ─────────────────────────────────────────────────────────────

/// A partial set of recurrence field overrides.
///
/// `None` leaves a field as it is. `timezone` is tracked here rather than on
/// [`RecurrenceRule`] because it belongs to the recurrence, not the rule text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleChanges {
    pub pattern: Option<Pattern>,
    pub interval: Option<u32>,
    pub termination: Option<Termination>,
    pub week_start: Option<WeekStartDay>,
    pub timezone: Option<Option<Tz>>,
}

impl RuleChanges {
    pub fn is_empty(&self) -> bool {
        self.pattern.is_none()
            && self.interval.is_none()
            && self.termination.is_none()
            && self.week_start.is_none()
            && self.timezone.is_none()
    }

    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_termination(mut self, termination: Termination) -> Self {
        self.termination = Some(termination);
        self
    }

    pub fn with_timezone(mut self, timezone: Option<Tz>) -> Self {
        self.timezone = Some(timezone);
        self
    }

    /// Merge these overrides onto `rule`.
    pub fn apply(&self, rule: &RecurrenceRule) -> RecurrenceRule {
        RecurrenceRule {
            pattern: self.pattern.unwrap_or(rule.pattern),
            interval: self.interval.unwrap_or(rule.interval),
            termination: self.termination.unwrap_or(rule.termination),
            week_start: self.week_start.unwrap_or(rule.week_start),
        }
    }
}
