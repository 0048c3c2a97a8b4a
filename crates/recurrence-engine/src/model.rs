//! Events, recurrences, and the payloads used to create and update them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::compiler;
use crate::error::Result;
use crate::generator::OccurrenceStart;
use crate::rule::{RecurrenceRule, RuleChanges};
use crate::temporal::WeekStartDay;

// ── Identifiers ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RecurrenceId(pub u64);

impl fmt::Display for RecurrenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Timing ──────────────────────────────────────────────────────────────────

/// When an event happens: a UTC range, or a range of whole calendar days
/// (`stop` exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Timing {
    Timed {
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    },
    AllDay {
        start: NaiveDate,
        stop: NaiveDate,
    },
}

/// The length of a [`Timing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span {
    Time(Duration),
    Days(i64),
}

impl Timing {
    pub fn timed(start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        Timing::Timed { start, stop }
    }

    pub fn all_day(start: NaiveDate, stop: NaiveDate) -> Self {
        Timing::AllDay { start, stop }
    }

    pub fn is_all_day(&self) -> bool {
        matches!(self, Timing::AllDay { .. })
    }

    /// The start as a UTC instant. All-day ranges start at UTC midnight.
    pub fn start_instant(&self) -> DateTime<Utc> {
        match self {
            Timing::Timed { start, .. } => *start,
            Timing::AllDay { start, .. } => {
                Utc.from_utc_datetime(&start.and_time(NaiveTime::default()))
            }
        }
    }

    /// The calendar date the range starts on, seen from `tz`.
    pub fn local_date(&self, tz: &Tz) -> NaiveDate {
        match self {
            Timing::Timed { start, .. } => start.with_timezone(tz).date_naive(),
            Timing::AllDay { start, .. } => *start,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Timing::Timed { start, stop } => Span::Time(*stop - *start),
            Timing::AllDay { start, stop } => Span::Days((*stop - *start).num_days()),
        }
    }

    /// A range of length `span` starting at a generated occurrence.
    pub fn from_start(start: OccurrenceStart, span: Span) -> Self {
        match (start, span) {
            (OccurrenceStart::At(at), Span::Time(length)) => Timing::Timed {
                start: at,
                stop: at + length,
            },
            (OccurrenceStart::At(at), Span::Days(days)) => Timing::Timed {
                start: at,
                stop: at + Duration::days(days),
            },
            (OccurrenceStart::On(on), Span::Days(days)) => Timing::AllDay {
                start: on,
                stop: on + Duration::days(days),
            },
            (OccurrenceStart::On(on), Span::Time(length)) => Timing::AllDay {
                start: on,
                stop: on + Duration::days(length.num_days()),
            },
        }
    }
}

/// The move from one timing to another, replayable onto a different event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeShift {
    from: Timing,
    to: Timing,
}

impl TimeShift {
    pub fn between(from: Timing, to: Timing) -> Self {
        Self { from, to }
    }

    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }

    /// Move `timing` the way `from` moved to `to`, taking the new length and
    /// kind from `to`.
    ///
    /// Same-kind moves shift by the exact delta. When the kind changes, the
    /// shift is measured in calendar days seen from `tz` and the target keeps
    /// `to`'s wall-clock time.
    pub fn apply(&self, timing: &Timing, tz: &Tz) -> Timing {
        match (self.from, self.to, *timing) {
            (
                Timing::Timed { start: old, .. },
                Timing::Timed {
                    start: new,
                    stop: new_stop,
                },
                Timing::Timed { start, .. },
            ) => {
                let start = start + (new - old);
                Timing::Timed {
                    start,
                    stop: start + (new_stop - new),
                }
            }
            (
                Timing::AllDay { start: old, .. },
                Timing::AllDay {
                    start: new,
                    stop: new_stop,
                },
                Timing::AllDay { start, .. },
            ) => {
                let start = start + (new - old);
                Timing::AllDay {
                    start,
                    stop: start + (new_stop - new),
                }
            }
            (from, to, timing) => {
                let days = to.local_date(tz) - from.local_date(tz);
                let date = timing.local_date(tz) + days;
                match to {
                    Timing::AllDay { start, stop } => Timing::AllDay {
                        start: date,
                        stop: date + (stop - start),
                    },
                    Timing::Timed { start, stop } => {
                        let wall = start.with_timezone(tz).time();
                        let moved = tz
                            .from_local_datetime(&date.and_time(wall))
                            .earliest()
                            .map(|dt| dt.with_timezone(&Utc))
                            .unwrap_or_else(|| start + days);
                        Timing::Timed {
                            start: moved,
                            stop: moved + (stop - start),
                        }
                    }
                }
            }
        }
    }
}

// ── Event details ───────────────────────────────────────────────────────────

/// The descriptive fields copied from a base event onto generated instances.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct EventDetails {
    pub name: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub attendees: Vec<String>,
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl EventDetails {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A partial update of [`EventDetails`].
///
/// Property entries are merged key by key; a `null` value removes the key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetailsPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub location: Option<Option<String>>,
    pub attendees: Option<Vec<String>>,
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl DetailsPatch {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.location.is_none()
            && self.attendees.is_none()
            && self.properties.is_empty()
    }

    pub fn apply_to(&self, details: &mut EventDetails) {
        if let Some(name) = &self.name {
            details.name.clone_from(name);
        }
        if let Some(description) = &self.description {
            details.description.clone_from(description);
        }
        if let Some(location) = &self.location {
            details.location.clone_from(location);
        }
        if let Some(attendees) = &self.attendees {
            details.attendees.clone_from(attendees);
        }
        for (key, value) in &self.properties {
            if value.is_null() {
                details.properties.remove(key);
            } else {
                details.properties.insert(key.clone(), value.clone());
            }
        }
    }
}

// ── Events ──────────────────────────────────────────────────────────────────

/// A stored calendar event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub id: EventId,
    pub timing: Timing,
    pub details: EventDetails,
    pub recurrence_id: Option<RecurrenceId>,
    /// `false` once the instance has been individually edited (an exception).
    pub follows_recurrence: bool,
    /// The occurrence the instance was generated for. Survives timing edits.
    pub slot: Option<Timing>,
    /// Archived events are inactive.
    pub active: bool,
}

impl Event {
    pub fn is_recurring(&self) -> bool {
        self.recurrence_id.is_some()
    }

    /// The occurrence this instance stands for when matching against a
    /// desired set: its own timing while it follows the recurrence, otherwise
    /// the slot it was generated for.
    pub fn occurrence_key(&self) -> Timing {
        if self.follows_recurrence {
            self.timing
        } else {
            self.slot.unwrap_or(self.timing)
        }
    }
}

/// Everything needed to create an event.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub timing: Timing,
    pub details: EventDetails,
    pub recurrence_id: Option<RecurrenceId>,
    pub follows_recurrence: bool,
    pub slot: Option<Timing>,
}

impl NewEvent {
    /// A one-off event outside any recurrence.
    pub fn standalone(timing: Timing, details: EventDetails) -> Self {
        Self {
            timing,
            details,
            recurrence_id: None,
            follows_recurrence: false,
            slot: None,
        }
    }

    /// A generated instance of `recurrence_id` at `timing`.
    pub fn instance(recurrence_id: RecurrenceId, timing: Timing, details: EventDetails) -> Self {
        Self {
            timing,
            details,
            recurrence_id: Some(recurrence_id),
            follows_recurrence: true,
            slot: Some(timing),
        }
    }
}

/// A partial update of an [`Event`]. `None` fields are left unchanged.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventUpdate {
    pub timing: Option<Timing>,
    pub details: Option<DetailsPatch>,
    pub recurrence_id: Option<Option<RecurrenceId>>,
    pub follows_recurrence: Option<bool>,
    pub slot: Option<Option<Timing>>,
}

impl EventUpdate {
    /// Take an event out of its recurrence.
    pub fn detach() -> Self {
        Self {
            recurrence_id: Some(None),
            follows_recurrence: Some(false),
            slot: Some(None),
            ..Self::default()
        }
    }

    /// Put an event into a recurrence.
    pub fn attach(
        recurrence_id: RecurrenceId,
        follows_recurrence: bool,
        slot: Option<Timing>,
    ) -> Self {
        Self {
            recurrence_id: Some(Some(recurrence_id)),
            follows_recurrence: Some(follows_recurrence),
            slot: Some(slot),
            ..Self::default()
        }
    }

    pub fn timing(timing: Timing) -> Self {
        Self {
            timing: Some(timing),
            ..Self::default()
        }
    }

    pub fn details(patch: DetailsPatch) -> Self {
        Self {
            details: Some(patch),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, event: &mut Event) {
        if let Some(timing) = self.timing {
            event.timing = timing;
        }
        if let Some(patch) = &self.details {
            patch.apply_to(&mut event.details);
        }
        if let Some(recurrence_id) = self.recurrence_id {
            event.recurrence_id = recurrence_id;
        }
        if let Some(follows) = self.follows_recurrence {
            event.follows_recurrence = follows;
        }
        if let Some(slot) = self.slot {
            event.slot = slot;
        }
    }
}

/// A user-level write to an event, routed by edit scope.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventWrite {
    pub details: DetailsPatch,
    pub timing: Option<Timing>,
    pub rule: RuleChanges,
    /// `Some(true)` makes a one-off event recurring, `Some(false)` breaks a
    /// recurrence apart.
    pub recurrency: Option<bool>,
}

impl EventWrite {
    pub fn with_details(mut self, details: DetailsPatch) -> Self {
        self.details = details;
        self
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn with_rule(mut self, rule: RuleChanges) -> Self {
        self.rule = rule;
        self
    }

    pub fn with_recurrency(mut self, recurrency: bool) -> Self {
        self.recurrency = Some(recurrency);
        self
    }

    /// The new timing, if it differs from `current`.
    pub fn moved_timing(&self, current: &Timing) -> Option<Timing> {
        self.timing.filter(|timing| timing != current)
    }
}

// ── Recurrences ─────────────────────────────────────────────────────────────

/// A stored recurrence: the rule plus the event it is anchored on.
#[derive(Debug, Clone, PartialEq)]
pub struct Recurrence {
    pub id: RecurrenceId,
    pub base_event_id: Option<EventId>,
    /// `None` means "use the engine's default timezone".
    pub timezone: Option<Tz>,
    pub rule: RecurrenceRule,
    /// The serialized form of `rule`, kept in sync by [`Recurrence::set_rule`].
    pub rule_string: String,
}

impl Recurrence {
    /// Replace the structured rule and re-serialize the rule string.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidRule`] and leaves the recurrence
    /// untouched if the rule does not validate.
    pub fn set_rule(&mut self, rule: RecurrenceRule) -> Result<()> {
        self.rule_string = compiler::serialize(&rule)?;
        self.rule = rule;
        Ok(())
    }

    /// Replace the rule from a rule string, normalizing the stored string.
    ///
    /// # Arguments
    ///
    /// * `rule_string` - RRULE text, with or without an `RRULE:` prefix
    /// * `anchor` - the base event's local date, used for missing selectors
    /// * `week_start` - used when the string carries no `WKST`
    pub fn set_rule_string(
        &mut self,
        rule_string: &str,
        anchor: NaiveDate,
        week_start: WeekStartDay,
    ) -> Result<()> {
        let rule = compiler::parse(rule_string, anchor, week_start)?;
        self.set_rule(rule)
    }
}

/// Everything needed to create a recurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecurrence {
    pub base_event_id: Option<EventId>,
    pub timezone: Option<Tz>,
    pub rule: RecurrenceRule,
    pub rule_string: String,
}

impl NewRecurrence {
    /// Validate and serialize `rule` for a recurrence anchored on `base_event_id`.
    pub fn new(base_event_id: EventId, timezone: Option<Tz>, rule: RecurrenceRule) -> Result<Self> {
        Ok(Self {
            base_event_id: Some(base_event_id),
            timezone,
            rule_string: compiler::serialize(&rule)?,
            rule,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Pattern, Termination};

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn event(timing: Timing) -> Event {
        Event {
            id: EventId(1),
            timing,
            details: EventDetails::named("standup"),
            recurrence_id: Some(RecurrenceId(1)),
            follows_recurrence: true,
            slot: Some(timing),
            active: true,
        }
    }

    #[test]
    fn test_timing_orders_by_start() {
        let early = Timing::timed(utc(2026, 3, 2, 9), utc(2026, 3, 2, 10));
        let late = Timing::timed(utc(2026, 3, 3, 9), utc(2026, 3, 3, 10));
        assert!(early < late);
    }

    #[test]
    fn test_from_start_keeps_span() {
        let base = Timing::timed(utc(2026, 3, 2, 9), utc(2026, 3, 2, 10));
        let moved = Timing::from_start(OccurrenceStart::At(utc(2026, 3, 9, 8)), base.span());
        let expected = Timing::timed(utc(2026, 3, 9, 8), utc(2026, 3, 9, 9));
        assert_eq!(moved, expected);

        let all_day = Timing::all_day(date(2026, 3, 2), date(2026, 3, 4));
        let next = Timing::from_start(OccurrenceStart::On(date(2026, 3, 9)), all_day.span());
        assert_eq!(next, Timing::all_day(date(2026, 3, 9), date(2026, 3, 11)));
    }

    #[test]
    fn test_time_shift_same_kind() {
        let from = Timing::timed(utc(2026, 3, 10, 9), utc(2026, 3, 10, 10));
        let to = Timing::timed(utc(2026, 3, 11, 14), utc(2026, 3, 11, 16));
        let base = Timing::timed(utc(2026, 3, 3, 9), utc(2026, 3, 3, 10));
        let shifted = TimeShift::between(from, to).apply(&base, &chrono_tz::UTC);
        let expected = Timing::timed(utc(2026, 3, 4, 14), utc(2026, 3, 4, 16));
        assert_eq!(shifted, expected);
    }

    #[test]
    fn test_time_shift_to_all_day_uses_local_dates() {
        let from = Timing::timed(utc(2026, 3, 10, 9), utc(2026, 3, 10, 10));
        let to = Timing::all_day(date(2026, 3, 12), date(2026, 3, 13));
        let base = Timing::timed(utc(2026, 3, 3, 9), utc(2026, 3, 3, 10));
        let shifted = TimeShift::between(from, to).apply(&base, &chrono_tz::UTC);
        assert_eq!(shifted, Timing::all_day(date(2026, 3, 5), date(2026, 3, 6)));
    }

    #[test]
    fn test_occurrence_key_uses_slot_for_exceptions() {
        let slot = Timing::timed(utc(2026, 3, 2, 9), utc(2026, 3, 2, 10));
        let mut ev = event(slot);
        assert_eq!(ev.occurrence_key(), slot);

        ev.timing = Timing::timed(utc(2026, 3, 2, 15), utc(2026, 3, 2, 16));
        ev.follows_recurrence = false;
        assert_eq!(ev.occurrence_key(), slot);
    }

    #[test]
    fn test_detach_clears_recurrence_fields() {
        let mut ev = event(Timing::all_day(date(2026, 3, 2), date(2026, 3, 3)));
        EventUpdate::detach().apply_to(&mut ev);
        assert_eq!(ev.recurrence_id, None);
        assert!(!ev.follows_recurrence);
        assert_eq!(ev.slot, None);
        assert!(ev.active);
    }

    #[test]
    fn test_details_patch_merges_properties() {
        let mut details = EventDetails::named("standup");
        details.properties = BTreeMap::from([
            ("room".to_string(), serde_json::json!("A1")),
            ("color".to_string(), serde_json::json!(3)),
        ]);

        let mut patch = DetailsPatch::name("daily sync");
        patch.properties = BTreeMap::from([
            ("room".to_string(), serde_json::Value::Null),
            ("remote".to_string(), serde_json::json!(true)),
        ]);
        patch.apply_to(&mut details);

        assert_eq!(details.name, "daily sync");
        assert!(!details.properties.contains_key("room"));
        assert_eq!(details.properties["color"], serde_json::json!(3));
        assert_eq!(details.properties["remote"], serde_json::json!(true));
    }

    #[test]
    fn test_set_rule_keeps_rule_string_in_sync() {
        let rule = RecurrenceRule::new(Pattern::Daily).with_termination(Termination::Count(3));
        let mut rec = Recurrence {
            id: RecurrenceId(7),
            base_event_id: Some(EventId(1)),
            timezone: None,
            rule,
            rule_string: String::new(),
        };
        rec.set_rule(rule.with_interval(2)).unwrap();
        assert_eq!(rec.rule_string, "FREQ=DAILY;INTERVAL=2;WKST=MO;COUNT=3");

        let before = rec.clone();
        assert!(rec.set_rule(rule.with_interval(0)).is_err());
        assert_eq!(rec, before);
    }

    #[test]
    fn test_set_rule_string_normalizes() {
        let rule = RecurrenceRule::new(Pattern::Daily);
        let mut rec = Recurrence {
            id: RecurrenceId(7),
            base_event_id: Some(EventId(1)),
            timezone: None,
            rule,
            rule_string: String::new(),
        };
        let text = "rrule:freq=weekly;byday=th,tu";
        rec.set_rule_string(text, date(2026, 3, 3), WeekStartDay::Monday)
            .unwrap();
        assert_eq!(rec.rule_string, "FREQ=WEEKLY;INTERVAL=1;BYDAY=TU,TH;WKST=MO");
    }
}
