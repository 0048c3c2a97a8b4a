//! Desired occurrence ranges and their reconciliation with stored instances.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::Result;
use crate::generator::{self, Anchor, OccurrenceStart, MAX_OCCURRENCES};
use crate::model::{Event, Timing};
use crate::rule::{RecurrenceRule, Termination};

/// The outcome of matching a desired range set against existing instances.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Instances whose occurrence is still desired.
    pub keep: Vec<Event>,
    /// Desired ranges no instance stands for yet.
    pub to_create: Vec<Timing>,
    /// Instances whose occurrence is no longer desired, or duplicates.
    pub stale: Vec<Event>,
}

/// Match `existing` instances against `desired` ranges.
///
/// Instances are matched by [`Event::occurrence_key`], so an exception that
/// was moved still claims the occurrence it was generated for. Each range is
/// claimed by at most one instance; later duplicates are stale.
///
/// Exceptions are matched first. A range an exception was moved onto is
/// occupied: an instance still following the recurrence there is stale, and
/// no new instance is created for it.
pub fn reconcile(desired: &BTreeSet<Timing>, existing: &[Event]) -> Reconciliation {
    let mut claimed = BTreeSet::new();
    let mut occupied = BTreeSet::new();
    let mut keep = Vec::new();
    let mut stale = Vec::new();

    let (exceptions, following): (Vec<&Event>, Vec<&Event>) =
        existing.iter().partition(|e| !e.follows_recurrence);

    for event in exceptions.into_iter().chain(following) {
        let key = event.occurrence_key();
        let blocked = event.follows_recurrence && occupied.contains(&event.timing);
        if !blocked && desired.contains(&key) && claimed.insert(key) {
            occupied.insert(event.timing);
            keep.push(event.clone());
        } else {
            stale.push(event.clone());
        }
    }

    let to_create = desired
        .difference(&claimed)
        .filter(|timing| !occupied.contains(*timing))
        .copied()
        .collect();
    Reconciliation {
        keep,
        to_create,
        stale,
    }
}

fn on_or_after(starts: Vec<OccurrenceStart>, not_before: DateTime<Utc>) -> Vec<OccurrenceStart> {
    starts
        .into_iter()
        .filter(|s| s.instant() >= not_before)
        .collect()
}

/// The ranges a recurrence anchored on `base` should have instances for.
///
/// Occurrences before the base's start are dropped. Because expansion starts
/// at the period start, a `Count(n)` rule can lose some of its `n` to that
/// filter; it is then expanded again with a larger count and truncated, so
/// exactly `n` ranges come back unless the retry runs into
/// [`MAX_OCCURRENCES`].
///
/// # Errors
///
/// Propagates rule and expansion errors from [`generator::occurrences`].
pub fn desired_ranges(
    rule: &RecurrenceRule,
    base: &Timing,
    timezone: Tz,
) -> Result<BTreeSet<Timing>> {
    let anchor = Anchor::of_timing(base, timezone);
    let not_before = base.start_instant();
    let mut upcoming = on_or_after(generator::occurrences(rule, &anchor)?, not_before);

    if let Termination::Count(n) = rule.termination {
        let wanted = (n as usize).min(MAX_OCCURRENCES);
        if upcoming.len() < wanted {
            let retry = 2 * wanted - upcoming.len();
            tracing::trace!(
                wanted,
                got = upcoming.len(),
                retry,
                "count fell short after filtering, expanding again"
            );
            let retry = u32::try_from(retry).unwrap_or(u32::MAX);
            let starts = generator::occurrences_with_count(rule, &anchor, retry)?;
            upcoming = on_or_after(starts, not_before);
        }
        upcoming.truncate(wanted);
    }

    let span = base.span();
    Ok(upcoming
        .into_iter()
        .map(|start| Timing::from_start(start, span))
        .collect())
}
