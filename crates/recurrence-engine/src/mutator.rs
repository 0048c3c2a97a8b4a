//! Structural edits on a recurrence and its instance set.
//!
//! Each operation reads a snapshot from the store, computes a plan with a
//! pure function, validates everything that can fail, and only then writes.
//! Within a commit new instances are created before stale ones are detached,
//! and a recurrence is deleted last.
//!
//! [`RecurrenceMutator`] is the only writer of an event's `recurrence_id`,
//! `follows_recurrence` and `slot`, and of a recurrence's base event.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use chrono_tz::Tz;
use serde::Serialize;

use crate::compiler;
use crate::dst;
use crate::error::{EngineError, Result};
use crate::model::{
    Event, EventId, EventUpdate, EventWrite, NewEvent, NewRecurrence, Recurrence, RecurrenceId,
    TimeShift, Timing,
};
use crate::options::EngineOptions;
use crate::reconcile::{self, Reconciliation};
use crate::rule::{RecurrenceRule, RuleChanges, Termination};
use crate::store::{EventStore, InstanceFilter};

// ── Reports ─────────────────────────────────────────────────────────────────

/// What an operation changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MutationReport {
    /// The recurrence the edited family ended up in, if any.
    pub recurrence_id: Option<RecurrenceId>,
    pub created: Vec<EventId>,
    /// Events taken out of their recurrence and left standalone.
    pub detached: Vec<EventId>,
    /// Detached instances that were never edited individually. The caller
    /// decides whether to archive them.
    pub to_archive: Vec<EventId>,
    pub archived: Vec<EventId>,
    /// Events whose timing changed.
    pub shifted: Vec<EventId>,
    pub deleted_recurrences: Vec<RecurrenceId>,
}

impl MutationReport {
    fn for_recurrence(recurrence_id: RecurrenceId) -> Self {
        Self {
            recurrence_id: Some(recurrence_id),
            ..Self::default()
        }
    }

    /// Fold a later report into this one.
    pub fn merge(&mut self, other: MutationReport) {
        if other.recurrence_id.is_some() {
            self.recurrence_id = other.recurrence_id;
        }
        self.created.extend(other.created);
        self.detached.extend(other.detached);
        self.to_archive.extend(other.to_archive);
        self.archived.extend(other.archived);
        self.shifted.extend(other.shifted);
        self.deleted_recurrences.extend(other.deleted_recurrences);
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.detached.is_empty()
            && self.to_archive.is_empty()
            && self.archived.is_empty()
            && self.shifted.is_empty()
            && self.deleted_recurrences.is_empty()
    }
}

// ── Plans ───────────────────────────────────────────────────────────────────

/// What happens to a recurrence cut at an event.
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    /// Nothing is left before the cut.
    DeleteRecurrence,
    /// The recurrence ends on `until`; `new_base` replaces a detached base.
    Truncate {
        until: NaiveDate,
        new_base: Option<EventId>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopPlan {
    /// Instances at or after the cut, in start order.
    pub detach: Vec<Event>,
    pub outcome: StopOutcome,
}

/// Plan cutting `recurrence` at `event`.
///
/// Every instance starting at or after the event is detached. If instances
/// remain, the rule ends the day before the period containing the event, so
/// regenerating it never recreates the detached occurrences.
pub fn plan_stop_at(
    recurrence: &Recurrence,
    instances: &[Event],
    event: &Event,
    timezone: Tz,
) -> StopPlan {
    let cutoff = event.timing.start_instant();
    let (detach, remain): (Vec<Event>, Vec<Event>) = instances
        .iter()
        .cloned()
        .partition(|e| e.id == event.id || e.timing.start_instant() >= cutoff);

    if remain.is_empty() {
        return StopPlan {
            detach,
            outcome: StopOutcome::DeleteRecurrence,
        };
    }

    let period_start = dst::period_start(
        event.timing.local_date(&timezone),
        recurrence.rule.frequency(),
        recurrence.rule.week_start,
    );
    let until = period_start.pred_opt().unwrap_or(period_start);
    let base_remains = recurrence
        .base_event_id
        .is_some_and(|base| remain.iter().any(|e| e.id == base));
    let new_base = if base_remains {
        None
    } else {
        first_instance(&remain)
    };

    StopPlan {
        detach,
        outcome: StopOutcome::Truncate { until, new_base },
    }
}

/// The earliest instance that follows the recurrence, else the earliest one.
fn first_instance(instances: &[Event]) -> Option<EventId> {
    instances
        .iter()
        .find(|e| e.follows_recurrence)
        .or_else(|| instances.first())
        .map(|e| e.id)
}

// ── Mutator ─────────────────────────────────────────────────────────────────

/// Applies structural recurrence edits through an [`EventStore`].
pub struct RecurrenceMutator<'s, S: EventStore> {
    store: &'s mut S,
    options: EngineOptions,
}

impl<'s, S: EventStore> RecurrenceMutator<'s, S> {
    pub fn new(store: &'s mut S, options: EngineOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &S {
        &*self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut *self.store
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// The timezone instances of `recurrence_id` are expanded in.
    pub fn timezone_of(&self, recurrence_id: RecurrenceId) -> Result<Tz> {
        let recurrence = self.store.recurrence(recurrence_id)?;
        Ok(self.options.timezone_for(recurrence.timezone))
    }

    /// The recurrence's base event, checked to still belong to it.
    fn base_event(&self, recurrence: &Recurrence) -> Result<Event> {
        let base_id = recurrence
            .base_event_id
            .ok_or(EngineError::NoBaseEvent(recurrence.id))?;
        match self.store.event(base_id) {
            Ok(event) if event.active && event.recurrence_id == Some(recurrence.id) => Ok(event),
            Ok(_) | Err(EngineError::EventNotFound(_)) => {
                Err(EngineError::NoBaseEvent(recurrence.id))
            }
            Err(e) => Err(e),
        }
    }

    /// Make `event_id` recur with `rule`, creating or updating its recurrence,
    /// then bring the instance set in line with the rule.
    ///
    /// Missing occurrences get new instances carrying the base event's
    /// details. Instances whose occurrence is no longer generated are
    /// detached; those that were never edited are listed in `to_archive`.
    ///
    /// # Arguments
    ///
    /// * `event_id` - a standalone event, or the base event of its recurrence
    /// * `rule` - the rule to apply
    /// * `timezone` - the recurrence's timezone (`None` uses the default)
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidRule`] if the rule does not validate; nothing
    ///   is written
    /// - [`EngineError::NoBaseEvent`] if the event's recurrence has no base
    /// - [`EngineError::NotRecurrenceAnchor`] if the event is an instance but
    ///   not the base
    pub fn apply_recurrence(
        &mut self,
        event_id: EventId,
        rule: RecurrenceRule,
        timezone: Option<Tz>,
    ) -> Result<MutationReport> {
        let rule_string = compiler::serialize(&rule)?;
        let event = self.store.event(event_id)?;

        let existing = match event.recurrence_id {
            Some(rid) => {
                let recurrence = self.store.recurrence(rid)?;
                match recurrence.base_event_id {
                    Some(base) if base == event.id => Some(recurrence),
                    Some(_) => return Err(EngineError::NotRecurrenceAnchor(event.id)),
                    None => return Err(EngineError::NoBaseEvent(rid)),
                }
            }
            None => None,
        };

        let tz = self.options.timezone_for(timezone);
        let desired = reconcile::desired_ranges(&rule, &event.timing, tz)?;

        let recurrence = match existing {
            Some(mut recurrence) => {
                recurrence.rule = rule;
                recurrence.rule_string = rule_string;
                recurrence.timezone = timezone;
                self.store.save_recurrence(&recurrence)?;
                recurrence
            }
            None => {
                let recurrence = self.store.create_recurrence(NewRecurrence {
                    base_event_id: Some(event.id),
                    timezone,
                    rule,
                    rule_string,
                })?;
                let attach = EventUpdate::attach(recurrence.id, true, Some(event.timing));
                self.store.update_event(event.id, attach)?;
                tracing::debug!(
                    event = %event.id,
                    recurrence = %recurrence.id,
                    "created recurrence"
                );
                recurrence
            }
        };

        self.commit_apply(&recurrence, &desired)
    }

    /// Regenerate a recurrence's instances from its current rule and base.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoBaseEvent`] if the recurrence has no usable
    /// base event.
    pub fn reapply(&mut self, recurrence_id: RecurrenceId) -> Result<MutationReport> {
        let recurrence = self.store.recurrence(recurrence_id)?;
        let base = self.base_event(&recurrence)?;
        let timezone = self.options.timezone_for(recurrence.timezone);
        let desired = reconcile::desired_ranges(&recurrence.rule, &base.timing, timezone)?;
        self.commit_apply(&recurrence, &desired)
    }

    fn commit_apply(
        &mut self,
        recurrence: &Recurrence,
        desired: &BTreeSet<Timing>,
    ) -> Result<MutationReport> {
        let base = self.base_event(recurrence)?;
        let existing = self
            .store
            .query_instances(recurrence.id, InstanceFilter::All)?;
        let Reconciliation {
            keep,
            to_create,
            stale,
        } = reconcile::reconcile(desired, &existing);

        let mut report = MutationReport::for_recurrence(recurrence.id);
        for timing in to_create {
            let new = NewEvent::instance(recurrence.id, timing, base.details.clone());
            let created = self.store.create_event(new)?;
            report.created.push(created.id);
        }
        for event in &stale {
            self.store.update_event(event.id, EventUpdate::detach())?;
            report.detached.push(event.id);
            if event.follows_recurrence {
                report.to_archive.push(event.id);
            }
        }

        tracing::debug!(
            recurrence = %recurrence.id,
            kept = keep.len(),
            created = report.created.len(),
            detached = report.detached.len(),
            "reconciled instances"
        );

        let base_detached = stale.iter().any(|e| e.id == base.id);
        if base_detached && self.select_new_base_event(recurrence.id)?.is_none() {
            report.deleted_recurrences.push(recurrence.id);
            report.recurrence_id = None;
        }
        Ok(report)
    }

    /// Make the earliest remaining instance the base event.
    ///
    /// Instances that still follow the recurrence are preferred over
    /// exceptions. A recurrence with no instances left is deleted and `None`
    /// is returned.
    pub fn select_new_base_event(
        &mut self,
        recurrence_id: RecurrenceId,
    ) -> Result<Option<EventId>> {
        let mut recurrence = self.store.recurrence(recurrence_id)?;
        let instances = self
            .store
            .query_instances(recurrence_id, InstanceFilter::All)?;
        match first_instance(&instances) {
            Some(base) => {
                recurrence.base_event_id = Some(base);
                self.store.save_recurrence(&recurrence)?;
                tracing::debug!(
                    recurrence = %recurrence_id,
                    base = %base,
                    "selected new base event"
                );
                Ok(Some(base))
            }
            None => {
                self.store.delete_recurrence(recurrence_id)?;
                tracing::debug!(
                    recurrence = %recurrence_id,
                    "recurrence has no instances left, deleted"
                );
                Ok(None)
            }
        }
    }

    /// End the recurrence of `event_id` just before that event.
    ///
    /// The event and every later instance are detached. If nothing remains
    /// the recurrence is deleted; otherwise its rule becomes `Until` the day
    /// before the event's period. A no-op for standalone events.
    pub fn stop_at(&mut self, event_id: EventId) -> Result<MutationReport> {
        let event = self.store.event(event_id)?;
        let Some(rid) = event.recurrence_id else {
            return Ok(MutationReport::default());
        };
        let recurrence = self.store.recurrence(rid)?;
        let timezone = self.options.timezone_for(recurrence.timezone);
        let instances = self.store.query_instances(rid, InstanceFilter::All)?;
        let plan = plan_stop_at(&recurrence, &instances, &event, timezone);
        self.commit_stop(recurrence, plan)
    }

    fn commit_stop(
        &mut self,
        mut recurrence: Recurrence,
        plan: StopPlan,
    ) -> Result<MutationReport> {
        // Serialize first so a failure leaves the store untouched.
        let truncated = match plan.outcome {
            StopOutcome::Truncate { until, new_base } => {
                let rule = recurrence.rule.with_termination(Termination::Until(until));
                Some((rule, compiler::serialize(&rule)?, new_base))
            }
            StopOutcome::DeleteRecurrence => None,
        };

        let mut report = MutationReport::for_recurrence(recurrence.id);
        for event in &plan.detach {
            self.store.update_event(event.id, EventUpdate::detach())?;
            report.detached.push(event.id);
        }

        match truncated {
            Some((rule, rule_string, new_base)) => {
                recurrence.rule = rule;
                recurrence.rule_string = rule_string;
                if let Some(base) = new_base {
                    recurrence.base_event_id = Some(base);
                }
                self.store.save_recurrence(&recurrence)?;
                tracing::debug!(
                    recurrence = %recurrence.id,
                    rule = %recurrence.rule_string,
                    "truncated recurrence"
                );
            }
            None => {
                self.store.delete_recurrence(recurrence.id)?;
                report.deleted_recurrences.push(recurrence.id);
                report.recurrence_id = None;
                tracing::debug!(
                    recurrence = %recurrence.id,
                    "stopped recurrence at its first instance, deleted"
                );
            }
        }
        Ok(report)
    }

    /// Split the recurrence of `event_id` in two at that event.
    ///
    /// The old recurrence is stopped at the event. A new recurrence based on
    /// the event takes over the detached instances, with `changes` merged onto
    /// the old rule. Exceptions keep their status and slot. When the merged
    /// rule counts occurrences and `changes` does not set a termination, the
    /// new count is the number of instances moved over.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotRecurring`] for a standalone event
    /// - [`EngineError::InvalidRule`] if the merged rule does not validate;
    ///   nothing is written
    pub fn split_from(
        &mut self,
        event_id: EventId,
        changes: &RuleChanges,
    ) -> Result<MutationReport> {
        let event = self.store.event(event_id)?;
        let rid = event
            .recurrence_id
            .ok_or(EngineError::NotRecurring(event.id))?;
        let old = self.store.recurrence(rid)?;
        let old_timezone = self.options.timezone_for(old.timezone);
        let instances = self.store.query_instances(rid, InstanceFilter::All)?;
        let plan = plan_stop_at(&old, &instances, &event, old_timezone);

        let mut rule = changes.apply(&old.rule);
        if changes.termination.is_none() && matches!(rule.termination, Termination::Count(_)) {
            let count = u32::try_from(plan.detach.len().max(1)).unwrap_or(u32::MAX);
            rule.termination = Termination::Count(count);
        }
        let timezone = changes.timezone.unwrap_or(old.timezone);
        let new = NewRecurrence::new(event.id, timezone, rule)?;
        let moved = plan.detach.clone();

        let mut report = self.commit_stop(old, plan)?;
        report.detached.clear();

        let recurrence = self.store.create_recurrence(new)?;
        for instance in &moved {
            let update =
                EventUpdate::attach(recurrence.id, instance.follows_recurrence, instance.slot);
            self.store.update_event(instance.id, update)?;
        }
        tracing::debug!(
            from = %rid,
            to = %recurrence.id,
            moved = moved.len(),
            "split recurrence"
        );

        report.recurrence_id = Some(recurrence.id);
        Ok(report)
    }

    /// Take every instance of the event's recurrence out of it and delete the
    /// recurrence. A no-op for standalone events.
    pub fn break_all(&mut self, event_id: EventId) -> Result<MutationReport> {
        let event = self.store.event(event_id)?;
        match event.recurrence_id {
            Some(rid) => self.break_recurrence(rid),
            None => Ok(MutationReport::default()),
        }
    }

    /// Detach every instance of a recurrence and delete it.
    pub fn break_recurrence(&mut self, recurrence_id: RecurrenceId) -> Result<MutationReport> {
        let instances = self
            .store
            .query_instances(recurrence_id, InstanceFilter::All)?;
        let mut report = MutationReport::default();
        for instance in &instances {
            self.store.update_event(instance.id, EventUpdate::detach())?;
            report.detached.push(instance.id);
        }
        self.store.delete_recurrence(recurrence_id)?;
        report.deleted_recurrences.push(recurrence_id);
        tracing::debug!(
            recurrence = %recurrence_id,
            detached = instances.len(),
            "broke recurrence"
        );
        Ok(report)
    }

    /// Mark an instance as an exception moved to `timing`. It keeps the slot
    /// it was generated for.
    ///
    /// An instance that still follows the recurrence on exactly `timing` is
    /// detached and listed in `to_archive`; if it was the base, a new base is
    /// selected.
    pub fn make_exception(&mut self, event_id: EventId, timing: Timing) -> Result<MutationReport> {
        let event = self.store.event(event_id)?;
        let rid = event
            .recurrence_id
            .ok_or(EngineError::NotRecurring(event.id))?;
        let displaced: Vec<EventId> = self
            .store
            .query_instances(rid, InstanceFilter::All)?
            .into_iter()
            .filter(|e| e.id != event.id && e.follows_recurrence && e.timing == timing)
            .map(|e| e.id)
            .collect();

        let update = EventUpdate {
            timing: Some(timing),
            follows_recurrence: Some(false),
            slot: Some(Some(event.occurrence_key())),
            ..EventUpdate::default()
        };
        self.store.update_event(event.id, update)?;
        let mut report = MutationReport::for_recurrence(rid);
        report.shifted.push(event.id);

        if displaced.is_empty() {
            return Ok(report);
        }
        for id in &displaced {
            self.store.update_event(*id, EventUpdate::detach())?;
            report.detached.push(*id);
            report.to_archive.push(*id);
        }
        tracing::debug!(
            recurrence = %rid,
            exception = %event.id,
            displaced = displaced.len(),
            "exception moved onto a following instance"
        );
        let base = self.store.recurrence(rid)?.base_event_id;
        if base.is_some_and(|base| displaced.contains(&base)) {
            self.select_new_base_event(rid)?;
        }
        Ok(report)
    }

    /// Move the base event of a recurrence to a new timing. Its slot follows.
    pub fn move_base(&mut self, event_id: EventId, timing: Timing) -> Result<MutationReport> {
        let event = self.store.event(event_id)?;
        let rid = event
            .recurrence_id
            .ok_or(EngineError::NotRecurring(event.id))?;
        let recurrence = self.store.recurrence(rid)?;
        if recurrence.base_event_id != Some(event.id) {
            return Err(EngineError::NotRecurrenceAnchor(event.id));
        }
        let update = EventUpdate {
            timing: Some(timing),
            slot: Some(Some(timing)),
            ..EventUpdate::default()
        };
        self.store.update_event(event.id, update)?;
        let mut report = MutationReport::for_recurrence(rid);
        report.shifted.push(event.id);
        Ok(report)
    }

    /// Rebuild the whole recurrence of `edited_id` after a timing or rule
    /// change applied to all its events.
    ///
    /// The base event is shifted the way the edited event moved, and a weekly
    /// rule follows it to its new weekday unless the write sets a pattern. The
    /// base is detached and made the anchor of a fresh recurrence. Only after
    /// that succeeds are the old recurrence's other instances (and the edited
    /// event, when it is not the base) detached and archived and the old
    /// recurrence deleted.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotRecurring`] for a standalone event
    /// - [`EngineError::NoBaseEvent`] if the recurrence has no usable base
    /// - [`EngineError::InvalidRule`] if the new rule does not validate;
    ///   nothing is written
    pub fn rewrite_all(
        &mut self,
        edited_id: EventId,
        write: &EventWrite,
    ) -> Result<MutationReport> {
        let edited = self.store.event(edited_id)?;
        let rid = edited
            .recurrence_id
            .ok_or(EngineError::NotRecurring(edited.id))?;
        let old = self.store.recurrence(rid)?;
        let base = self.base_event(&old)?;

        let timezone = write.rule.timezone.unwrap_or(old.timezone);
        let tz = self.options.timezone_for(timezone);
        let base_timing = match write.moved_timing(&edited.timing) {
            Some(target) => TimeShift::between(edited.timing, target).apply(&base.timing, &tz),
            None => base.timing,
        };

        let mut rule = write.rule.apply(&old.rule);
        if write.rule.pattern.is_none() {
            rule = rule.with_moved_weekday(
                base.timing.local_date(&tz).weekday(),
                base_timing.local_date(&tz).weekday(),
            );
        }
        compiler::serialize(&rule)?;
        reconcile::desired_ranges(&rule, &base_timing, tz)?;

        let discard: Vec<EventId> = self
            .store
            .query_instances(rid, InstanceFilter::All)?
            .into_iter()
            .map(|e| e.id)
            .filter(|id| *id != base.id)
            .collect();

        let mut update = EventUpdate::detach();
        update.timing = Some(base_timing);
        if !write.details.is_empty() {
            update.details = Some(write.details.clone());
        }
        self.store.update_event(base.id, update)?;

        let mut report = self.apply_recurrence(base.id, rule, timezone)?;
        if base_timing != base.timing {
            report.shifted.push(base.id);
        }

        for id in &discard {
            self.store.update_event(*id, EventUpdate::detach())?;
        }
        self.store.archive_events(&discard)?;
        report.archived.extend(discard.iter().copied());
        self.store.delete_recurrence(rid)?;
        report.deleted_recurrences.push(rid);

        tracing::debug!(
            old = %rid,
            new = ?report.recurrence_id,
            archived = discard.len(),
            "rewrote recurrence"
        );
        Ok(report)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
