//! Routes event writes by edit scope.
//!
//! A write to a recurring event is applied to that occurrence only, to it and
//! every later one, or to the whole series. The coordinator turns each case
//! into [`RecurrenceMutator`] operations, archives the instances they leave
//! behind, and tells a [`ChangeListener`] which instances were created or
//! moved.

use chrono::Datelike;
use serde::Serialize;

use crate::compiler;
use crate::error::{EngineError, Result};
use crate::model::{DetailsPatch, Event, EventId, EventUpdate, EventWrite, RecurrenceId};
use crate::mutator::{MutationReport, RecurrenceMutator};
use crate::options::EngineOptions;
use crate::reconcile;
use crate::rule::RecurrenceRule;
use crate::store::{EventStore, InstanceFilter};

/// Which occurrences a write applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EditScope {
    #[default]
    SelfOnly,
    FutureEvents,
    AllEvents,
}

/// Notified after a write with the instances it created and the events whose
/// timing it changed.
pub trait ChangeListener {
    fn instances_changed(&mut self, created: &[EventId], shifted: &[EventId]);
}

/// A listener that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl ChangeListener for NoopListener {
    fn instances_changed(&mut self, _created: &[EventId], _shifted: &[EventId]) {}
}

/// Applies [`EventWrite`]s with an [`EditScope`].
pub struct EditScopeCoordinator<'s, S: EventStore> {
    mutator: RecurrenceMutator<'s, S>,
    listener: Box<dyn ChangeListener + 's>,
}

impl<'s, S: EventStore> EditScopeCoordinator<'s, S> {
    pub fn new(store: &'s mut S, options: EngineOptions) -> Self {
        Self {
            mutator: RecurrenceMutator::new(store, options),
            listener: Box::new(NoopListener),
        }
    }

    pub fn with_listener(mut self, listener: impl ChangeListener + 's) -> Self {
        self.listener = Box::new(listener);
        self
    }

    pub fn store(&self) -> &S {
        self.mutator.store()
    }

    /// Apply `write` to `event_id` and the occurrences `scope` selects.
    ///
    /// Standalone events ignore the scope. Giving one a rule (or
    /// `recurrency: Some(true)`) makes it the base of a new recurrence,
    /// starting from a weekly rule on its own weekday. `recurrency:
    /// Some(false)` on a recurring event breaks the whole recurrence apart.
    ///
    /// # Errors
    ///
    /// - [`EngineError::UnsupportedEdit`] for rule changes with
    ///   [`EditScope::SelfOnly`]
    /// - [`EngineError::InvalidRule`] if the resulting rule does not validate
    /// - any error of the underlying [`RecurrenceMutator`] operation
    pub fn write_event(
        &mut self,
        event_id: EventId,
        write: &EventWrite,
        scope: EditScope,
    ) -> Result<MutationReport> {
        let event = self.mutator.store().event(event_id)?;
        let starts_recurrence = write.recurrency == Some(true)
            || (write.recurrency.is_none() && !write.rule.is_empty());

        let mut report = match event.recurrence_id {
            None if starts_recurrence => self.start_recurring(&event, write)?,
            None => self.write_plain(&event, write)?,
            Some(_) if write.recurrency == Some(false) => self.stop_recurring(&event, write)?,
            Some(rid) => match scope {
                EditScope::SelfOnly => self.write_self_only(&event, write)?,
                EditScope::FutureEvents if self.is_first_instance(&event, rid)? => {
                    self.write_all_events(&event, write, rid)?
                }
                EditScope::FutureEvents => self.write_future_events(&event, write, rid)?,
                EditScope::AllEvents => self.write_all_events(&event, write, rid)?,
            },
        };

        self.archive_detached(&mut report, event.id)?;
        self.listener
            .instances_changed(&report.created, &report.shifted);
        tracing::debug!(
            event = %event.id,
            scope = ?scope,
            created = report.created.len(),
            archived = report.archived.len(),
            "applied event write"
        );
        Ok(report)
    }

    fn is_first_instance(&self, event: &Event, rid: RecurrenceId) -> Result<bool> {
        let instances = self
            .mutator
            .store()
            .query_instances(rid, InstanceFilter::All)?;
        Ok(instances.first().is_some_and(|first| first.id == event.id))
    }

    /// Timing and details only; no recurrence field is touched.
    fn write_plain(&mut self, event: &Event, write: &EventWrite) -> Result<MutationReport> {
        let moved = write.moved_timing(&event.timing);
        let update = EventUpdate {
            timing: moved,
            details: (!write.details.is_empty()).then(|| write.details.clone()),
            ..EventUpdate::default()
        };
        let mut report = MutationReport {
            recurrence_id: event.recurrence_id,
            ..MutationReport::default()
        };
        if update != EventUpdate::default() {
            self.mutator.store_mut().update_event(event.id, update)?;
        }
        if moved.is_some() {
            report.shifted.push(event.id);
        }
        Ok(report)
    }

    fn start_recurring(&mut self, event: &Event, write: &EventWrite) -> Result<MutationReport> {
        let options = *self.mutator.options();
        let timezone = write.rule.timezone.flatten();
        let tz = options.timezone_for(timezone);
        let timing = write.timing.unwrap_or(event.timing);
        let default_rule =
            RecurrenceRule::default_for(timing.local_date(&tz)).with_week_start(options.week_start);
        let rule = write.rule.apply(&default_rule);
        compiler::serialize(&rule)?;
        reconcile::desired_ranges(&rule, &timing, tz)?;

        let mut report = self.write_plain(event, write)?;
        report.merge(self.mutator.apply_recurrence(event.id, rule, timezone)?);
        Ok(report)
    }

    fn stop_recurring(&mut self, event: &Event, write: &EventWrite) -> Result<MutationReport> {
        let mut report = self.write_plain(event, write)?;
        report.merge(self.mutator.break_all(event.id)?);
        report.recurrence_id = None;
        Ok(report)
    }

    fn write_self_only(&mut self, event: &Event, write: &EventWrite) -> Result<MutationReport> {
        if !write.rule.is_empty() {
            return Err(EngineError::UnsupportedEdit(
                "recurrence fields can only change for future or all events".to_string(),
            ));
        }
        let mut report = MutationReport {
            recurrence_id: event.recurrence_id,
            ..MutationReport::default()
        };
        if !write.details.is_empty() {
            self.mutator
                .store_mut()
                .update_event(event.id, EventUpdate::details(write.details.clone()))?;
        }
        if let Some(timing) = write.moved_timing(&event.timing) {
            report.merge(self.mutator.make_exception(event.id, timing)?);
        }
        Ok(report)
    }

    fn write_future_events(
        &mut self,
        event: &Event,
        write: &EventWrite,
        rid: RecurrenceId,
    ) -> Result<MutationReport> {
        let moved = write.moved_timing(&event.timing);
        let mut changes = write.rule.clone();

        if let Some(target) = moved {
            if changes.pattern.is_none() {
                let recurrence = self.mutator.store().recurrence(rid)?;
                let tz = self
                    .mutator
                    .options()
                    .timezone_for(changes.timezone.unwrap_or(recurrence.timezone));
                let followed = recurrence.rule.with_moved_weekday(
                    event.timing.local_date(&tz).weekday(),
                    target.local_date(&tz).weekday(),
                );
                if followed.pattern != recurrence.rule.pattern {
                    changes.pattern = Some(followed.pattern);
                }
            }
        }

        let mut report = self.mutator.split_from(event.id, &changes)?;
        let new_rid = report
            .recurrence_id
            .ok_or(EngineError::NotRecurring(event.id))?;

        if let Some(target) = moved {
            report.merge(self.mutator.move_base(event.id, target)?);
        }
        if moved.is_some() || !write.rule.is_empty() {
            report.merge(self.mutator.reapply(new_rid)?);
        }
        if !write.details.is_empty() {
            report.merge(self.patch_instances(new_rid, &write.details)?);
        }
        Ok(report)
    }

    fn write_all_events(
        &mut self,
        event: &Event,
        write: &EventWrite,
        rid: RecurrenceId,
    ) -> Result<MutationReport> {
        if write.moved_timing(&event.timing).is_some() || !write.rule.is_empty() {
            self.mutator.rewrite_all(event.id, write)
        } else {
            self.patch_instances(rid, &write.details)
        }
    }

    fn patch_instances(
        &mut self,
        rid: RecurrenceId,
        patch: &DetailsPatch,
    ) -> Result<MutationReport> {
        let instances = self
            .mutator
            .store()
            .query_instances(rid, InstanceFilter::All)?;
        if !patch.is_empty() {
            for instance in &instances {
                self.mutator
                    .store_mut()
                    .update_event(instance.id, EventUpdate::details(patch.clone()))?;
            }
        }
        Ok(MutationReport {
            recurrence_id: Some(rid),
            ..MutationReport::default()
        })
    }

    /// Archive detached, unedited instances. The edited event itself is
    /// never archived.
    fn archive_detached(&mut self, report: &mut MutationReport, edited: EventId) -> Result<()> {
        let pending = std::mem::take(&mut report.to_archive);
        let ids: Vec<EventId> = pending
            .into_iter()
            .filter(|id| *id != edited && !report.archived.contains(id))
            .collect();
        if !ids.is_empty() {
            self.mutator.store_mut().archive_events(&ids)?;
            report.archived.extend(ids);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventDetails, Timing};
    use crate::rule::{Pattern, RuleChanges, Termination};
    use crate::store::InMemoryStore;
    use chrono::NaiveDate;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn day(d: u32) -> Timing {
        let start = NaiveDate::from_ymd_opt(2026, 3, d).unwrap();
        Timing::all_day(start, start.succ_opt().unwrap())
    }

    fn daily(count: u32) -> RuleChanges {
        RuleChanges::default()
            .with_pattern(Pattern::Daily)
            .with_termination(Termination::Count(count))
    }

    fn instance_ids(store: &InMemoryStore, rid: RecurrenceId) -> Vec<EventId> {
        let instances = store.query_instances(rid, InstanceFilter::All).unwrap();
        instances.iter().map(|e| e.id).collect()
    }

    /// Make `event` the base of a daily recurrence of three.
    fn recurring(
        coordinator: &mut EditScopeCoordinator<'_, InMemoryStore>,
        event: EventId,
    ) -> RecurrenceId {
        let write = EventWrite::default().with_rule(daily(3));
        let report = coordinator
            .write_event(event, &write, EditScope::SelfOnly)
            .unwrap();
        report.recurrence_id.unwrap()
    }

    #[derive(Clone, Default)]
    struct Recorder(Rc<RefCell<Vec<(usize, usize)>>>);

    impl ChangeListener for Recorder {
        fn instances_changed(&mut self, created: &[EventId], shifted: &[EventId]) {
            self.0.borrow_mut().push((created.len(), shifted.len()));
        }
    }

    #[test]
    fn test_rule_on_standalone_event_starts_recurrence() {
        let mut store = InMemoryStore::new();
        let event = store.insert_event(day(2), EventDetails::named("gym"));
        let recorder = Recorder::default();
        let write = EventWrite::default().with_rule(daily(3));
        let report = EditScopeCoordinator::new(&mut store, EngineOptions::default())
            .with_listener(recorder.clone())
            .write_event(event.id, &write, EditScope::SelfOnly)
            .unwrap();
        assert_eq!(report.created.len(), 2);
        assert_eq!(recorder.0.borrow().as_slice(), &[(2, 0)]);
        assert!(store.event(event.id).unwrap().recurrence_id.is_some());
    }

    #[test]
    fn test_recurrency_flag_uses_weekly_default() {
        let mut store = InMemoryStore::new();
        let event = store.insert_event(day(4), EventDetails::named("gym"));
        let write = EventWrite::default().with_recurrency(true);
        let report = EditScopeCoordinator::new(&mut store, EngineOptions::default())
            .write_event(event.id, &write, EditScope::SelfOnly)
            .unwrap();
        let rec = store.recurrence(report.recurrence_id.unwrap()).unwrap();
        assert_eq!(rec.rule_string, "FREQ=WEEKLY;INTERVAL=1;BYDAY=WE;WKST=MO");
    }

    #[test]
    fn test_self_only_rule_change_is_rejected() {
        let mut store = InMemoryStore::new();
        let event = store.insert_event(day(2), EventDetails::named("gym"));
        let mut coordinator = EditScopeCoordinator::new(&mut store, EngineOptions::default());
        recurring(&mut coordinator, event.id);
        let result = coordinator.write_event(
            event.id,
            &EventWrite::default().with_rule(RuleChanges::default().with_interval(2)),
            EditScope::SelfOnly,
        );
        assert!(matches!(result, Err(EngineError::UnsupportedEdit(_))));
    }

    #[test]
    fn test_self_only_move_creates_exception() {
        let mut store = InMemoryStore::new();
        let event = store.insert_event(day(2), EventDetails::named("gym"));
        let mut coordinator = EditScopeCoordinator::new(&mut store, EngineOptions::default());
        let rid = recurring(&mut coordinator, event.id);
        let second = instance_ids(coordinator.store(), rid)[1];

        let write = EventWrite::default().with_timing(day(10));
        let report = coordinator
            .write_event(second, &write, EditScope::SelfOnly)
            .unwrap();
        assert_eq!(report.shifted, vec![second]);

        let moved = coordinator.store().event(second).unwrap();
        assert!(!moved.follows_recurrence);
        assert_eq!(moved.slot, Some(day(3)));
        assert_eq!(moved.recurrence_id, Some(rid));
    }

    #[test]
    fn test_self_only_move_onto_another_instance_archives_it() {
        let mut store = InMemoryStore::new();
        let event = store.insert_event(day(2), EventDetails::named("gym"));
        let mut coordinator = EditScopeCoordinator::new(&mut store, EngineOptions::default());
        let rid = recurring(&mut coordinator, event.id);
        let ids = instance_ids(coordinator.store(), rid);

        let write = EventWrite::default().with_timing(day(4));
        let report = coordinator
            .write_event(ids[1], &write, EditScope::SelfOnly)
            .unwrap();
        assert_eq!(report.archived, vec![ids[2]]);
        drop(coordinator);

        RecurrenceMutator::new(&mut store, EngineOptions::default())
            .reapply(rid)
            .unwrap();
        let timings: Vec<Timing> = store
            .query_instances(rid, InstanceFilter::All)
            .unwrap()
            .iter()
            .map(|e| e.timing)
            .collect();
        assert_eq!(timings, vec![day(2), day(4)]);
    }

    #[test]
    fn test_recurrency_false_breaks_series() {
        let mut store = InMemoryStore::new();
        let event = store.insert_event(day(2), EventDetails::named("gym"));
        let mut coordinator = EditScopeCoordinator::new(&mut store, EngineOptions::default());
        recurring(&mut coordinator, event.id);
        let write = EventWrite::default().with_recurrency(false);
        let report = coordinator
            .write_event(event.id, &write, EditScope::AllEvents)
            .unwrap();
        assert_eq!(report.deleted_recurrences.len(), 1);
        assert_eq!(report.recurrence_id, None);
        let store = coordinator.store();
        assert!(store.events().all(|e| e.active && !e.is_recurring()));
    }

    #[test]
    fn test_all_events_details_patch_every_instance() {
        let mut store = InMemoryStore::new();
        let event = store.insert_event(day(2), EventDetails::named("gym"));
        let mut coordinator = EditScopeCoordinator::new(&mut store, EngineOptions::default());
        let rid = recurring(&mut coordinator, event.id);
        let third = instance_ids(coordinator.store(), rid)[2];
        let write = EventWrite::default().with_details(DetailsPatch::name("swim"));
        coordinator
            .write_event(third, &write, EditScope::AllEvents)
            .unwrap();
        let names: Vec<String> = coordinator
            .store()
            .query_instances(rid, InstanceFilter::All)
            .unwrap()
            .into_iter()
            .map(|e| e.details.name)
            .collect();
        assert_eq!(names, vec!["swim", "swim", "swim"]);
    }
}
