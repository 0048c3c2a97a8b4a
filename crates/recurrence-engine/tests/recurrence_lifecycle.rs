use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Europe::Brussels;

use recurrence_engine::rule::{Pattern, RuleChanges, Termination, WeekdaySet};
use recurrence_engine::store::{EventStore, InMemoryStore, InstanceFilter};
use recurrence_engine::{
    ChangeListener, DetailsPatch, EditScope, EditScopeCoordinator, EngineError, EngineOptions,
    EventDetails, EventId, EventWrite, RecurrenceId, RecurrenceMutator, Timing,
};

// ── Helpers ─────────────────────────────────────────────────────────────────

fn brussels(month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Brussels
        .with_ymd_and_hms(2026, month, day, hour, 0, 0)
        .unwrap()
        .with_timezone(&Utc)
}

/// One hour starting at `hour` Brussels time.
fn meeting(month: u32, day: u32, hour: u32) -> Timing {
    let start = brussels(month, day, hour);
    Timing::timed(start, start + chrono::Duration::hours(1))
}

fn options() -> EngineOptions {
    EngineOptions::default().with_timezone(Brussels)
}

fn tue_thu(count: u32) -> RuleChanges {
    RuleChanges::default()
        .with_pattern(Pattern::Weekly {
            weekdays: WeekdaySet::from_iter([Weekday::Tue, Weekday::Thu]),
        })
        .with_termination(Termination::Count(count))
}

/// A Tue/Thu series anchored on Thu Mar 5 2026 09:00 Brussels.
fn series(store: &mut InMemoryStore, count: u32) -> (EventId, RecurrenceId) {
    let base = store.insert_event(meeting(3, 5, 9), EventDetails::named("sync"));
    let write = EventWrite::default().with_rule(tue_thu(count));
    let report = EditScopeCoordinator::new(store, options())
        .write_event(base.id, &write, EditScope::SelfOnly)
        .unwrap();
    (base.id, report.recurrence_id.unwrap())
}

fn local_starts(store: &InMemoryStore, rid: RecurrenceId) -> Vec<(NaiveDate, u32)> {
    store
        .query_instances(rid, InstanceFilter::All)
        .unwrap()
        .iter()
        .map(|e| {
            let local = e.timing.start_instant().with_timezone(&Brussels);
            (local.date_naive(), local.hour())
        })
        .collect()
}

fn instance_on(store: &InMemoryStore, rid: RecurrenceId, month: u32, day: u32) -> EventId {
    let date = d(month, day);
    store
        .query_instances(rid, InstanceFilter::All)
        .unwrap()
        .into_iter()
        .find(|e| e.timing.local_date(&Brussels) == date)
        .map(|e| e.id)
        .unwrap()
}

fn d(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, month, day).unwrap()
}

// ── Creation ────────────────────────────────────────────────────────────────

#[test]
fn test_series_keeps_wall_clock_across_dst() {
    let mut store = InMemoryStore::new();
    let (_, rid) = series(&mut store, 10);

    let starts = local_starts(&store, rid);
    let dates: Vec<NaiveDate> = starts.iter().map(|(date, _)| *date).collect();
    assert_eq!(
        dates,
        vec![
            d(3, 5),
            d(3, 10),
            d(3, 12),
            d(3, 17),
            d(3, 19),
            d(3, 24),
            d(3, 26),
            d(3, 31),
            d(4, 2),
            d(4, 7),
        ]
    );
    assert!(starts.iter().all(|(_, hour)| *hour == 9));

    let instances = store.query_instances(rid, InstanceFilter::All).unwrap();
    assert_eq!(instances[0].timing.start_instant().hour(), 8);
    assert_eq!(instances[9].timing.start_instant().hour(), 7);
}

#[test]
fn test_listener_sees_created_instances() {
    let mut store = InMemoryStore::new();
    let base = store.insert_event(meeting(3, 5, 9), EventDetails::named("sync"));
    let seen: Rc<RefCell<Vec<EventId>>> = Rc::default();

    struct Collect(Rc<RefCell<Vec<EventId>>>);
    impl ChangeListener for Collect {
        fn instances_changed(&mut self, created: &[EventId], _shifted: &[EventId]) {
            self.0.borrow_mut().extend_from_slice(created);
        }
    }

    let write = EventWrite::default().with_rule(tue_thu(4));
    let report = EditScopeCoordinator::new(&mut store, options())
        .with_listener(Collect(Rc::clone(&seen)))
        .write_event(base.id, &write, EditScope::SelfOnly)
        .unwrap();
    assert_eq!(seen.borrow().len(), 3);
    assert_eq!(*seen.borrow(), report.created);
}

// ── Self only ───────────────────────────────────────────────────────────────

#[test]
fn test_exception_survives_regeneration() {
    let mut store = InMemoryStore::new();
    let (_, rid) = series(&mut store, 6);
    let target = instance_on(&store, rid, 3, 12);

    let write = EventWrite::default().with_timing(meeting(3, 13, 14));
    EditScopeCoordinator::new(&mut store, options())
        .write_event(target, &write, EditScope::SelfOnly)
        .unwrap();

    let report = RecurrenceMutator::new(&mut store, options())
        .reapply(rid)
        .unwrap();
    assert!(report.created.is_empty());
    assert!(report.detached.is_empty());

    let moved = store.event(target).unwrap();
    assert_eq!(moved.timing, meeting(3, 13, 14));
    assert_eq!(moved.slot, Some(meeting(3, 12, 9)));
    assert!(!moved.follows_recurrence);
    assert_eq!(moved.recurrence_id, Some(rid));
}

#[test]
fn test_self_only_rule_change_leaves_store_untouched() {
    let mut store = InMemoryStore::new();
    let (_, rid) = series(&mut store, 4);
    let target = instance_on(&store, rid, 3, 10);
    let before: Vec<_> = store.events().cloned().collect();

    let result = EditScopeCoordinator::new(&mut store, options()).write_event(
        target,
        &EventWrite::default().with_rule(RuleChanges::default().with_interval(2)),
        EditScope::SelfOnly,
    );
    assert!(matches!(result, Err(EngineError::UnsupportedEdit(_))));
    assert_eq!(store.events().cloned().collect::<Vec<_>>(), before);
}

// ── Future events ───────────────────────────────────────────────────────────

#[test]
fn test_future_events_move_splits_and_follows_weekday() {
    let mut store = InMemoryStore::new();
    let (base, old) = series(&mut store, 10);
    let edited = instance_on(&store, old, 3, 17);

    let report = EditScopeCoordinator::new(&mut store, options())
        .write_event(
            edited,
            &EventWrite::default().with_timing(meeting(3, 18, 10)),
            EditScope::FutureEvents,
        )
        .unwrap();
    let new = report.recurrence_id.unwrap();
    assert_ne!(new, old);

    let old_rec = store.recurrence(old).unwrap();
    assert_eq!(old_rec.base_event_id, Some(base));
    assert_eq!(old_rec.rule.termination, Termination::Until(d(3, 15)));
    assert_eq!(
        local_starts(&store, old),
        vec![(d(3, 5), 9), (d(3, 10), 9), (d(3, 12), 9)]
    );

    let new_rec = store.recurrence(new).unwrap();
    assert_eq!(new_rec.base_event_id, Some(edited));
    assert_eq!(
        new_rec.rule_string,
        "FREQ=WEEKLY;INTERVAL=1;BYDAY=WE,TH;WKST=MO;COUNT=7"
    );
    assert_eq!(
        local_starts(&store, new),
        vec![
            (d(3, 18), 10),
            (d(3, 19), 10),
            (d(3, 25), 10),
            (d(3, 26), 10),
            (d(4, 1), 10),
            (d(4, 2), 10),
            (d(4, 8), 10),
        ]
    );

    assert_eq!(report.created.len(), 6);
    assert_eq!(report.archived.len(), 6);
    assert!(store.event(edited).unwrap().active);
    assert!(report.shifted.contains(&edited));
}

#[test]
fn test_future_events_details_only_patch_tail() {
    let mut store = InMemoryStore::new();
    let (_, old) = series(&mut store, 6);
    let edited = instance_on(&store, old, 3, 17);

    let report = EditScopeCoordinator::new(&mut store, options())
        .write_event(
            edited,
            &EventWrite::default().with_details(DetailsPatch::name("retro")),
            EditScope::FutureEvents,
        )
        .unwrap();
    let new = report.recurrence_id.unwrap();

    let names = |rid| -> Vec<String> {
        store
            .query_instances(rid, InstanceFilter::All)
            .unwrap()
            .into_iter()
            .map(|e| e.details.name)
            .collect()
    };
    assert_eq!(names(old), vec!["sync", "sync", "sync"]);
    assert_eq!(names(new), vec!["retro", "retro", "retro"]);
    assert!(report.archived.is_empty());
}

#[test]
fn test_future_events_on_first_instance_rewrites_series() {
    let mut store = InMemoryStore::new();
    let (base, old) = series(&mut store, 10);

    let report = EditScopeCoordinator::new(&mut store, options())
        .write_event(
            base,
            &EventWrite::default().with_timing(meeting(3, 6, 9)),
            EditScope::FutureEvents,
        )
        .unwrap();
    let new = report.recurrence_id.unwrap();

    assert!(store.recurrence(old).is_err());
    let rec = store.recurrence(new).unwrap();
    assert_eq!(rec.base_event_id, Some(base));
    assert!(rec.rule_string.contains("BYDAY=TU,FR"), "{}", rec.rule_string);
    assert_eq!(local_starts(&store, new).len(), 10);
    assert_eq!(local_starts(&store, new)[0], (d(3, 6), 9));
}

#[test]
fn test_split_carries_exceptions_with_their_slot() {
    let mut store = InMemoryStore::new();
    let (_, old) = series(&mut store, 10);
    let exception = instance_on(&store, old, 3, 19);
    let write = EventWrite::default().with_timing(meeting(3, 20, 9));
    EditScopeCoordinator::new(&mut store, options())
        .write_event(exception, &write, EditScope::SelfOnly)
        .unwrap();

    let cut = instance_on(&store, old, 3, 17);
    let mut mutator = RecurrenceMutator::new(&mut store, options());
    let new = mutator
        .split_from(cut, &RuleChanges::default())
        .unwrap()
        .recurrence_id
        .unwrap();
    let report = mutator.reapply(new).unwrap();
    assert!(report.created.is_empty());
    assert!(report.detached.is_empty());

    let moved = store.event(exception).unwrap();
    assert_eq!(moved.recurrence_id, Some(new));
    assert!(!moved.follows_recurrence);
    assert_eq!(moved.slot, Some(meeting(3, 19, 9)));
    assert_eq!(moved.timing, meeting(3, 20, 9));
}

// ── All events ──────────────────────────────────────────────────────────────

#[test]
fn test_all_events_time_change_rebuilds_series() {
    let mut store = InMemoryStore::new();
    let (base, old) = series(&mut store, 4);
    let edited = instance_on(&store, old, 3, 10);

    let report = EditScopeCoordinator::new(&mut store, options())
        .write_event(
            edited,
            &EventWrite::default().with_timing(meeting(3, 10, 11)),
            EditScope::AllEvents,
        )
        .unwrap();
    let new = report.recurrence_id.unwrap();

    assert!(store.recurrence(old).is_err());
    assert_eq!(store.recurrence(new).unwrap().base_event_id, Some(base));
    assert_eq!(
        local_starts(&store, new),
        vec![
            (d(3, 5), 11),
            (d(3, 10), 11),
            (d(3, 12), 11),
            (d(3, 17), 11),
        ]
    );
    assert_eq!(report.archived.len(), 3);
    assert!(!store.event(edited).unwrap().active);
    assert_eq!(store.events().filter(|e| e.active).count(), 4);
}

#[test]
fn test_all_events_invalid_rule_writes_nothing() {
    let mut store = InMemoryStore::new();
    let (_, rid) = series(&mut store, 4);
    let edited = instance_on(&store, rid, 3, 12);
    let before: Vec<_> = store.events().cloned().collect();

    let result = EditScopeCoordinator::new(&mut store, options()).write_event(
        edited,
        &EventWrite::default().with_rule(RuleChanges::default().with_pattern(Pattern::Weekly {
            weekdays: WeekdaySet::empty(),
        })),
        EditScope::AllEvents,
    );
    assert!(matches!(result, Err(EngineError::InvalidRule(_))));
    assert_eq!(store.events().cloned().collect::<Vec<_>>(), before);
    assert!(store.recurrence(rid).is_ok());
}

// ── Stop ────────────────────────────────────────────────────────────────────

#[test]
fn test_stopped_series_never_regenerates_detached_occurrences() {
    let mut store = InMemoryStore::new();
    let (_, rid) = series(&mut store, 10);
    let cut = instance_on(&store, rid, 3, 17);

    let mut mutator = RecurrenceMutator::new(&mut store, options());
    let stopped = mutator.stop_at(cut).unwrap();
    assert_eq!(stopped.detached.len(), 7);
    let again = mutator.reapply(rid).unwrap();
    assert!(again.created.is_empty());
    assert!(again.detached.is_empty());

    assert_eq!(local_starts(&store, rid).len(), 3);
    assert_eq!(store.event(cut).unwrap().recurrence_id, None);
}
