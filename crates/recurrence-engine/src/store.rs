//! Storage seam for events and recurrences.
//!
//! The engine never holds events itself: every read and write goes through an
//! [`EventStore`]. [`InMemoryStore`] is the reference implementation used by
//! the tests.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{EngineError, Result};
use crate::model::{
    Event, EventDetails, EventId, EventUpdate, NewEvent, NewRecurrence, Recurrence, RecurrenceId,
    Timing,
};

/// Which instances of a recurrence to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceFilter {
    All,
    StartingFrom(DateTime<Utc>),
    StartingBefore(DateTime<Utc>),
}

impl InstanceFilter {
    pub fn matches(&self, timing: &Timing) -> bool {
        match self {
            InstanceFilter::All => true,
            InstanceFilter::StartingFrom(from) => timing.start_instant() >= *from,
            InstanceFilter::StartingBefore(before) => timing.start_instant() < *before,
        }
    }
}

/// Persistence for events and recurrences.
pub trait EventStore {
    fn event(&self, id: EventId) -> Result<Event>;

    fn create_event(&mut self, new: NewEvent) -> Result<Event>;

    fn update_event(&mut self, id: EventId, update: EventUpdate) -> Result<()>;

    /// Active instances of a recurrence ordered by start, then id.
    fn query_instances(
        &self,
        recurrence_id: RecurrenceId,
        filter: InstanceFilter,
    ) -> Result<Vec<Event>>;

    /// Soft-delete events. Archived events are no longer returned as instances.
    fn archive_events(&mut self, ids: &[EventId]) -> Result<()>;

    fn recurrence(&self, id: RecurrenceId) -> Result<Recurrence>;

    fn create_recurrence(&mut self, new: NewRecurrence) -> Result<Recurrence>;

    fn save_recurrence(&mut self, recurrence: &Recurrence) -> Result<()>;

    /// Remove a recurrence. Events still pointing at it are detached.
    fn delete_recurrence(&mut self, id: RecurrenceId) -> Result<()>;
}

/// An [`EventStore`] backed by ordered maps.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    events: BTreeMap<EventId, Event>,
    recurrences: BTreeMap<RecurrenceId, Recurrence>,
    next_event: u64,
    next_recurrence: u64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a one-off event.
    pub fn insert_event(&mut self, timing: Timing, details: EventDetails) -> Event {
        self.next_event += 1;
        let event = Event {
            id: EventId(self.next_event),
            timing,
            details,
            recurrence_id: None,
            follows_recurrence: false,
            slot: None,
            active: true,
        };
        self.events.insert(event.id, event.clone());
        event
    }

    /// Every stored event, archived ones included.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    pub fn recurrences(&self) -> impl Iterator<Item = &Recurrence> {
        self.recurrences.values()
    }
}

impl EventStore for InMemoryStore {
    fn event(&self, id: EventId) -> Result<Event> {
        self.events
            .get(&id)
            .cloned()
            .ok_or(EngineError::EventNotFound(id))
    }

    fn create_event(&mut self, new: NewEvent) -> Result<Event> {
        if let Some(rid) = new.recurrence_id {
            if !self.recurrences.contains_key(&rid) {
                return Err(EngineError::RecurrenceNotFound(rid));
            }
        }
        self.next_event += 1;
        let event = Event {
            id: EventId(self.next_event),
            timing: new.timing,
            details: new.details,
            recurrence_id: new.recurrence_id,
            follows_recurrence: new.follows_recurrence,
            slot: new.slot,
            active: true,
        };
        self.events.insert(event.id, event.clone());
        Ok(event)
    }

    fn update_event(&mut self, id: EventId, update: EventUpdate) -> Result<()> {
        if let Some(Some(rid)) = update.recurrence_id {
            if !self.recurrences.contains_key(&rid) {
                return Err(EngineError::RecurrenceNotFound(rid));
            }
        }
        let event = self
            .events
            .get_mut(&id)
            .ok_or(EngineError::EventNotFound(id))?;
        update.apply_to(event);
        Ok(())
    }

    fn query_instances(
        &self,
        recurrence_id: RecurrenceId,
        filter: InstanceFilter,
    ) -> Result<Vec<Event>> {
        let mut instances: Vec<Event> = self
            .events
            .values()
            .filter(|e| e.active && e.recurrence_id == Some(recurrence_id))
            .filter(|e| filter.matches(&e.timing))
            .cloned()
            .collect();
        instances.sort_by_key(|e| (e.timing.start_instant(), e.id));
        Ok(instances)
    }

    fn archive_events(&mut self, ids: &[EventId]) -> Result<()> {
        if let Some(missing) = ids.iter().find(|id| !self.events.contains_key(*id)) {
            return Err(EngineError::EventNotFound(*missing));
        }
        for id in ids {
            if let Some(event) = self.events.get_mut(id) {
                event.active = false;
            }
        }
        Ok(())
    }

    fn recurrence(&self, id: RecurrenceId) -> Result<Recurrence> {
        self.recurrences
            .get(&id)
            .cloned()
            .ok_or(EngineError::RecurrenceNotFound(id))
    }

    fn create_recurrence(&mut self, new: NewRecurrence) -> Result<Recurrence> {
        self.next_recurrence += 1;
        let recurrence = Recurrence {
            id: RecurrenceId(self.next_recurrence),
            base_event_id: new.base_event_id,
            timezone: new.timezone,
            rule: new.rule,
            rule_string: new.rule_string,
        };
        self.recurrences.insert(recurrence.id, recurrence.clone());
        Ok(recurrence)
    }

    fn save_recurrence(&mut self, recurrence: &Recurrence) -> Result<()> {
        let stored = self
            .recurrences
            .get_mut(&recurrence.id)
            .ok_or(EngineError::RecurrenceNotFound(recurrence.id))?;
        stored.clone_from(recurrence);
        Ok(())
    }

    fn delete_recurrence(&mut self, id: RecurrenceId) -> Result<()> {
        self.recurrences
            .remove(&id)
            .ok_or(EngineError::RecurrenceNotFound(id))?;
        for event in self.events.values_mut().filter(|e| e.recurrence_id == Some(id)) {
            EventUpdate::detach().apply_to(event);
        }
        Ok(())
    }
}
