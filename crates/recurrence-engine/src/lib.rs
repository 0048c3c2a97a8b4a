//! # recurrence-engine
//!
//! Recurring calendar events: rules, occurrences, and the instances that
//! materialize them.
//!
//! A recurrence is anchored on a base event. Its rule is expanded into
//! DST-correct occurrence ranges, one stored instance is kept per range, and
//! edits to a single occurrence, to an occurrence and everything after it, or
//! to the whole series are turned into structural changes on that set.
//!
//! ## Modules
//!
//! - [`rule`] — structured recurrence fields
//! - [`compiler`] — rule strings ↔ structured rules, and the expansion form
//! - [`generator`] — rule + anchor → occurrence starts, capped at [`MAX_OCCURRENCES`]
//! - [`dst`] — period alignment of expansion anchors across DST changes
//! - [`reconcile`] — desired ranges vs. stored instances
//! - [`mutator`] — apply, stop, split, break and rewrite recurrences
//! - [`scope`] — route event writes by edit scope
//! - [`store`] — the storage seam, with an in-memory implementation
//! - [`model`] — events, recurrences and their payloads
//! - [`temporal`] — calendar and timezone helpers
//! - [`options`] — engine defaults
//! - [`error`] — error types

pub mod compiler;
pub mod dst;
pub mod error;
pub mod generator;
pub mod model;
pub mod mutator;
pub mod options;
pub mod reconcile;
pub mod rule;
pub mod scope;
pub mod store;
pub mod temporal;

pub use error::{EngineError, Result};
pub use generator::{
    occurrences, occurrences_with_count, Anchor, OccurrenceStart, MAX_OCCURRENCES,
};
pub use model::{
    DetailsPatch, Event, EventDetails, EventId, EventUpdate, EventWrite, NewEvent, NewRecurrence,
    Recurrence, RecurrenceId, TimeShift, Timing,
};
pub use mutator::{MutationReport, RecurrenceMutator};
pub use options::EngineOptions;
pub use reconcile::{desired_ranges, reconcile, Reconciliation};
pub use rule::{
    Frequency, MonthBy, MonthOrdinal, Pattern, RecurrenceRule, RuleChanges, Termination, WeekdaySet,
};
pub use scope::{ChangeListener, EditScope, EditScopeCoordinator, NoopListener};
pub use store::{EventStore, InMemoryStore, InstanceFilter};
pub use temporal::WeekStartDay;
