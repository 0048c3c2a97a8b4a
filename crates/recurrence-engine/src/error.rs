//! Error types for recurrence engine operations.

use thiserror::Error;

use crate::model::{EventId, RecurrenceId};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid recurrence rule: {0}")]
    InvalidRule(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid datetime: {0}")]
    InvalidDatetime(String),

    #[error("Recurrence {0} has no base event")]
    NoBaseEvent(RecurrenceId),

    #[error("Event {0} is not the base event of its recurrence")]
    NotRecurrenceAnchor(EventId),

    #[error("Event {0} does not belong to a recurrence")]
    NotRecurring(EventId),

    #[error("Unsupported edit: {0}")]
    UnsupportedEdit(String),

    #[error("Expansion error: {0}")]
    Expansion(String),

    #[error("Event {0} not found")]
    EventNotFound(EventId),

    #[error("Recurrence {0} not found")]
    RecurrenceNotFound(RecurrenceId),

    #[error("Store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
