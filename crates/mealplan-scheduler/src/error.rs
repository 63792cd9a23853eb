//! Error types for the scheduler.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in scheduler operations.
///
/// Notification delivery failure is deliberately absent: the engine logs it
/// and the event transitions normally.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed or out-of-range time spec. Rejected before any state change.
    #[error("invalid time spec '{spec}': {reason}")]
    InvalidTimeSpec { spec: String, reason: String },

    /// Unknown event id, or the event belongs to a different owner.
    #[error("event not found: {0}")]
    EventNotFound(Uuid),

    /// Duplicate id at insert. Ids are generated, so this signals a defect.
    #[error("event already exists: {0}")]
    EventExists(Uuid),
}

impl SchedulerError {
    pub(crate) fn invalid_spec(spec: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTimeSpec {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }
}
