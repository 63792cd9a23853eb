//! In-memory notification scheduler for meal reminders.
//!
//! This crate provides the timing core of the reminder service:
//! - One-shot events firing at an absolute instant
//! - Daily events firing at a wall-clock time, re-armed after each firing
//! - Live status queries joining timer state with event metadata
//! - Cancellation and graceful drain of in-flight notifications on shutdown
//!
//! Events live only in memory; persistence and delivery retry are the
//! callback's concern.

mod error;
mod registry;
mod scheduler;
mod types;

pub use error::SchedulerError;
pub use registry::EventRegistry;
pub use scheduler::{Notification, Notifier, Scheduler};
pub use types::{Event, EventState, EventStatus, Repeat, Trigger};
