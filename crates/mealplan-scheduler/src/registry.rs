//! In-memory event registry.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use uuid::Uuid;

use crate::SchedulerError;
use crate::types::Event;

/// Authoritative id-to-event mapping.
///
/// The registry owns event metadata only; execution belongs to the scheduler,
/// which keeps this behind a single lock so registry and timer-state mutations
/// stay atomic with respect to each other. Iteration order is unspecified.
#[derive(Debug, Default)]
pub struct EventRegistry {
    events: HashMap<Uuid, Event>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly created event.
    ///
    /// Ids are generated by the scheduler, so a collision indicates a defect
    /// rather than caller error.
    pub fn insert(&mut self, event: Event) -> Result<(), SchedulerError> {
        match self.events.entry(event.id) {
            Entry::Occupied(_) => Err(SchedulerError::EventExists(event.id)),
            Entry::Vacant(slot) => {
                slot.insert(event);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<&Event> {
        self.events.get(id)
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut Event> {
        self.events.get_mut(id)
    }

    /// Remove an event. Idempotent: removing an absent id yields `None`.
    pub fn remove(&mut self, id: &Uuid) -> Option<Event> {
        self.events.remove(id)
    }

    /// All events belonging to `owner_id`, in unspecified order.
    pub fn owned_by<'a>(&'a self, owner_id: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.events.values().filter(move |e| e.owner_id == owner_id)
    }

    pub fn values(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
