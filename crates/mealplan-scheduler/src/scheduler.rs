//! The timer engine: owns the pending timer set and fires notifications.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, Notify, RwLock, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::SchedulerError;
use crate::registry::EventRegistry;
use crate::types::{Event, EventState, EventStatus, Repeat, Trigger};

/// Maximum sleep between engine wake-ups.
const MAX_SLEEP: StdDuration = StdDuration::from_secs(60);

/// Default bound on waiting for in-flight notifications at shutdown.
const DEFAULT_DRAIN_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// Data handed to the notification callback at fire time.
#[derive(Debug, Clone)]
pub struct Notification {
    pub event_id: Uuid,
    pub owner_id: String,
    pub contact: String,
    pub payload: Map<String, Value>,
}

/// Type alias for the notification callback.
///
/// Invoked concurrently for distinct events; must be safe to call from
/// multiple tasks at once. A failure is logged and does not alter the
/// event's lifecycle.
pub type Notifier = Arc<
    dyn Fn(Notification) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>>
        + Send
        + Sync,
>;

/// The scheduler. Cheap to clone; all clones share one engine.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    registry: RwLock<EventRegistry>,
    notifier: Notifier,
    /// Wakes the engine loop when the pending set changes.
    wake: Notify,
    shutdown_tx: watch::Sender<bool>,
    engine: Mutex<Option<JoinHandle<()>>>,
    drain_timeout: StdDuration,
}

impl Scheduler {
    pub fn new(notifier: Notifier) -> Self {
        Self::with_drain_timeout(notifier, DEFAULT_DRAIN_TIMEOUT)
    }

    /// Create a scheduler with a custom bound on the shutdown drain.
    pub fn with_drain_timeout(notifier: Notifier, drain_timeout: StdDuration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(SchedulerInner {
                registry: RwLock::new(EventRegistry::new()),
                notifier,
                wake: Notify::new(),
                shutdown_tx,
                engine: Mutex::new(None),
                drain_timeout,
            }),
        }
    }

    /// Start the engine loop. Calling twice is a no-op.
    pub async fn start(&self) {
        let mut engine = self.inner.engine.lock().await;
        if engine.is_some() {
            debug!("scheduler already started");
            return;
        }
        reconcile_interrupted(&self.inner).await;
        self.inner.shutdown_tx.send_replace(false);
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        *engine = Some(tokio::spawn(run_engine(
            Arc::clone(&self.inner),
            shutdown_rx,
        )));
        info!("scheduler started");
    }

    /// Stop the engine, draining in-flight notifications. Idempotent.
    ///
    /// Returns once the engine has stopped; callbacks still running after the
    /// drain timeout are abandoned and reported in the log.
    pub async fn shutdown(&self) {
        let handle = self.inner.engine.lock().await.take();
        let Some(handle) = handle else {
            debug!("scheduler not running");
            return;
        };
        self.inner.shutdown_tx.send_replace(true);
        self.inner.wake.notify_one();
        if handle.await.is_err() {
            error!("engine task panicked during shutdown");
        }
        info!("scheduler shut down");
    }

    /// Parse the time spec, register the event, and arm its timer.
    ///
    /// All-or-nothing: a parse failure leaves the registry untouched.
    #[tracing::instrument(skip(self, payload))]
    pub async fn add_event(
        &self,
        owner_id: &str,
        time_spec: &str,
        repeat: Repeat,
        contact: &str,
        payload: Map<String, Value>,
    ) -> Result<(Uuid, DateTime<Utc>), SchedulerError> {
        let now = Utc::now();
        let trigger = Trigger::parse(time_spec, repeat, now)?;
        let event = Event::new(owner_id, contact, payload, trigger, repeat, now);
        let next_run = event.next_run.ok_or_else(|| {
            SchedulerError::invalid_spec(time_spec, "scheduled time is in the past")
        })?;
        let event_id = event.id;

        self.inner.registry.write().await.insert(event)?;
        self.inner.wake.notify_one();

        info!(%event_id, %next_run, "event scheduled");
        Ok((event_id, next_run))
    }

    /// Cancel the timer and drop the registry entry together.
    ///
    /// Returns `false` for an unknown id. An event whose callback is already
    /// in flight completes that invocation, but no future occurrence runs.
    pub async fn remove_event(&self, event_id: &Uuid) -> bool {
        let removed = self.inner.registry.write().await.remove(event_id).is_some();
        if removed {
            self.inner.wake.notify_one();
            info!(%event_id, "event removed");
        }
        removed
    }

    /// Live status for an event, joined with engine state at call time.
    pub async fn event_status(&self, event_id: &Uuid) -> Option<EventStatus> {
        self.inner.registry.read().await.get(event_id).map(Event::status)
    }

    /// Owner-scoped lookup. Absence and owner mismatch are indistinguishable.
    pub async fn get_event(
        &self,
        owner_id: &str,
        event_id: &Uuid,
    ) -> Result<EventStatus, SchedulerError> {
        self.inner
            .registry
            .read()
            .await
            .get(event_id)
            .filter(|e| e.owner_id == owner_id)
            .map(Event::status)
            .ok_or(SchedulerError::EventNotFound(*event_id))
    }

    /// Owner-scoped cancellation. Absence and owner mismatch are
    /// indistinguishable.
    pub async fn cancel_event(
        &self,
        owner_id: &str,
        event_id: &Uuid,
    ) -> Result<bool, SchedulerError> {
        let mut registry = self.inner.registry.write().await;
        if !registry
            .get(event_id)
            .is_some_and(|e| e.owner_id == owner_id)
        {
            return Err(SchedulerError::EventNotFound(*event_id));
        }
        let removed = registry.remove(event_id).is_some();
        drop(registry);

        self.inner.wake.notify_one();
        info!(%event_id, %owner_id, "event cancelled");
        Ok(removed)
    }

    /// All events for an owner. Empty for unknown owners, never an error.
    pub async fn user_events(&self, owner_id: &str) -> Vec<EventStatus> {
        self.inner
            .registry
            .read()
            .await
            .owned_by(owner_id)
            .map(Event::status)
            .collect()
    }
}

/// The engine loop: the single authority deciding what fires next.
async fn run_engine(inner: Arc<SchedulerInner>, mut shutdown_rx: watch::Receiver<bool>) {
    info!("engine loop running");
    let mut callbacks: JoinSet<()> = JoinSet::new();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        for event in claim_due(&inner, Utc::now()).await {
            callbacks.spawn(fire(Arc::clone(&inner), event));
        }

        let pause = next_pause(&inner).await;
        tokio::select! {
            _ = shutdown_rx.changed() => {}
            _ = inner.wake.notified() => {}
            _ = sleep(pause) => {}
            Some(result) = callbacks.join_next() => {
                if let Err(e) = result {
                    error!(error = %e, "notification task failed");
                }
            }
        }
    }

    drain(&mut callbacks, inner.drain_timeout).await;
    info!("engine loop stopped");
}

/// Restore events stranded in `Firing` by an abandoned shutdown drain.
///
/// A callback abandoned at the drain timeout is aborted with the engine's
/// `JoinSet` and can no longer restore its event. Daily events re-arm at
/// their next wall-clock occurrence; one-shots were already dispatched once,
/// so they retire.
async fn reconcile_interrupted(inner: &SchedulerInner) {
    let now = Utc::now();
    let mut registry = inner.registry.write().await;
    let stranded: Vec<Uuid> = registry
        .values()
        .filter(|e| e.state == EventState::Firing)
        .map(|e| e.id)
        .collect();

    for id in stranded {
        if let Some(event) = registry.get_mut(&id) {
            match event.trigger {
                Trigger::OneShot { .. } => {
                    event.state = EventState::Retired;
                    event.next_run = None;
                    info!(event_id = %id, "retired one-shot interrupted by shutdown");
                }
                Trigger::DailyAt { .. } => {
                    event.state = EventState::Pending;
                    event.next_run = event.trigger.next_fire_after(now);
                    info!(event_id = %id, "re-armed daily event interrupted by shutdown");
                }
            }
        }
    }
}

/// Move due events into `Firing` and return snapshots to dispatch.
///
/// Daily events get `next_run` advanced before the lock is released, so a
/// concurrent status query never observes a stale past time. One-shots drop
/// their timer here, which also guarantees a single firing per id.
async fn claim_due(inner: &SchedulerInner, now: DateTime<Utc>) -> Vec<Event> {
    let mut registry = inner.registry.write().await;
    let due: Vec<Uuid> = registry
        .values()
        .filter(|e| e.is_due(now))
        .map(|e| e.id)
        .collect();

    let mut claimed = Vec::with_capacity(due.len());
    for id in due {
        if let Some(event) = registry.get_mut(&id) {
            let next_run = match event.trigger {
                Trigger::OneShot { .. } => None,
                Trigger::DailyAt { .. } => event.trigger.next_fire_after(now),
            };
            event.state = EventState::Firing;
            event.next_run = next_run;
            claimed.push(event.clone());
        }
    }
    claimed
}

/// How long the engine may sleep before the earliest pending event is due.
async fn next_pause(inner: &SchedulerInner) -> StdDuration {
    let registry = inner.registry.read().await;
    let now = Utc::now();
    let next = registry
        .values()
        .filter(|e| e.state == EventState::Pending)
        .filter_map(|e| e.next_run)
        .min();

    match next {
        Some(at) => (at - now).to_std().unwrap_or(StdDuration::ZERO).min(MAX_SLEEP),
        None => MAX_SLEEP,
    }
}

/// Dispatch one notification and restore the event's state afterwards.
async fn fire(inner: Arc<SchedulerInner>, event: Event) {
    debug!(event_id = %event.id, owner_id = %event.owner_id, "firing event");

    let notification = Notification {
        event_id: event.id,
        owner_id: event.owner_id.clone(),
        contact: event.contact.clone(),
        payload: event.payload.clone(),
    };

    // The callback runs on its own task; a panic inside it surfaces here as
    // a join error instead of skipping the state restoration below.
    match tokio::spawn((inner.notifier)(notification)).await {
        Ok(Ok(())) => debug!(event_id = %event.id, "notification delivered"),
        Ok(Err(e)) => warn!(event_id = %event.id, error = %e, "notification delivery failed"),
        Err(e) => error!(event_id = %event.id, error = %e, "notification callback panicked"),
    }

    let mut registry = inner.registry.write().await;
    let Some(live) = registry.get_mut(&event.id) else {
        debug!(event_id = %event.id, "event removed mid-flight");
        return;
    };
    if live.state != EventState::Firing {
        return;
    }
    let next_state = match live.trigger {
        Trigger::OneShot { .. } => EventState::Retired,
        Trigger::DailyAt { .. } => EventState::Pending,
    };
    if next_state == EventState::Retired {
        info!(event_id = %event.id, "one-shot event retired");
    }
    live.state = next_state;
    drop(registry);

    inner.wake.notify_one();
}

/// Let in-flight notifications finish, bounded by `limit`.
async fn drain(callbacks: &mut JoinSet<()>, limit: StdDuration) {
    if callbacks.is_empty() {
        return;
    }
    info!(in_flight = callbacks.len(), "draining in-flight notifications");
    let drained = timeout(limit, async {
        while callbacks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            abandoned = callbacks.len(),
            "notifications did not finish before drain timeout"
        );
    }
}
