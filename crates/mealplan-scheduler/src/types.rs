//! Event and trigger types.

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::SchedulerError;

/// Strict format for dated one-shot time specs.
const INSTANT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// When an event should fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fire exactly once at a specific instant, then retire.
    OneShot { at: DateTime<Utc> },
    /// Fire every day at a wall-clock time, re-arming after each firing.
    DailyAt { hour: u32, minute: u32, second: u32 },
}

/// Recurrence flag supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Repeat {
    Daily,
    None,
}

impl Trigger {
    /// Classify and construct a trigger from a time spec string.
    ///
    /// A spec containing `T` is parsed strictly as `YYYY-MM-DDTHH:MM:SS` and
    /// treated as UTC. A bare `HH[:MM[:SS]]` spec is a daily wall-clock time;
    /// combined with [`Repeat::None`] it resolves to a one-shot at the next
    /// occurrence of that time (today if still ahead, otherwise tomorrow).
    pub fn parse(spec: &str, repeat: Repeat, now: DateTime<Utc>) -> Result<Self, SchedulerError> {
        if spec.contains('T') {
            let at = NaiveDateTime::parse_from_str(spec, INSTANT_FORMAT)
                .map_err(|e| SchedulerError::invalid_spec(spec, e.to_string()))?
                .and_utc();
            if repeat == Repeat::Daily {
                return Err(SchedulerError::invalid_spec(
                    spec,
                    "a dated instant cannot repeat daily",
                ));
            }
            if at <= now {
                return Err(SchedulerError::invalid_spec(
                    spec,
                    "scheduled time is in the past",
                ));
            }
            return Ok(Trigger::OneShot { at });
        }

        let (hour, minute, second) = parse_wall_clock(spec)?;
        match repeat {
            Repeat::Daily => Ok(Trigger::DailyAt {
                hour,
                minute,
                second,
            }),
            Repeat::None => Ok(Trigger::OneShot {
                at: next_occurrence(hour, minute, second, now),
            }),
        }
    }

    /// Compute the next fire time strictly after `now`.
    ///
    /// Pure function of the trigger and `now`; re-derived at every firing.
    /// A one-shot whose instant has passed yields `None`.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            Trigger::OneShot { at } => (at > now).then_some(at),
            Trigger::DailyAt {
                hour,
                minute,
                second,
            } => Some(next_occurrence(hour, minute, second, now)),
        }
    }

    /// Human-readable form of the trigger, reported as `scheduled_time`.
    pub fn describe(&self) -> String {
        match *self {
            Trigger::OneShot { at } => at.format(INSTANT_FORMAT).to_string(),
            Trigger::DailyAt {
                hour,
                minute,
                second,
            } => format!("{hour:02}:{minute:02}:{second:02}"),
        }
    }
}

/// Parse `HH[:MM[:SS]]`, defaulting omitted components to zero.
fn parse_wall_clock(spec: &str) -> Result<(u32, u32, u32), SchedulerError> {
    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() > 3 {
        return Err(SchedulerError::invalid_spec(spec, "expected HH[:MM[:SS]]"));
    }

    let mut components = [0u32; 3];
    for (i, part) in parts.iter().enumerate() {
        components[i] = part.trim().parse().map_err(|_| {
            SchedulerError::invalid_spec(spec, format!("'{part}' is not a number"))
        })?;
    }

    let [hour, minute, second] = components;
    if hour > 23 {
        return Err(SchedulerError::invalid_spec(spec, "hour out of range"));
    }
    if minute > 59 {
        return Err(SchedulerError::invalid_spec(spec, "minute out of range"));
    }
    if second > 59 {
        return Err(SchedulerError::invalid_spec(spec, "second out of range"));
    }
    Ok((hour, minute, second))
}

/// Next occurrence of a wall-clock time after `now`: today if still ahead,
/// otherwise tomorrow.
fn next_occurrence(hour: u32, minute: u32, second: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour, minute, second)
        .expect("wall-clock components are range-checked at parse time");
    let today = now.date_naive().and_time(time).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// The unit of schedulable work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique id, generated at creation. Never reused.
    pub id: Uuid,
    /// Caller-supplied owner identifier. Not validated against anything.
    pub owner_id: String,
    /// Notification destination, passed through to the callback unexamined.
    pub contact: String,
    /// Opaque key-value data the callback needs.
    pub payload: Map<String, Value>,
    /// When this event fires.
    pub trigger: Trigger,
    /// Recurrence flag as supplied by the caller.
    pub repeat: Repeat,
    /// Engine-owned lifecycle state.
    pub state: EventState,
    /// Earliest scheduled invocation, `None` once inactive.
    pub next_run: Option<DateTime<Utc>>,
    /// When this event was created.
    pub created_at: DateTime<Utc>,
}

/// Engine lifecycle state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    /// Timer armed, not yet due.
    Pending,
    /// Notification callback in flight.
    Firing,
    /// One-shot that has fired. Stays queryable, never re-arms.
    Retired,
}

impl Event {
    /// Create a pending event with a fresh id and an armed `next_run`.
    pub fn new(
        owner_id: impl Into<String>,
        contact: impl Into<String>,
        payload: Map<String, Value>,
        trigger: Trigger,
        repeat: Repeat,
        now: DateTime<Utc>,
    ) -> Self {
        let next_run = trigger.next_fire_after(now);
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            contact: contact.into(),
            payload,
            trigger,
            repeat,
            state: EventState::Pending,
            next_run,
            created_at: now,
        }
    }

    /// An event is active while it still has a live timer.
    pub fn active(&self) -> bool {
        self.next_run.is_some()
    }

    /// Whether this event should fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == EventState::Pending && self.next_run.is_some_and(|at| at <= now)
    }

    /// Snapshot of live timer state joined with event metadata.
    pub fn status(&self) -> EventStatus {
        EventStatus {
            event_id: self.id,
            owner_id: self.owner_id.clone(),
            active: self.active(),
            next_run_time: self.next_run,
            scheduled_time: self.trigger.describe(),
            repeated: self.repeat,
        }
    }
}

/// Status snapshot returned by the query operations.
#[derive(Debug, Clone, Serialize)]
pub struct EventStatus {
    pub event_id: Uuid,
    pub owner_id: String,
    pub active: bool,
    pub next_run_time: Option<DateTime<Utc>>,
    pub scheduled_time: String,
    pub repeated: Repeat,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn instant(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, INSTANT_FORMAT)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn parse_dated_one_shot() {
        let now = instant("2025-01-01T00:00:00");
        let trigger = Trigger::parse("2025-11-28T17:30:00", Repeat::None, now).unwrap();
        assert_eq!(
            trigger,
            Trigger::OneShot {
                at: instant("2025-11-28T17:30:00")
            }
        );
    }

    #[test]
    fn parse_daily_with_defaults() {
        let now = Utc::now();
        assert_eq!(
            Trigger::parse("08:00:00", Repeat::Daily, now).unwrap(),
            Trigger::DailyAt {
                hour: 8,
                minute: 0,
                second: 0
            }
        );
        assert_eq!(
            Trigger::parse("14:30", Repeat::Daily, now).unwrap(),
            Trigger::DailyAt {
                hour: 14,
                minute: 30,
                second: 0
            }
        );
        assert_eq!(
            Trigger::parse("9", Repeat::Daily, now).unwrap(),
            Trigger::DailyAt {
                hour: 9,
                minute: 0,
                second: 0
            }
        );
    }

    #[test]
    fn parse_rejects_out_of_range_components() {
        let now = Utc::now();
        for spec in ["24:00:00", "25:99:99", "10:60:00", "10:00:60"] {
            let err = Trigger::parse(spec, Repeat::Daily, now).unwrap_err();
            assert!(matches!(err, SchedulerError::InvalidTimeSpec { .. }), "{spec}");
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        let now = Utc::now();
        for spec in ["not-a-time", "", "1:2:3:4", "::", "2025-13-40T99:99:99"] {
            let err = Trigger::parse(spec, Repeat::None, now).unwrap_err();
            assert!(matches!(err, SchedulerError::InvalidTimeSpec { .. }), "{spec}");
        }
    }

    #[test]
    fn parse_rejects_daily_repeat_on_dated_instant() {
        let now = instant("2025-01-01T00:00:00");
        let err = Trigger::parse("2025-11-28T17:30:00", Repeat::Daily, now).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTimeSpec { .. }));
    }

    #[test]
    fn parse_rejects_past_instant() {
        let now = instant("2025-01-01T00:00:00");
        let err = Trigger::parse("2024-12-31T23:59:59", Repeat::None, now).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTimeSpec { .. }));
    }

    #[test]
    fn bare_spec_without_repeat_resolves_to_next_occurrence() {
        let now = instant("2025-06-01T10:00:00");

        // Still ahead today.
        let trigger = Trigger::parse("11:00", Repeat::None, now).unwrap();
        assert_eq!(
            trigger,
            Trigger::OneShot {
                at: instant("2025-06-01T11:00:00")
            }
        );

        // Already passed today, so tomorrow.
        let trigger = Trigger::parse("09:00", Repeat::None, now).unwrap();
        assert_eq!(
            trigger,
            Trigger::OneShot {
                at: instant("2025-06-02T09:00:00")
            }
        );
    }

    #[test]
    fn daily_next_fire_today_or_tomorrow() {
        let trigger = Trigger::DailyAt {
            hour: 17,
            minute: 30,
            second: 0,
        };

        let before = instant("2025-06-01T12:00:00");
        assert_eq!(
            trigger.next_fire_after(before),
            Some(instant("2025-06-01T17:30:00"))
        );

        let after = instant("2025-06-01T18:00:00");
        assert_eq!(
            trigger.next_fire_after(after),
            Some(instant("2025-06-02T17:30:00"))
        );

        // Exactly at the occurrence means next is tomorrow.
        let exact = instant("2025-06-01T17:30:00");
        assert_eq!(
            trigger.next_fire_after(exact),
            Some(instant("2025-06-02T17:30:00"))
        );
    }

    #[test]
    fn one_shot_next_fire_is_terminal() {
        let at = instant("2025-06-01T12:00:00");
        let trigger = Trigger::OneShot { at };
        assert_eq!(
            trigger.next_fire_after(instant("2025-06-01T11:59:59")),
            Some(at)
        );
        assert_eq!(trigger.next_fire_after(at), None);
        assert_eq!(trigger.next_fire_after(instant("2025-06-01T12:00:01")), None);
    }

    #[test]
    fn describe_formats() {
        assert_eq!(
            Trigger::OneShot {
                at: instant("2025-11-28T17:30:00")
            }
            .describe(),
            "2025-11-28T17:30:00"
        );
        assert_eq!(
            Trigger::DailyAt {
                hour: 8,
                minute: 5,
                second: 0
            }
            .describe(),
            "08:05:00"
        );
    }

    #[test]
    fn new_event_is_pending_and_armed() {
        let now = instant("2025-06-01T10:00:00");
        let event = Event::new(
            "alice",
            "alice@example.com",
            Map::new(),
            Trigger::DailyAt {
                hour: 8,
                minute: 0,
                second: 0,
            },
            Repeat::Daily,
            now,
        );

        assert_eq!(event.state, EventState::Pending);
        assert_eq!(event.next_run, Some(instant("2025-06-02T08:00:00")));
        assert!(event.active());
        assert!(!event.is_due(now));
        assert!(event.is_due(instant("2025-06-02T08:00:00")));
    }

    #[test]
    fn status_reflects_retired_event() {
        let now = Utc::now();
        let mut event = Event::new(
            "alice",
            "alice@example.com",
            Map::new(),
            Trigger::OneShot {
                at: now + Duration::hours(1),
            },
            Repeat::None,
            now,
        );
        event.state = EventState::Retired;
        event.next_run = None;

        let status = event.status();
        assert!(!status.active);
        assert_eq!(status.next_run_time, None);
        assert_eq!(status.repeated, Repeat::None);
    }

    proptest! {
        // Every valid daily trigger has a next fire strictly in the future
        // and within 24 hours, preserving its wall-clock components.
        #[test]
        fn daily_next_fire_within_24h(
            hour in 0u32..24,
            minute in 0u32..60,
            second in 0u32..60,
        ) {
            let now = Utc::now();
            let trigger = Trigger::DailyAt { hour, minute, second };
            let next = trigger.next_fire_after(now).unwrap();

            prop_assert!(next > now);
            prop_assert!(next - now <= Duration::days(1));
            prop_assert_eq!(next.hour(), hour);
            prop_assert_eq!(next.minute(), minute);
            prop_assert_eq!(next.second(), second);
        }

        // Out-of-range hours are rejected regardless of the rest of the spec.
        #[test]
        fn out_of_range_hour_rejected(hour in 24u32..1000) {
            let spec = format!("{hour}:00:00");
            prop_assert!(Trigger::parse(&spec, Repeat::Daily, Utc::now()).is_err());
        }

        // A full daily spec parses back to the string describe() reports.
        #[test]
        fn daily_spec_describe_roundtrip(
            hour in 0u32..24,
            minute in 0u32..60,
            second in 0u32..60,
        ) {
            let spec = format!("{hour:02}:{minute:02}:{second:02}");
            let trigger = Trigger::parse(&spec, Repeat::Daily, Utc::now()).unwrap();
            prop_assert_eq!(trigger.describe(), spec);
        }
    }
}
