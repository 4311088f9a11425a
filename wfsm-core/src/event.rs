//! Events delivered to entities.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Name reported for timer events in logs and errors.
pub const TIMER_EVENT_NAME: &str = "TIMER";

/// An event submitted to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Business event raised by a caller.
    Named {
        name: String,
        #[serde(default)]
        payload: Value,
    },
    /// Synthetic event produced when a scheduled wake-up is due.
    Timer(TimerFired),
}

/// Payload of a timer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerFired {
    /// Time elapsed since the entity's last transition.
    pub elapsed: Duration,
    /// `timed_event_at` the elapsed time was measured from, when known.
    /// A mismatch at processing time means the entity moved on since the scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<i64>,
}

impl TimerFired {
    pub fn new(elapsed: Duration) -> Self {
        Self {
            elapsed,
            baseline: None,
        }
    }

    /// Timer event measured from a known `timed_event_at`.
    pub fn scheduled(elapsed: Duration, baseline: i64) -> Self {
        Self {
            elapsed,
            baseline: Some(baseline),
        }
    }
}

impl Event {
    /// Creates a named event with a null payload.
    pub fn named(name: impl Into<String>) -> Self {
        Event::Named {
            name: name.into(),
            payload: Value::Null,
        }
    }

    pub fn with_payload(name: impl Into<String>, payload: Value) -> Self {
        Event::Named {
            name: name.into(),
            payload,
        }
    }

    /// Creates a timer event carrying the given elapsed time.
    pub fn timer(elapsed: Duration) -> Self {
        Event::Timer(TimerFired::new(elapsed))
    }

    pub fn name(&self) -> &str {
        match self {
            Event::Named { name, .. } => name,
            Event::Timer(_) => TIMER_EVENT_NAME,
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            Event::Named { payload, .. } => Some(payload),
            Event::Timer(_) => None,
        }
    }

    pub fn is_timer(&self) -> bool {
        matches!(self, Event::Timer(_))
    }

    /// Elapsed time carried by a timer event.
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            Event::Timer(t) => Some(t.elapsed),
            Event::Named { .. } => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Named { name, .. } => f.write_str(name),
            Event::Timer(t) => write!(f, "{}({}ms)", TIMER_EVENT_NAME, t.elapsed.as_millis()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_named_event() {
        let event = Event::with_payload("APPROVE", json!({"by": "alice"}));
        assert_eq!(event.name(), "APPROVE");
        assert_eq!(event.payload(), Some(&json!({"by": "alice"})));
        assert!(!event.is_timer());
        assert_eq!(event.elapsed(), None);
        assert_eq!(event.to_string(), "APPROVE");
    }

    #[test]
    fn test_timer_event() {
        let event = Event::timer(Duration::from_secs(90));
        assert!(event.is_timer());
        assert_eq!(event.name(), TIMER_EVENT_NAME);
        assert_eq!(event.elapsed(), Some(Duration::from_secs(90)));
        assert_eq!(event.to_string(), "TIMER(90000ms)");
    }

    #[test]
    fn test_event_json_shape() {
        let value = serde_json::to_value(Event::named("PAY")).unwrap();
        assert_eq!(value["type"], "named");
        assert_eq!(value["name"], "PAY");

        let parsed: Event = serde_json::from_value(json!({"type": "named", "name": "SHIP"})).unwrap();
        assert_eq!(parsed, Event::named("SHIP"));
    }
}
