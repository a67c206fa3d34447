//! Log of every protocol event seen by the console.
//!
//! Consecutive events of the same `type` collapse into one entry with a count,
//! keeping the first event's position and payload. Some event types also drive
//! console behavior, see [`side_effect`].

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use super::state::TurnDetectionMode;
use crate::core::realtime::EventSource;

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeEventLogEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    pub source: EventSource,
    /// First event of the run
    pub event: Arc<Value>,
    pub count: u32,
}

impl RealtimeEventLogEntry {
    pub fn event_type(&self) -> &str {
        event_type(&self.event)
    }
}

fn event_type(event: &Value) -> &str {
    event.get("type").and_then(Value::as_str).unwrap_or("")
}

#[derive(Debug, Default, Clone)]
pub struct EventLog {
    entries: Vec<RealtimeEventLogEntry>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event. Returns `true` if it merged into the last entry.
    pub fn record(&mut self, source: EventSource, event: Value) -> bool {
        if let Some(last) = self.entries.last_mut()
            && last.event_type() == event_type(&event)
        {
            last.count += 1;
            return true;
        }

        self.entries.push(RealtimeEventLogEntry {
            time: OffsetDateTime::now_utc(),
            source,
            event: Arc::new(event),
            count: 1,
        });
        false
    }

    pub fn entries(&self) -> &[RealtimeEventLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Console behavior triggered by a logged event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventSideEffect {
    /// User speech under server VAD: make sure audio replies stay enabled
    WidenModalities,
    /// Projection to publish under the `rate_limits` memory key
    RateLimits(Value),
}

/// Inspect a server event for console side effects.
pub fn side_effect(
    source: EventSource,
    event: &Value,
    mode: TurnDetectionMode,
) -> Option<EventSideEffect> {
    if source != EventSource::Server {
        return None;
    }

    match event_type(event) {
        "input_audio_buffer.speech_started" if mode == TurnDetectionMode::ServerVad => {
            Some(EventSideEffect::WidenModalities)
        }
        "rate_limits.updated" => {
            let projection = project_rate_limits(event);
            if projection.is_none() {
                tracing::debug!("Skipping rate_limits.updated with unexpected shape");
            }
            projection.map(EventSideEffect::RateLimits)
        }
        _ => None,
    }
}

/// The `requests` entry of a `rate_limits.updated` event, with `reset_seconds`
/// replaced by `reset_minutes` (rounded up). Other fields are copied as-is;
/// sibling entries are never inspected.
pub fn project_rate_limits(event: &Value) -> Option<Value> {
    let requests = event
        .get("rate_limits")?
        .as_array()?
        .iter()
        .filter_map(Value::as_object)
        .find(|entry| entry.get("name").and_then(Value::as_str) == Some("requests"))?;
    let reset_seconds = requests.get("reset_seconds")?.as_f64()?;

    let mut projection: Map<String, Value> = requests
        .iter()
        .filter(|(key, _)| key.as_str() != "reset_seconds")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    projection.insert(
        "reset_minutes".to_string(),
        Value::from((reset_seconds.max(0.0) / 60.0).ceil() as u64),
    );
    Some(Value::Object(projection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_consecutive_events_merge() {
        let mut log = EventLog::new();
        assert!(!log.record(EventSource::Client, json!({"type": "input_audio_buffer.append", "n": 1})));
        assert!(log.record(EventSource::Client, json!({"type": "input_audio_buffer.append", "n": 2})));
        assert!(!log.record(EventSource::Server, json!({"type": "session.updated"})));
        assert!(!log.record(EventSource::Client, json!({"type": "input_audio_buffer.append"})));

        assert_eq!(log.len(), 3);
        assert_eq!(log.entries()[0].count, 2);
        // The first event's payload is kept.
        assert_eq!(log.entries()[0].event["n"], 1);
        assert_eq!(log.entries()[1].event_type(), "session.updated");
    }

    #[test]
    fn test_speech_started_only_widens_under_vad() {
        let event = json!({"type": "input_audio_buffer.speech_started", "audio_start_ms": 0});
        assert_eq!(
            side_effect(EventSource::Server, &event, TurnDetectionMode::ServerVad),
            Some(EventSideEffect::WidenModalities)
        );
        assert_eq!(
            side_effect(EventSource::Server, &event, TurnDetectionMode::Manual),
            None
        );
        assert_eq!(
            side_effect(EventSource::Client, &event, TurnDetectionMode::ServerVad),
            None
        );
    }

    #[test]
    fn test_rate_limit_projection() {
        let event = json!({
            "type": "rate_limits.updated",
            "rate_limits": [
                {"name": "tokens", "limit": 50000, "remaining": 49000, "reset_seconds": 1.2},
                {"name": "requests", "limit": 1000, "remaining": 999, "reset_seconds": 61.0}
            ]
        });
        let effect = side_effect(EventSource::Server, &event, TurnDetectionMode::Manual);
        assert_eq!(
            effect,
            Some(EventSideEffect::RateLimits(json!({
                "name": "requests",
                "limit": 1000,
                "remaining": 999,
                "reset_minutes": 2
            })))
        );
    }

    #[test]
    fn test_rate_limit_projection_needs_only_reset_seconds() {
        let event = json!({
            "type": "rate_limits.updated",
            "rate_limits": [{"name": "requests", "reset_seconds": 125}]
        });
        assert_eq!(
            side_effect(EventSource::Server, &event, TurnDetectionMode::Manual),
            Some(EventSideEffect::RateLimits(json!({
                "name": "requests",
                "reset_minutes": 3
            })))
        );
    }

    #[test]
    fn test_incomplete_sibling_does_not_hide_requests() {
        let event = json!({
            "type": "rate_limits.updated",
            "rate_limits": [
                {"name": "tokens", "remaining": 10},
                "garbage",
                {"name": "requests", "limit": 100, "remaining": 7, "reset_seconds": 0.5}
            ]
        });
        assert_eq!(
            project_rate_limits(&event),
            Some(json!({
                "name": "requests",
                "limit": 100,
                "remaining": 7,
                "reset_minutes": 1
            }))
        );
    }

    #[test]
    fn test_malformed_rate_limits_are_skipped() {
        let no_requests = json!({
            "type": "rate_limits.updated",
            "rate_limits": [{"name": "tokens", "limit": 1, "remaining": 1, "reset_seconds": 1.0}]
        });
        let wrong_shape = json!({"type": "rate_limits.updated", "rate_limits": "soon"});
        let no_reset = json!({
            "type": "rate_limits.updated",
            "rate_limits": [{"name": "requests", "limit": 1, "remaining": 1}]
        });
        assert!(side_effect(EventSource::Server, &no_reset, TurnDetectionMode::Manual).is_none());
        assert!(side_effect(EventSource::Server, &no_requests, TurnDetectionMode::Manual).is_none());
        assert!(side_effect(EventSource::Server, &wrong_shape, TurnDetectionMode::Manual).is_none());
    }
}
