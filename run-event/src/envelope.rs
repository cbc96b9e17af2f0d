//! Envelope (thread_id, trace_id, event_id) injected into every run-stream event.
//! EnvelopeState numbers events within one subscription.

use crate::event::RunStreamEvent;
use serde_json::Value;

/// Envelope fields attached to each event on the wire.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    /// Thread the event belongs to; constant within a run.
    pub thread_id: Option<String>,
    /// Trace id of the run chain that produced the event.
    pub trace_id: Option<String>,
    /// Per-subscription sequence number; monotonically increasing.
    pub event_id: Option<u64>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread_id(mut self, id: impl Into<String>) -> Self {
        self.thread_id = Some(id.into());
        self
    }

    pub fn with_trace_id(mut self, id: impl Into<String>) -> Self {
        self.trace_id = Some(id.into());
        self
    }

    pub fn with_event_id(mut self, id: u64) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Merges envelope fields into the given JSON object (top-level only).
    /// Does not overwrite existing keys.
    pub fn inject_into(&self, obj: &mut Value) {
        let Some(obj) = obj.as_object_mut() else {
            return;
        };
        if let Some(ref id) = self.thread_id {
            obj.entry("threadId")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(ref id) = self.trace_id {
            obj.entry("traceId")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(id) = self.event_id {
            obj.entry("eventId")
                .or_insert_with(|| Value::Number(serde_json::Number::from(id)));
        }
    }
}

/// Envelope state for one subscription: thread, trace, next event_id.
pub struct EnvelopeState {
    pub thread_id: String,
    pub trace_id: String,
    pub next_event_id: u64,
}

impl EnvelopeState {
    pub fn new(thread_id: String, trace_id: String) -> Self {
        Self {
            thread_id,
            trace_id,
            next_event_id: 1,
        }
    }

    /// Injects the envelope into the event value and advances the sequence.
    pub fn inject_into(&mut self, value: &mut Value) {
        let env = Envelope::new()
            .with_thread_id(&self.thread_id)
            .with_trace_id(&self.trace_id)
            .with_event_id(self.next_event_id);
        self.next_event_id += 1;
        env.inject_into(value);
    }
}

/// Converts a run event to JSON and injects the envelope using the given state.
pub fn to_json(
    event: &RunStreamEvent,
    state: &mut EnvelopeState,
) -> Result<Value, serde_json::Error> {
    let mut value = event.to_value()?;
    state.inject_into(&mut value);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_inject() {
        let mut obj = serde_json::json!({"type":"TOKEN","token":"hi"});
        let env = Envelope::new()
            .with_thread_id("th-1")
            .with_trace_id("tr-1")
            .with_event_id(1);
        env.inject_into(&mut obj);
        assert_eq!(obj["threadId"], "th-1");
        assert_eq!(obj["traceId"], "tr-1");
        assert_eq!(obj["eventId"], 1);
        assert_eq!(obj["type"], "TOKEN");
    }

    #[test]
    fn to_json_injects_envelope_and_numbers_events() {
        let ev = RunStreamEvent::Token {
            agent_name: "helper".to_string(),
            token: "hel".to_string(),
            is_complete: false,
        };
        let mut state = EnvelopeState::new("th-9".to_string(), "tr-9".to_string());
        let first = to_json(&ev, &mut state).unwrap();
        let second = to_json(&ev, &mut state).unwrap();
        assert_eq!(first["type"], "TOKEN");
        assert_eq!(first["threadId"], "th-9");
        assert_eq!(first["eventId"], 1);
        assert_eq!(second["eventId"], 2);
    }
}
