//! Queue events: the unit of work. Every input — user messages, tool results, LLM calls,
//! ingest jobs — becomes one typed event row processed under a lease.

pub mod payload;

pub use payload::{
    ContentPart, EntityExtractPayload, IncomingToolCall, IngestDocumentPayload, LlmCallPayload,
    MessageContent, NewMessagePayload, SenderRef, ThreadRef, ToolCallPayload, ToolCallSpec,
    ToolFunction,
};

use serde_json::Value;

use crate::ids;

/// Event type discriminator. Stored under its wire name (`NEW_MESSAGE`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewMessage,
    ToolCall,
    LlmCall,
    EntityExtract,
    IngestDocument,
    /// Custom event types owned by registered custom processors.
    Custom(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::NewMessage => "NEW_MESSAGE",
            EventKind::ToolCall => "TOOL_CALL",
            EventKind::LlmCall => "LLM_CALL",
            EventKind::EntityExtract => "ENTITY_EXTRACT",
            EventKind::IngestDocument => "INGEST_DOCUMENT",
            EventKind::Custom(s) => s.as_str(),
        }
    }

    pub fn parse(s: &str) -> EventKind {
        match s {
            "NEW_MESSAGE" => EventKind::NewMessage,
            "TOOL_CALL" => EventKind::ToolCall,
            "LLM_CALL" => EventKind::LlmCall,
            "ENTITY_EXTRACT" => EventKind::EntityExtract,
            "INGEST_DOCUMENT" => EventKind::IngestDocument,
            other => EventKind::Custom(other.to_string()),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event lifecycle. `Expired` and `Overwritten` are terminal non-executed states;
/// nothing currently produces `Overwritten` (reserved).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Expired,
    Overwritten,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
            EventStatus::Expired => "expired",
            EventStatus::Overwritten => "overwritten",
        }
    }

    pub fn parse(s: &str) -> EventStatus {
        match s {
            "processing" => EventStatus::Processing,
            "completed" => EventStatus::Completed,
            "failed" => EventStatus::Failed,
            "expired" => EventStatus::Expired,
            "overwritten" => EventStatus::Overwritten,
            _ => EventStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventStatus::Pending | EventStatus::Processing)
    }
}

/// The typed payload, with the raw JSON preserved for custom kinds.
#[derive(Clone, Debug)]
pub enum EventPayload {
    NewMessage(NewMessagePayload),
    ToolCall(ToolCallPayload),
    LlmCall(LlmCallPayload),
    EntityExtract(EntityExtractPayload),
    IngestDocument(IngestDocumentPayload),
    Custom { kind: String, raw: Value },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::NewMessage(_) => EventKind::NewMessage,
            EventPayload::ToolCall(_) => EventKind::ToolCall,
            EventPayload::LlmCall(_) => EventKind::LlmCall,
            EventPayload::EntityExtract(_) => EventKind::EntityExtract,
            EventPayload::IngestDocument(_) => EventKind::IngestDocument,
            EventPayload::Custom { kind, .. } => EventKind::Custom(kind.clone()),
        }
    }

    /// Serializes the payload body (without the kind discriminator; that lives in its own
    /// column).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            EventPayload::NewMessage(p) => serde_json::to_value(p),
            EventPayload::ToolCall(p) => serde_json::to_value(p),
            EventPayload::LlmCall(p) => serde_json::to_value(p),
            EventPayload::EntityExtract(p) => serde_json::to_value(p),
            EventPayload::IngestDocument(p) => serde_json::to_value(p),
            EventPayload::Custom { raw, .. } => Ok(raw.clone()),
        }
    }

    /// Rebuilds the typed payload from a kind string and raw JSON. Unknown kinds keep the
    /// raw value so custom processors can interpret them.
    pub fn from_parts(kind: &str, raw: Value) -> Result<EventPayload, serde_json::Error> {
        Ok(match EventKind::parse(kind) {
            EventKind::NewMessage => EventPayload::NewMessage(serde_json::from_value(raw)?),
            EventKind::ToolCall => EventPayload::ToolCall(serde_json::from_value(raw)?),
            EventKind::LlmCall => EventPayload::LlmCall(serde_json::from_value(raw)?),
            EventKind::EntityExtract => EventPayload::EntityExtract(serde_json::from_value(raw)?),
            EventKind::IngestDocument => EventPayload::IngestDocument(serde_json::from_value(raw)?),
            EventKind::Custom(kind) => EventPayload::Custom { kind, raw },
        })
    }
}

/// One event row.
#[derive(Clone, Debug)]
pub struct Event {
    pub id: String,
    pub thread_id: String,
    pub payload: EventPayload,
    pub status: EventStatus,
    pub parent_id: Option<String>,
    pub trace_id: String,
    /// Higher runs sooner within a priority class.
    pub priority: i64,
    pub ttl_ms: Option<i64>,
    pub expires_at: Option<i64>,
    pub namespace: Option<String>,
    /// Routing and correlation state carried between chained events.
    pub metadata: Value,
    pub worker_locked_by: Option<String>,
    pub worker_lease_expires_at: Option<i64>,
    pub created_at: i64,
}

impl Event {
    /// A fresh root event: new trace, default priority, no TTL.
    pub fn new(thread_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: ids::new_id(),
            thread_id: thread_id.into(),
            payload,
            status: EventStatus::Pending,
            parent_id: None,
            trace_id: ids::new_id(),
            priority: 0,
            ttl_ms: None,
            expires_at: None,
            namespace: None,
            metadata: Value::Object(Default::default()),
            worker_locked_by: None,
            worker_lease_expires_at: None,
            created_at: ids::now_millis(),
        }
    }

    /// A chained event: inherits the parent's thread, trace, namespace, and priority so a
    /// conversation turn stays together in the queue.
    pub fn child_of(parent: &Event, payload: EventPayload) -> Self {
        let mut event = Event::new(parent.thread_id.clone(), payload);
        event.parent_id = Some(parent.id.clone());
        event.trace_id = parent.trace_id.clone();
        event.priority = parent.priority;
        event.namespace = parent.namespace.clone();
        event
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self.expires_at = Some(self.created_at + ttl_ms);
        self
    }

    /// Reads a string field from event metadata.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Reads a string-array field from event metadata.
    pub fn meta_str_list(&self, key: &str) -> Vec<String> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: kind strings round-trip, including custom kinds.
    #[test]
    fn event_kind_roundtrip() {
        for kind in [
            EventKind::NewMessage,
            EventKind::ToolCall,
            EventKind::LlmCall,
            EventKind::EntityExtract,
            EventKind::IngestDocument,
            EventKind::Custom("MY_EVENT".into()),
        ] {
            assert_eq!(EventKind::parse(kind.as_str()), kind);
        }
    }

    /// **Scenario**: a child event inherits trace, priority, and thread from its parent.
    #[test]
    fn child_inherits_chain_identity() {
        let parent = Event::new(
            "th-1",
            EventPayload::Custom {
                kind: "X".into(),
                raw: serde_json::json!({}),
            },
        )
        .with_priority(7);
        let child = Event::child_of(
            &parent,
            EventPayload::Custom {
                kind: "Y".into(),
                raw: serde_json::json!({}),
            },
        );
        assert_eq!(child.trace_id, parent.trace_id);
        assert_eq!(child.priority, 7);
        assert_eq!(child.thread_id, "th-1");
        assert_eq!(child.parent_id.as_deref(), Some(parent.id.as_str()));
    }

    /// **Scenario**: ttl sets an absolute expiry from creation time.
    #[test]
    fn ttl_sets_expiry() {
        let event = Event::new(
            "th",
            EventPayload::Custom {
                kind: "X".into(),
                raw: serde_json::json!({}),
            },
        )
        .with_ttl_ms(1500);
        assert_eq!(event.expires_at, Some(event.created_at + 1500));
    }
}
