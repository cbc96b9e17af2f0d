//! Protocol-level event types (type + payload).
//! Free-form fields use `serde_json::Value`; the bridge in parley fills them from stored rows.

use serde::Serialize;
use serde_json::Value;

/// Run stream event: wire shape for one event emitted while a run executes.
/// The envelope (thread_id, trace_id, event_id) is applied separately.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStreamEvent {
    /// A message was persisted to the thread (user, agent, tool, or system).
    NewMessage {
        #[serde(rename = "senderType")]
        sender_type: String,
        #[serde(rename = "senderId")]
        sender_id: String,
        #[serde(rename = "senderName", skip_serializing_if = "Option::is_none")]
        sender_name: Option<String>,
        content: String,
        #[serde(skip_serializing_if = "Value::is_null")]
        metadata: Value,
    },
    /// One streamed LLM token; a final event with `is_complete == true` closes the stream.
    Token {
        #[serde(rename = "agentName")]
        agent_name: String,
        token: String,
        #[serde(rename = "isComplete")]
        is_complete: bool,
    },
    /// A tool call changed state (dispatched, completed, failed).
    ToolCall {
        id: String,
        name: String,
        status: String,
    },
    /// The run chain failed terminally; `message` is human-readable.
    RunFailed { message: String },
}

impl RunStreamEvent {
    /// Serializes this event to a JSON object (type + payload only; no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
