//! Wire shapes of the built-in event payloads. Field names follow the external JSON
//! convention (camelCase) so payloads written by other runtimes deserialize unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::{ChatMessage, ProviderConfig};
use crate::message::SenderKind;
use crate::tools::ToolSpec;

/// One part of a multi-part message content array.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub part_type: String,
    #[serde(default)]
    pub text: String,
}

/// Message content: plain text or an array of content parts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Flattens the content to plain text; parts are joined with newlines.
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| p.text.as_str())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_text().trim().is_empty()
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

/// Who sent an incoming message.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(rename = "type", default = "default_sender_kind")]
    pub kind: SenderKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

fn default_sender_kind() -> SenderKind {
    SenderKind::User
}

impl SenderRef {
    /// The participant id this sender resolves to: explicit id, external id, or name.
    pub fn participant_id(&self) -> String {
        self.id
            .clone()
            .or_else(|| self.external_id.clone())
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| "anonymous".to_string())
    }
}

/// Thread reference on an incoming message; the thread is created on first sight of a new
/// `external_id`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadRef {
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
}

/// A tool call carried on an incoming agent message.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub batch_index: Option<usize>,
}

/// `NEW_MESSAGE` payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    #[serde(default)]
    pub content: MessageContent,
    pub sender: SenderRef,
    #[serde(default)]
    pub thread: Option<ThreadRef>,
    #[serde(default)]
    pub tool_calls: Vec<IncomingToolCall>,
    /// Back-reference to the originating tool call (tool results only).
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// The function half of a tool call, arguments still a JSON string as the LLM sent them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// One tool invocation to execute.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub function: ToolFunction,
}

/// `TOOL_CALL` payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPayload {
    pub agent_name: String,
    pub sender_id: String,
    #[serde(default = "default_agent_kind", rename = "senderType")]
    pub sender_kind: SenderKind,
    pub call: ToolCallSpec,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub batch_index: Option<usize>,
}

fn default_agent_kind() -> SenderKind {
    SenderKind::Agent
}

/// `LLM_CALL` payload: the prompt is fully assembled by the message processor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmCallPayload {
    pub agent_name: String,
    pub agent_id: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    pub config: ProviderConfig,
}

/// `ENTITY_EXTRACT` payload: pull entities out of one persisted message node.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityExtractPayload {
    pub source_node_id: String,
    pub content: String,
    pub namespace: String,
    #[serde(default)]
    pub source_type: Option<String>,
    /// Agent whose extraction options and provider config drive the extraction.
    pub agent_id: String,
}

/// `INGEST_DOCUMENT` payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestDocumentPayload {
    pub source: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub force_reindex: bool,
}

fn default_namespace() -> String {
    "default".to_string()
}
