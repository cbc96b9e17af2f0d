//! Tool system: the `Tool` trait, the per-instance registry, and the built-in tools.
//!
//! Tools are called by the tool-call processor with arguments the LLM produced (already
//! parsed from the JSON string) and a [`ToolContext`] giving access to the instance's
//! stores. Tool failures are reported back to the agent as failed tool messages, never
//! retried by the runtime.

mod builtin;
mod registry;

pub use builtin::{
    builtin_registry, CreateThreadTool, CurrentTimeTool, HttpRequestTool, IngestDocumentTool,
    ListNamespacesTool, ReadFileTool, SearchKnowledgeTool, UpdateMyMemoryTool, WaitTool,
    WriteFileTool, TOOL_CREATE_THREAD, TOOL_CURRENT_TIME, TOOL_HTTP_REQUEST,
    TOOL_INGEST_DOCUMENT, TOOL_LIST_NAMESPACES, TOOL_READ_FILE, TOOL_SEARCH_KNOWLEDGE,
    TOOL_UPDATE_MY_MEMORY, TOOL_WAIT, TOOL_WRITE_FILE,
};
pub use registry::ToolRegistry;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentRegistry;
use crate::embedding::{Embedder, EmbeddingConfig};
use crate::graph::GraphStore;
use crate::queue::EventQueue;
use crate::rag::DocumentStore;
use crate::thread::ThreadStore;

/// Specification of one tool: name, description for the LLM, and argument schema.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// Result of one tool execution.
#[derive(Clone, Debug, Default)]
pub struct ToolOutput {
    /// Textual form shown to the LLM.
    pub text: String,
    /// Structured form carried in message metadata, when meaningful.
    pub data: Option<Value>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("tool execution failed: {0}")]
    Execution(String),
    #[error("unknown tool: {0}")]
    NotFound(String),
}

/// Per-call context: the stores and identity a tool may need.
#[derive(Clone)]
pub struct ToolContext {
    pub graph: Arc<dyn GraphStore>,
    pub documents: DocumentStore,
    pub queue: Arc<dyn EventQueue>,
    pub threads: ThreadStore,
    pub agents: Arc<AgentRegistry>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub embedding: EmbeddingConfig,
    /// Thread the triggering event belongs to.
    pub thread_id: String,
    /// Agent that issued the call.
    pub sender_id: String,
    /// Namespace of the current thread (`thread:<id>`).
    pub namespace: String,
    /// Trace and priority for any events a tool enqueues, keeping the turn together.
    pub trace_id: String,
    pub priority: i64,
}

/// One tool callable by agents.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique key; must match the name in [`Tool::spec`].
    fn name(&self) -> &str;

    fn spec(&self) -> ToolSpec;

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;
}

/// Structural validation of `args` against a JSON-Schema-shaped `input_schema`:
/// required keys present, top-level property types match. Deep schema features are the
/// tool's own concern.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let object = match args {
        Value::Object(map) => map,
        Value::Null => {
            return if required_keys(schema).is_empty() {
                Ok(())
            } else {
                Err(ToolError::InvalidArguments(
                    "expected an object, got null".to_string(),
                ))
            }
        }
        other => {
            return Err(ToolError::InvalidArguments(format!(
                "expected an object, got {other}"
            )))
        }
    };
    for key in required_keys(schema) {
        if !object.contains_key(&key) {
            return Err(ToolError::InvalidArguments(format!(
                "missing required argument: {key}"
            )));
        }
    }
    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (key, value) in object {
            let Some(expected) = properties
                .get(key)
                .and_then(|p| p.get("type"))
                .and_then(|t| t.as_str())
            else {
                continue;
            };
            let ok = match expected {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "integer" => value.is_i64() || value.is_u64(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                return Err(ToolError::InvalidArguments(format!(
                    "argument {key} should be a {expected}"
                )));
            }
        }
    }
    Ok(())
}

fn required_keys(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}
