//! Processors: the extension point of the runtime. Each event kind has a built-in
//! handler; custom processors registered for a kind take precedence unless they opt into
//! chaining.

mod entity;
mod ingest;
mod llm_call;
mod message;
mod tool_call;

pub use entity::EntityExtractProcessor;
pub use ingest::IngestProcessor;
pub use llm_call::LlmCallProcessor;
pub use message::MessageProcessor;
pub use tool_call::ToolCallProcessor;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::{AgentDefinition, AgentRegistry};
use crate::config::RuntimeConfig;
use crate::db::StoreError;
use crate::embedding::{EmbedError, Embedder};
use crate::event::{Event, EventKind, EventPayload, MessageContent, NewMessagePayload, SenderRef};
use crate::graph::{GraphStore, Node, NodeDraft};
use crate::llm::{LlmClientFactory, LlmError};
use crate::message::{MessageStore, SenderKind};
use crate::queue::{EventQueue, QueueError};
use crate::rag::{DocumentFetcher, DocumentStore, IngestError};
use crate::stream::RunEventSink;
use crate::thread::ThreadStore;
use crate::tools::{ToolContext, ToolRegistry};

/// Failure of one processor run. The worker turns this into a `failed` event; for
/// user-facing kinds it also surfaces a system message.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error("invalid event: {0}")]
    Invalid(String),
}

/// What a processor produced: chained events plus a JSON result stored on the event row.
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    pub produced: Vec<Event>,
    pub result: Value,
}

impl ProcessOutcome {
    pub fn with_result(result: Value) -> Self {
        Self {
            produced: Vec::new(),
            result,
        }
    }
}

/// Dependencies injected into every processor run. Cheap to clone.
#[derive(Clone)]
pub struct ProcessorDeps {
    pub queue: Arc<dyn EventQueue>,
    pub threads: ThreadStore,
    pub messages: MessageStore,
    pub graph: Arc<dyn GraphStore>,
    pub documents: DocumentStore,
    pub agents: Arc<AgentRegistry>,
    pub tools: ToolRegistry,
    pub llm: Arc<dyn LlmClientFactory>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub fetcher: Arc<dyn DocumentFetcher>,
    pub sink: RunEventSink,
    pub config: Arc<RuntimeConfig>,
}

impl ProcessorDeps {
    /// Tool context for calls issued while processing `event` on behalf of `sender_id`.
    pub fn tool_context(&self, event: &Event, sender_id: &str) -> ToolContext {
        ToolContext {
            graph: self.graph.clone(),
            documents: self.documents.clone(),
            queue: self.queue.clone(),
            threads: self.threads.clone(),
            agents: self.agents.clone(),
            embedder: self.embedder.clone(),
            embedding: self.config.embedding.clone(),
            thread_id: event.thread_id.clone(),
            sender_id: sender_id.to_string(),
            namespace: format!("thread:{}", event.thread_id),
            trace_id: event.trace_id.clone(),
            priority: event.priority,
        }
    }
}

/// One processor: a `(should_process, process)` pair.
#[async_trait]
pub trait Processor: Send + Sync {
    fn should_process(&self, event: &Event) -> bool;

    /// Custom processors may opt into running before the built-in handler instead of
    /// replacing it.
    fn chains_builtin(&self) -> bool {
        false
    }

    async fn process(
        &self,
        event: &Event,
        deps: &ProcessorDeps,
    ) -> Result<ProcessOutcome, ProcessError>;
}

/// Resolution order for one event: matching custom processors first, then the built-in
/// handler for the kind (skipped unless every matching custom processor chains).
pub struct ProcessorSet {
    custom: Vec<Arc<dyn Processor>>,
    message: Arc<dyn Processor>,
    tool_call: Arc<dyn Processor>,
    llm_call: Arc<dyn Processor>,
    ingest: Arc<dyn Processor>,
    entity: Arc<dyn Processor>,
}

impl ProcessorSet {
    pub fn new(custom: Vec<Arc<dyn Processor>>) -> Self {
        Self {
            custom,
            message: Arc::new(MessageProcessor),
            tool_call: Arc::new(ToolCallProcessor),
            llm_call: Arc::new(LlmCallProcessor),
            ingest: Arc::new(IngestProcessor),
            entity: Arc::new(EntityExtractProcessor),
        }
    }

    fn builtin_for(&self, kind: &EventKind) -> Option<Arc<dyn Processor>> {
        match kind {
            EventKind::NewMessage => Some(self.message.clone()),
            EventKind::ToolCall => Some(self.tool_call.clone()),
            EventKind::LlmCall => Some(self.llm_call.clone()),
            EventKind::IngestDocument => Some(self.ingest.clone()),
            EventKind::EntityExtract => Some(self.entity.clone()),
            EventKind::Custom(_) => None,
        }
    }

    /// Processors to run for this event, in order. Empty means "complete as no-op".
    pub fn for_event(&self, event: &Event) -> Vec<Arc<dyn Processor>> {
        let mut chain: Vec<Arc<dyn Processor>> = Vec::new();
        let mut replace_builtin = false;
        for processor in &self.custom {
            if processor.should_process(event) {
                replace_builtin |= !processor.chains_builtin();
                chain.push(processor.clone());
            }
        }
        if !replace_builtin {
            if let Some(builtin) = self.builtin_for(&event.kind()) {
                chain.push(builtin);
            }
        }
        chain
    }
}

/// Finds or creates the agent's persistent participant node (in `agent:<id>`), the home
/// of its memory.
pub async fn ensure_participant_node(
    graph: &dyn GraphStore,
    agent: &AgentDefinition,
) -> Result<Node, StoreError> {
    let namespace = agent.namespace();
    let existing = graph
        .nodes_in_namespace(&namespace, Some("participant"))
        .await?;
    if let Some(node) = existing.into_iter().next() {
        return Ok(node);
    }
    graph
        .create_node(
            NodeDraft::new(&namespace, "participant", &agent.name)
                .with_data(json!({"agentId": agent.id, "metadata": {}}))
                .with_source("participant", &agent.id),
        )
        .await
}

/// Reads the agent's memory text from its participant node, if any.
pub async fn read_agent_memory(
    graph: &dyn GraphStore,
    agent: &AgentDefinition,
) -> Result<Option<String>, StoreError> {
    let nodes = graph
        .nodes_in_namespace(&agent.namespace(), Some("participant"))
        .await?;
    Ok(nodes.into_iter().next().and_then(|n| {
        n.data
            .get("metadata")
            .and_then(|m| m.get("memory"))
            .and_then(|v| v.as_str())
            .map(String::from)
    }))
}

/// A system `NEW_MESSAGE` event that reaches the stream but never re-triggers routing.
pub fn system_message_event(
    thread_id: &str,
    trace_id: &str,
    priority: i64,
    content: impl Into<String>,
    error: bool,
) -> Event {
    let payload = NewMessagePayload {
        content: MessageContent::Text(content.into()),
        sender: SenderRef {
            id: Some("system".to_string()),
            external_id: None,
            kind: SenderKind::System,
            name: Some("system".to_string()),
            metadata: None,
        },
        thread: None,
        tool_calls: Vec::new(),
        tool_call_id: None,
        metadata: Some(json!({"skipRouting": true, "error": error})),
    };
    let mut event = Event::new(thread_id, EventPayload::NewMessage(payload));
    event.trace_id = trace_id.to_string();
    event.priority = priority;
    event
}
