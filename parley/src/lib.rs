//! # Parley
//!
//! A durable multi-agent conversation runtime: a typed, priority-ordered event queue
//! whose processors route messages between users and LLM-backed agents, execute tool
//! calls, maintain a knowledge graph, and run a retrieval pipeline — all on one SQLite
//! file with vector search.
//!
//! ## Design
//!
//! - **Everything is an event**: user messages, tool results, LLM calls, ingest jobs all
//!   enter one persistent queue and are processed under worker leases with at-least-once
//!   delivery. Chained work inherits its parent's trace and priority so a conversation
//!   turn stays together.
//! - **Per-thread serialization**: claiming an event takes the thread lease in the same
//!   transaction, so one thread never has two events in flight while unrelated threads
//!   run in parallel.
//! - **Routing as a state machine**: the `NEW_MESSAGE` processor persists the message,
//!   aggregates tool batches, resolves `@mentions` and queued hand-offs, applies the
//!   agent-loop guard, and emits `TOOL_CALL` / `LLM_CALL` follow-ups.
//! - **One graph substrate**: conversation history, RAG chunks, and extracted entities
//!   are all namespaced nodes and edges; retrieval is KNN over sqlite-vec with cosine
//!   similarity.
//!
//! ## Main modules
//!
//! - [`runtime`]: [`Instance`], [`InstanceOptions`], [`RunHandle`] — create an instance
//!   and drive runs.
//! - [`event`]: [`Event`], [`EventKind`], payload types — the queue vocabulary.
//! - [`queue`]: [`EventQueue`], [`SqliteEventQueue`] — claims, leases, reaping.
//! - [`processor`]: [`Processor`] — the extension point; built-in processors for
//!   messages, tool calls, LLM calls, ingest, and entity extraction.
//! - [`graph`]: [`GraphStore`], [`SqliteGraphStore`] — nodes, edges, vector search.
//! - [`agent`], [`llm`], [`embedding`], [`tools`]: agent definitions, the LLM and
//!   embedder seams, and the tool registry.
//! - [`rag`]: chunking, fetching, and the document store behind ingest.
//! - [`thread`], [`message`], [`history`]: conversation state and its projection into
//!   prompts.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use parley::{AgentDefinition, Instance, InstanceOptions, ProviderConfig, RuntimeConfig};
//! use parley::event::{MessageContent, NewMessagePayload, SenderRef, ThreadRef};
//! use parley::message::SenderKind;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = InstanceOptions::new(RuntimeConfig::new("parley.db"))
//!     .with_agent(AgentDefinition::new(
//!         "helper",
//!         "Helper",
//!         ProviderConfig::openai("gpt-4o-mini"),
//!     ));
//! let instance = Instance::create(options).await?;
//!
//! let mut handle = instance
//!     .run(NewMessagePayload {
//!         content: MessageContent::Text("hello @Helper".into()),
//!         sender: SenderRef {
//!             id: Some("ana".into()),
//!             kind: SenderKind::User,
//!             name: Some("ana".into()),
//!             ..Default::default()
//!         },
//!         thread: Some(ThreadRef {
//!             external_id: Some("demo".into()),
//!             participants: vec!["ana".into(), "Helper".into()],
//!         }),
//!         ..Default::default()
//!     })
//!     .await?;
//!
//! while let Some(event) = handle.next_event().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod db;
pub mod embedding;
pub mod event;
pub mod graph;
pub mod history;
pub mod ids;
pub mod llm;
pub mod message;
pub mod processor;
pub mod queue;
pub mod rag;
pub mod routing;
pub mod runtime;
pub mod stream;
pub mod thread;
pub mod tools;

pub use agent::{AgentDefinition, AgentRegistry, EntityExtractionOptions, RagMode, RagOptions};
pub use config::RuntimeConfig;
pub use db::{Db, StoreError};
pub use embedding::{Embedder, EmbeddingConfig, MockEmbedder, OpenAiEmbedder};
pub use event::{Event, EventKind, EventPayload, EventStatus};
pub use graph::{GraphStore, Node, NodeDraft, SqliteGraphStore};
pub use history::{transcript, HistoryOptions};
pub use llm::{
    ChatMessage, ChatRole, LlmClient, LlmClientFactory, LlmReply, MockLlm, OpenAiChatClient,
    ProviderConfig,
};
pub use message::{MessageStore, SenderKind, StoredMessage};
pub use processor::{ProcessError, ProcessOutcome, Processor, ProcessorDeps};
pub use queue::{EventQueue, QueueError, SqliteEventQueue};
pub use rag::{ChunkStrategy, ChunkingConfig, DocumentFetcher, DocumentStore};
pub use runtime::{create_instance, Instance, InstanceOptions, RunHandle, RuntimeError};
pub use thread::{Thread, ThreadMetadata, ThreadStore};
pub use tools::{Tool, ToolRegistry, ToolSpec};
