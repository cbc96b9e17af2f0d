//! Runtime configuration for one instance.

use std::path::PathBuf;

use crate::embedding::EmbeddingConfig;
use crate::event::EventKind;
use crate::rag::ChunkingConfig;
use crate::thread::DEFAULT_MAX_AGENT_TURNS;

/// Configuration for [`Instance::create`](crate::runtime::Instance::create).
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// SQLite database file; created if missing.
    pub db_path: PathBuf,
    /// Parallel workers. Per-thread serialization holds regardless of this number.
    pub workers: usize,
    /// Worker lease on a claimed event; must exceed the external timeouts of one
    /// processor run.
    pub lease_ms: i64,
    /// Idle worker sleep between claim attempts.
    pub poll_interval_ms: u64,
    /// Reaper sweep interval.
    pub reap_interval_ms: u64,
    /// Loop-prevention default when a thread sets no `maxAgentTurns` of its own.
    pub default_max_agent_turns: u32,
    /// Event kinds grouped into priority classes; workers poll classes in order.
    pub priority_classes: Vec<Vec<EventKind>>,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    /// Per-subscriber ring size for the run-event stream.
    pub stream_buffer: usize,
    /// Add target hints to history rows agents see.
    pub include_target_context: bool,
}

impl RuntimeConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            workers: 2,
            lease_ms: 60_000,
            poll_interval_ms: 25,
            reap_interval_ms: 500,
            default_max_agent_turns: DEFAULT_MAX_AGENT_TURNS,
            priority_classes: default_priority_classes(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            stream_buffer: 256,
            include_target_context: false,
        }
    }
}

/// Tool results before LLM calls before fresh messages before background work, so an
/// in-flight turn finishes ahead of new input.
pub fn default_priority_classes() -> Vec<Vec<EventKind>> {
    vec![
        vec![EventKind::ToolCall],
        vec![EventKind::LlmCall],
        vec![EventKind::NewMessage],
        vec![EventKind::IngestDocument, EventKind::EntityExtract],
    ]
}
