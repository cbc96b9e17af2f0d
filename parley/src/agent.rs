//! Agent definitions and the per-instance registry.
//!
//! An agent is a participant backed by an LLM provider config, an allow-list of tools,
//! and optional RAG behavior. Registries are per-instance records, never process-global.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::llm::ProviderConfig;

/// When the runtime injects retrieved context into an agent's prompt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RagMode {
    /// Never inject; the agent can still search via tools.
    #[default]
    Off,
    /// Embed each inbound message and inject top-k chunks into the system prompt.
    Auto,
}

/// Entity extraction settings for one agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityExtractionOptions {
    #[serde(default)]
    pub enabled: bool,
    /// Candidates below this similarity are always new nodes.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Candidates at or above this similarity merge into the existing node.
    #[serde(default = "default_auto_merge_threshold")]
    pub auto_merge_threshold: f64,
    #[serde(default = "default_max_entities")]
    pub max_entities: usize,
}

fn default_similarity_threshold() -> f64 {
    0.80
}

fn default_auto_merge_threshold() -> f64 {
    0.92
}

fn default_max_entities() -> usize {
    10
}

impl Default for EntityExtractionOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            similarity_threshold: default_similarity_threshold(),
            auto_merge_threshold: default_auto_merge_threshold(),
            max_entities: default_max_entities(),
        }
    }
}

/// RAG behavior for one agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagOptions {
    #[serde(default)]
    pub mode: RagMode,
    /// Namespaces searched for auto-context, in addition to the thread namespace.
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    #[serde(default)]
    pub entity_extraction: EntityExtractionOptions,
}

fn default_top_k() -> usize {
    4
}

fn default_min_similarity() -> f64 {
    0.3
}

impl Default for RagOptions {
    fn default() -> Self {
        Self {
            mode: RagMode::Off,
            namespaces: Vec::new(),
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            entity_extraction: EntityExtractionOptions::default(),
        }
    }
}

/// One agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Persona / task instructions placed at the top of the system prompt.
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(rename = "llmOptions")]
    pub llm: ProviderConfig,
    /// Tool keys this agent may call; intersected with the instance registry.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default, rename = "ragOptions")]
    pub rag: RagOptions,
}

impl AgentDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, llm: ProviderConfig) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            instructions: None,
            llm,
            allowed_tools: Vec::new(),
            rag: RagOptions::default(),
        }
    }

    /// The namespace holding this agent's persistent memory node.
    pub fn namespace(&self) -> String {
        format!("agent:{}", self.id)
    }
}

/// Per-instance agent registry, keyed by agent id with name lookup.
#[derive(Default)]
pub struct AgentRegistry {
    by_id: DashMap<String, Arc<AgentDefinition>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, agent: AgentDefinition) {
        self.by_id.insert(agent.id.clone(), Arc::new(agent));
    }

    pub fn get(&self, id: &str) -> Option<Arc<AgentDefinition>> {
        self.by_id.get(id).map(|a| a.clone())
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<AgentDefinition>> {
        self.by_id
            .iter()
            .find(|entry| entry.value().name == name)
            .map(|entry| entry.value().clone())
    }

    /// Resolves an id-or-name reference the way routing does.
    pub fn resolve(&self, id_or_name: &str) -> Option<Arc<AgentDefinition>> {
        self.get(id_or_name).or_else(|| self.by_name(id_or_name))
    }

    pub fn is_agent(&self, id_or_name: &str) -> bool {
        self.resolve(id_or_name).is_some()
    }

    pub fn all(&self) -> Vec<Arc<AgentDefinition>> {
        self.by_id.iter().map(|e| e.value().clone()).collect()
    }
}
