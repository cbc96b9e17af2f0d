//! Shared fixtures for integration tests: an instance wired to a scripted LLM and the
//! deterministic mock embedder, on a throwaway database.

use std::sync::Arc;

use parley::embedding::MockEmbedder;
use parley::event::{MessageContent, NewMessagePayload, SenderRef, ThreadRef};
use parley::llm::{LlmClient, LlmClientFactory, LlmError, MockLlm, ProviderConfig};
use parley::message::SenderKind;
use parley::{AgentDefinition, Instance, InstanceOptions, RuntimeConfig};

pub const RUN_DEADLINE: std::time::Duration = std::time::Duration::from_secs(20);

/// Factory that hands every provider the same scripted [`MockLlm`].
pub struct FixedLlmFactory(pub Arc<MockLlm>);

impl LlmClientFactory for FixedLlmFactory {
    fn client_for(&self, _config: &ProviderConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
        Ok(self.0.clone())
    }
}

pub struct TestInstance {
    pub instance: Arc<Instance>,
    pub llm: Arc<MockLlm>,
    _dir: tempfile::TempDir,
}

/// An instance with the given agents, a shared scripted LLM, and a 32-dim mock embedder.
pub async fn instance_with_agents(agents: Vec<AgentDefinition>) -> TestInstance {
    instance_with_agents_and(agents, |_| {}).await
}

/// Same, with a hook to tweak the runtime config (chunking, workers, ...).
pub async fn instance_with_agents_and(
    agents: Vec<AgentDefinition>,
    tweak: impl FnOnce(&mut RuntimeConfig),
) -> TestInstance {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = RuntimeConfig::new(dir.path().join("parley-test.db"));
    tweak(&mut config);

    let llm = Arc::new(MockLlm::new());
    let mut options = InstanceOptions::new(config)
        .with_llm_factory(Arc::new(FixedLlmFactory(llm.clone())))
        .with_embedder(Arc::new(MockEmbedder::new(32)));
    for agent in agents {
        options = options.with_agent(agent);
    }
    let instance = Instance::create(options).await.expect("instance");
    TestInstance {
        instance,
        llm,
        _dir: dir,
    }
}

pub fn agent(id: &str, name: &str) -> AgentDefinition {
    AgentDefinition::new(id, name, ProviderConfig::mock())
}

/// A user-authored message bound to `external_id` with explicit participants.
pub fn user_message(
    external_id: &str,
    participants: &[&str],
    sender: &str,
    content: &str,
) -> NewMessagePayload {
    NewMessagePayload {
        content: MessageContent::Text(content.to_string()),
        sender: SenderRef {
            id: Some(sender.to_string()),
            external_id: None,
            kind: SenderKind::User,
            name: Some(sender.to_string()),
            metadata: None,
        },
        thread: Some(ThreadRef {
            external_id: Some(external_id.to_string()),
            participants: participants.iter().map(|p| p.to_string()).collect(),
        }),
        tool_calls: Vec::new(),
        tool_call_id: None,
        metadata: None,
    }
}
