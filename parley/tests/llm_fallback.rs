//! Provider fallback and terminal LLM failure surfacing.

mod support;

use std::sync::Arc;

use async_trait::async_trait;
use parley::embedding::MockEmbedder;
use parley::llm::{
    ChatMessage, LlmClient, LlmClientFactory, LlmError, LlmReply, MockLlm, ProviderConfig,
};
use parley::message::SenderKind;
use parley::tools::ToolSpec;
use parley::{AgentDefinition, Instance, InstanceOptions, RuntimeConfig};
use run_event::RunStreamEvent;
use support::{user_message, RUN_DEADLINE};

struct AlwaysFails;

#[async_trait]
impl LlmClient for AlwaysFails {
    async fn invoke(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<LlmReply, LlmError> {
        Err(LlmError::Provider {
            status: 500,
            message: "upstream on fire".to_string(),
        })
    }
}

/// `flaky` always errors; `mock` serves the scripted reply.
struct FlakyFactory {
    scripted: Arc<MockLlm>,
}

impl LlmClientFactory for FlakyFactory {
    fn client_for(&self, config: &ProviderConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
        match config.provider.as_str() {
            "flaky" => Ok(Arc::new(AlwaysFails)),
            _ => Ok(self.scripted.clone()),
        }
    }
}

async fn flaky_instance(
    with_fallback: bool,
) -> (Arc<Instance>, Arc<MockLlm>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let scripted = Arc::new(MockLlm::new());

    let mut llm = ProviderConfig {
        provider: "flaky".to_string(),
        model: "broken-1".to_string(),
        api_key: None,
        base_url: None,
        temperature: None,
        max_tokens: None,
        fallback_provider: None,
    };
    if with_fallback {
        llm.fallback_provider = Some(Box::new(ProviderConfig::mock()));
    }

    let options = InstanceOptions::new(RuntimeConfig::new(dir.path().join("f.db")))
        .with_agent(AgentDefinition::new("helper-1", "Helper", llm))
        .with_llm_factory(Arc::new(FlakyFactory {
            scripted: scripted.clone(),
        }))
        .with_embedder(Arc::new(MockEmbedder::new(32)));
    let instance = Instance::create(options).await.unwrap();
    (instance, scripted, dir)
}

/// **Scenario**: the primary provider fails, the fallback serves the reply, and the
/// conversation continues as if nothing happened. The token stream stays well-formed:
/// the fallback's tokens followed by exactly one completion marker, never a spurious
/// `is_complete` between the failed primary attempt and the fallback.
#[tokio::test]
async fn fallback_provider_rescues_the_turn() {
    let (instance, scripted, _dir) = flaky_instance(true).await;
    scripted.push_text("saved by the fallback");

    let mut handle = instance
        .run(user_message("fb", &["ana", "Helper"], "ana", "hello?"))
        .await
        .unwrap();
    assert!(handle.wait_timeout(RUN_DEADLINE).await.unwrap());

    let deps = instance.deps();
    let messages = deps.messages.list_thread(handle.thread_id()).await.unwrap();
    let agent_reply = messages
        .iter()
        .find(|m| m.sender_kind == SenderKind::Agent)
        .expect("agent reply from fallback");
    assert_eq!(agent_reply.content, "saved by the fallback");

    let mut streamed = Vec::new();
    let mut completions = 0;
    while let Ok(Some(event)) =
        tokio::time::timeout(std::time::Duration::from_millis(200), handle.next_event()).await
    {
        if let RunStreamEvent::Token {
            token, is_complete, ..
        } = event
        {
            if is_complete {
                completions += 1;
            } else {
                streamed.push(token);
            }
        }
    }
    assert_eq!(completions, 1, "one completion marker despite the retry");
    assert_eq!(streamed.join(""), "saved by the fallback");

    instance.shutdown().await;
}

/// **Scenario**: with no fallback configured the LLM call fails terminally and the
/// failure surfaces as a system message with `error: true` that does not re-trigger
/// routing.
#[tokio::test]
async fn exhausted_provider_surfaces_system_error() {
    let (instance, scripted, _dir) = flaky_instance(false).await;

    let mut handle = instance
        .run(user_message("dead", &["ana", "Helper"], "ana", "hello?"))
        .await
        .unwrap();
    assert!(handle.wait_timeout(RUN_DEADLINE).await.unwrap());

    let deps = instance.deps();
    let messages = deps.messages.list_thread(handle.thread_id()).await.unwrap();
    let system = messages
        .iter()
        .find(|m| m.sender_kind == SenderKind::System)
        .expect("system error message");
    assert!(system.content.starts_with('❌'), "got: {}", system.content);
    assert_eq!(
        system.metadata.get("error"),
        Some(&serde_json::json!(true))
    );
    // No agent reply and only the one failed LLM attempt chain.
    assert!(messages.iter().all(|m| m.sender_kind != SenderKind::Agent));
    assert!(scripted.recorded_prompts().is_empty());

    // A dead turn never pretends the stream completed; the failure event does that.
    let mut saw_failure = false;
    while let Ok(Some(event)) =
        tokio::time::timeout(std::time::Duration::from_millis(200), handle.next_event()).await
    {
        match event {
            RunStreamEvent::Token { is_complete, .. } => {
                assert!(!is_complete, "completion marker on a failed turn");
            }
            RunStreamEvent::RunFailed { .. } => saw_failure = true,
            _ => {}
        }
    }
    assert!(saw_failure, "RunFailed never reached the stream");

    instance.shutdown().await;
}
