//! Mock LLM for tests and offline runs.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::llm::{ChatMessage, LlmClient, LlmError, LlmReply, TokenChunk};
use crate::tools::ToolSpec;

/// Scripted LLM: pops one reply per invocation and records every prompt it saw.
/// With an empty script it echoes the last user message, prefixed `echo:`.
#[derive(Default)]
pub struct MockLlm {
    script: Mutex<VecDeque<LlmReply>>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// An unscripted mock that always echoes.
    pub fn echo() -> Self {
        Self::default()
    }

    /// Queues the next reply.
    pub fn push_reply(&self, reply: LlmReply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn push_text(&self, content: impl Into<String>) {
        self.push_reply(LlmReply {
            content: content.into(),
            tool_calls: Vec::new(),
            usage: None,
        });
    }

    /// Every prompt passed to `invoke`, in call order.
    pub fn recorded_prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<LlmReply, LlmError> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        if let Some(reply) = self.script.lock().unwrap().pop_front() {
            return Ok(reply);
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::llm::ChatRole::User))
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(LlmReply {
            content: format!("echo: {last_user}"),
            tool_calls: Vec::new(),
            usage: None,
        })
    }

    async fn invoke_stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        chunk_tx: Option<mpsc::Sender<TokenChunk>>,
    ) -> Result<LlmReply, LlmError> {
        let reply = self.invoke(messages, tools).await?;
        if let Some(tx) = chunk_tx {
            // Stream word-by-word so token consumers see more than one chunk.
            for word in reply.content.split_inclusive(' ') {
                let _ = tx
                    .send(TokenChunk {
                        token: word.to_string(),
                    })
                    .await;
            }
        }
        Ok(reply)
    }
}
