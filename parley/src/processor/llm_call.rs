//! The `LLM_CALL` processor: provider dispatch with single-shot fallback, token
//! streaming, and fan-out of the assistant reply as a `NEW_MESSAGE`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::event::{
    Event, EventPayload, IncomingToolCall, LlmCallPayload, MessageContent, NewMessagePayload,
    SenderRef,
};
use crate::llm::{LlmError, LlmReply, ProviderConfig};
use crate::message::SenderKind;
use crate::processor::{ProcessError, ProcessOutcome, Processor, ProcessorDeps};

pub struct LlmCallProcessor;

#[async_trait]
impl Processor for LlmCallProcessor {
    fn should_process(&self, event: &Event) -> bool {
        matches!(event.payload, EventPayload::LlmCall(_))
    }

    async fn process(
        &self,
        event: &Event,
        deps: &ProcessorDeps,
    ) -> Result<ProcessOutcome, ProcessError> {
        let EventPayload::LlmCall(payload) = &event.payload else {
            return Err(ProcessError::Invalid("expected LLM_CALL payload".into()));
        };

        let reply = match attempt(event, deps, payload, &payload.config).await {
            Ok(reply) => reply,
            Err(primary_err) => {
                // One retry via the configured fallback provider, sharing the budget.
                let Some(fallback) = &payload.config.fallback_provider else {
                    return Err(primary_err.into());
                };
                warn!(
                    agent = %payload.agent_name,
                    provider = %payload.config.provider,
                    fallback = %fallback.provider,
                    error = %primary_err,
                    "primary provider failed; trying fallback"
                );
                attempt(event, deps, payload, fallback).await?
            }
        };

        // One completion marker per LLM_CALL, emitted only after the retry decision:
        // consumers treat `is_complete` as end-of-stream, so it must not appear between
        // a failed primary attempt and the fallback's tokens.
        deps.sink.emit(
            event.thread_id.clone(),
            event.trace_id.clone(),
            run_event::RunStreamEvent::Token {
                agent_name: payload.agent_name.clone(),
                token: String::new(),
                is_complete: true,
            },
        );

        // Multiple tool calls share a batch id so the message processor can aggregate
        // their results before the next LLM call.
        let batched = reply.tool_calls.len() > 1;
        let batch_id = batched.then(|| uuid::Uuid::new_v4().to_string());
        let tool_calls: Vec<IncomingToolCall> = reply
            .tool_calls
            .iter()
            .enumerate()
            .map(|(index, call)| IncomingToolCall {
                id: Some(if call.id.is_empty() {
                    uuid::Uuid::new_v4().to_string()
                } else {
                    call.id.clone()
                }),
                name: call.name.clone(),
                args: serde_json::from_str(&call.arguments)
                    .unwrap_or(Value::String(call.arguments.clone())),
                batch_id: batch_id.clone(),
                batch_size: batched.then_some(reply.tool_calls.len()),
                batch_index: batched.then_some(index),
            })
            .collect();

        debug!(
            agent = %payload.agent_name,
            tool_calls = tool_calls.len(),
            chars = reply.content.len(),
            "llm reply received"
        );

        let message_event = Event::child_of(
            event,
            EventPayload::NewMessage(NewMessagePayload {
                content: MessageContent::Text(reply.content.clone()),
                sender: SenderRef {
                    id: Some(payload.agent_id.clone()),
                    external_id: None,
                    kind: SenderKind::Agent,
                    name: Some(payload.agent_name.clone()),
                    metadata: None,
                },
                thread: None,
                tool_calls,
                tool_call_id: None,
                metadata: None,
            }),
        )
        // Downstream routing decided at prompt-assembly time rides along so the next
        // hop uses the queued-up recipient rather than re-deriving it.
        .with_metadata(event.metadata.clone());

        Ok(ProcessOutcome {
            produced: vec![message_event],
            result: json!({
                "usage": reply.usage,
                "toolCalls": reply.tool_calls.len(),
            }),
        })
    }
}

/// One provider attempt with token streaming into the run-event sink. The completion
/// marker is the caller's to emit — an attempt does not know whether a fallback follows.
async fn attempt(
    event: &Event,
    deps: &ProcessorDeps,
    payload: &LlmCallPayload,
    config: &ProviderConfig,
) -> Result<LlmReply, LlmError> {
    let client = deps.llm.client_for(config)?;
    let (tx, mut rx) = tokio::sync::mpsc::channel::<crate::llm::TokenChunk>(64);

    let sink = deps.sink.clone();
    let thread_id = event.thread_id.clone();
    let trace_id = event.trace_id.clone();
    let agent_name = payload.agent_name.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            sink.emit(
                thread_id.clone(),
                trace_id.clone(),
                run_event::RunStreamEvent::Token {
                    agent_name: agent_name.clone(),
                    token: chunk.token,
                    is_complete: false,
                },
            );
        }
    });

    let result = client
        .invoke_stream(&payload.messages, &payload.tools, Some(tx))
        .await;
    // The sender side is dropped either way; drain whatever was streamed.
    let _ = forwarder.await;
    result
}
