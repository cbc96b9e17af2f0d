//! The `TOOL_CALL` processor: resolve, validate, execute, and report the result as a
//! tool message. Tool failures are reported, never retried — the agent decides whether
//! to issue a new call.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::event::{Event, EventPayload, MessageContent, NewMessagePayload, SenderRef};
use crate::message::SenderKind;
use crate::processor::{ProcessError, ProcessOutcome, Processor, ProcessorDeps};
use crate::tools::{validate_args, ToolError, ToolOutput};

pub struct ToolCallProcessor;

#[async_trait]
impl Processor for ToolCallProcessor {
    fn should_process(&self, event: &Event) -> bool {
        matches!(event.payload, EventPayload::ToolCall(_))
    }

    async fn process(
        &self,
        event: &Event,
        deps: &ProcessorDeps,
    ) -> Result<ProcessOutcome, ProcessError> {
        let EventPayload::ToolCall(payload) = &event.payload else {
            return Err(ProcessError::Invalid("expected TOOL_CALL payload".into()));
        };
        let call_id = payload
            .call
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let tool_name = payload.call.function.name.clone();

        let execution = execute(event, deps, payload, &tool_name).await;
        let (status, output_text, output_data) = match execution {
            Ok(output) => ("completed", output.text, output.data),
            Err(err) => {
                debug!(tool = %tool_name, error = %err, "tool call failed");
                let envelope = json!({"error": err.to_string()});
                (
                    "failed",
                    format!("tool {tool_name} failed: {err}"),
                    Some(envelope),
                )
            }
        };

        deps.sink.emit(
            event.thread_id.clone(),
            event.trace_id.clone(),
            run_event::RunStreamEvent::ToolCall {
                id: call_id.clone(),
                name: tool_name.clone(),
                status: status.to_string(),
            },
        );

        // The result flows back as a NEW_MESSAGE from the tool; batch correlation rides
        // in the message metadata so the message processor can aggregate.
        let parsed_args: Value =
            serde_json::from_str(&payload.call.function.arguments).unwrap_or(Value::Null);
        let mut metadata = json!({
            "toolCalls": [{
                "id": call_id,
                "name": tool_name,
                "args": parsed_args,
                "output": output_data.unwrap_or(Value::Null),
                "status": status,
            }],
            "agentId": payload.sender_id,
            "agentName": payload.agent_name,
        });
        if let Some(batch_id) = &payload.batch_id {
            metadata["batchId"] = json!(batch_id);
            metadata["batchSize"] = json!(payload.batch_size);
            metadata["batchIndex"] = json!(payload.batch_index);
        }

        let result_event = Event::child_of(
            event,
            EventPayload::NewMessage(NewMessagePayload {
                content: MessageContent::Text(output_text),
                sender: SenderRef {
                    id: Some(tool_name.clone()),
                    external_id: None,
                    kind: SenderKind::Tool,
                    name: Some(tool_name.clone()),
                    metadata: None,
                },
                thread: None,
                tool_calls: Vec::new(),
                tool_call_id: Some(call_id.clone()),
                metadata: Some(metadata),
            }),
        )
        // Routing state carried from the agent's message, for the follow-up LLM call.
        .with_metadata(event.metadata.clone());

        Ok(ProcessOutcome {
            produced: vec![result_event],
            result: json!({"toolCallId": call_id, "status": status}),
        })
    }
}

async fn execute(
    event: &Event,
    deps: &ProcessorDeps,
    payload: &crate::event::ToolCallPayload,
    tool_name: &str,
) -> Result<ToolOutput, ToolError> {
    let tool = deps
        .tools
        .get(tool_name)
        .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;
    let arguments = payload.call.function.arguments.trim();
    let args: Value = if arguments.is_empty() {
        json!({})
    } else {
        serde_json::from_str(arguments)
            .map_err(|e| ToolError::InvalidArguments(format!("arguments are not valid JSON: {e}")))?
    };
    validate_args(&tool.spec().input_schema, &args)?;
    let ctx = deps.tool_context(event, &payload.sender_id);
    tool.call(args, &ctx).await
}
