//! The `NEW_MESSAGE` processor: persistence, tool-batch aggregation, and the
//! multi-agent routing state machine.
//!
//! Step order (each step may return early):
//! persist + entity fanout → skip gate → batch aggregation → resolve target →
//! loop guard → agent tool calls → LLM call for a target agent.
//!
//! Resolution order reconciles explicit mentions with queued routing: tool results
//! always return to the requesting agent; otherwise explicit `@mentions` win, then the
//! routed `targetId` carried on the event, then the sender's persisted target, then the
//! first other agent in the thread.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::agent::RagMode;
use crate::event::{
    Event, EventPayload, LlmCallPayload, NewMessagePayload, ToolCallPayload, ToolCallSpec,
    ToolFunction,
};
use crate::graph::{ChunkQuery, EdgeDraft, GraphStore, Node, NodeDraft};
use crate::history::{transcript, HistoryOptions};
use crate::ids;
use crate::llm::ChatMessage;
use crate::message::{MessageToolCall, SenderKind, StoredMessage};
use crate::processor::{
    read_agent_memory, ProcessError, ProcessOutcome, Processor,
    ProcessorDeps,
};
use crate::routing::{build_mention_queue, parse_mentions, pop_queue};
use crate::thread::{PendingBatch, Thread};

pub struct MessageProcessor;

#[async_trait]
impl Processor for MessageProcessor {
    fn should_process(&self, event: &Event) -> bool {
        matches!(event.payload, EventPayload::NewMessage(_))
    }

    async fn process(
        &self,
        event: &Event,
        deps: &ProcessorDeps,
    ) -> Result<ProcessOutcome, ProcessError> {
        let EventPayload::NewMessage(payload) = &event.payload else {
            return Err(ProcessError::Invalid("expected NEW_MESSAGE payload".into()));
        };
        let thread = deps
            .threads
            .get(&event.thread_id)
            .await?
            .ok_or_else(|| ProcessError::Invalid(format!("unknown thread {}", event.thread_id)))?;

        let sender_id = payload.sender.participant_id();
        let sender_kind = payload.sender.kind;
        let content_text = payload.content.as_text();
        let msg_meta = payload.metadata.clone().unwrap_or_else(|| json!({}));

        // 1. Persist the message and dual-write its graph node.
        let message = persist_message(event, payload, &thread, deps).await?;
        let message_node = persist_message_node(&message, &thread, deps).await?;
        deps.sink.emit(
            thread.id.clone(),
            event.trace_id.clone(),
            run_event::RunStreamEvent::NewMessage {
                sender_type: sender_kind.as_str().to_string(),
                sender_id: sender_id.clone(),
                sender_name: payload.sender.name.clone(),
                content: content_text.clone(),
                metadata: msg_meta.clone(),
            },
        );

        // 2. Entity-extract fanout, below every interactive class.
        let mut produced: Vec<Event> = Vec::new();
        if !content_text.trim().is_empty() {
            for agent in deps.agents.all() {
                if agent.rag.entity_extraction.enabled {
                    produced.push(
                        Event::child_of(
                            event,
                            EventPayload::EntityExtract(crate::event::EntityExtractPayload {
                                source_node_id: message_node.id.clone(),
                                content: content_text.clone(),
                                namespace: thread.namespace(),
                                source_type: Some("message".to_string()),
                                agent_id: agent.id.clone(),
                            }),
                        )
                        .with_priority(event.priority - 100),
                    );
                }
            }
        }

        // 3. Skip gate: system traffic that must reach the stream without routing.
        if msg_meta.get("skipRouting").and_then(|v| v.as_bool()) == Some(true) {
            return Ok(ProcessOutcome {
                produced,
                result: json!({"messageId": message.id, "skipped": true}),
            });
        }

        // 4. Tool-batch aggregation: wait for the whole batch before calling the LLM.
        if sender_kind == SenderKind::Tool {
            if let Some(wait) = aggregate_batch(event, payload, &msg_meta, deps).await? {
                if wait {
                    return Ok(ProcessOutcome {
                        produced,
                        result: json!({"messageId": message.id, "waitingForBatch": true}),
                    });
                }
            }
        }

        // 5. Resolve the target participant.
        let carried_queue = event.meta_str_list("targetQueue");
        let resolution = resolve_target(
            event,
            &thread,
            deps,
            sender_kind,
            &sender_id,
            &content_text,
            &msg_meta,
            &carried_queue,
        );
        let Some(resolution) = resolution else {
            debug!(thread = %thread.id, "no route for message; stopping chain");
            return Ok(ProcessOutcome {
                produced,
                result: json!({"messageId": message.id, "routed": false}),
            });
        };
        if let Some((from, to)) = &resolution.persist_target {
            deps.threads
                .set_participant_target(&thread.id, from, to)
                .await?;
        }
        let target = resolution.target.clone();
        let queue = resolution.queue.clone();
        let target_is_agent = deps.agents.is_agent(&target);

        // 6. Loop guard.
        match sender_kind {
            SenderKind::User => {
                deps.threads
                    .update_metadata(&thread.id, |m| m.agent_turn_count = 0)
                    .await?;
            }
            SenderKind::Agent if target_is_agent => {
                let max_turns = thread
                    .metadata
                    .max_agent_turns
                    .unwrap_or(deps.config.default_max_agent_turns);
                let updated = deps
                    .threads
                    .update_metadata(&thread.id, |m| m.agent_turn_count += 1)
                    .await?;
                if updated.agent_turn_count >= max_turns {
                    let fallback = thread
                        .participants
                        .iter()
                        .find(|p| !deps.agents.is_agent(p))
                        .cloned();
                    info!(
                        thread = %thread.id,
                        turns = updated.agent_turn_count,
                        "agent turn cap reached; routing to user"
                    );
                    deps.threads
                        .update_metadata(&thread.id, |m| m.agent_turn_count = 0)
                        .await?;
                    if let Some(user) = &fallback {
                        deps.threads
                            .set_participant_target(&thread.id, &sender_id, user)
                            .await?;
                    }
                    return Ok(ProcessOutcome {
                        produced,
                        result: json!({
                            "messageId": message.id,
                            "loopGuard": true,
                            "routedTo": fallback,
                        }),
                    });
                }
            }
            _ if !target_is_agent => {
                deps.threads
                    .update_metadata(&thread.id, |m| m.agent_turn_count = 0)
                    .await?;
            }
            _ => {}
        }

        // 7. Agent-authored tool calls: dispatch and stop; results route back here.
        if sender_kind == SenderKind::Agent && !payload.tool_calls.is_empty() {
            let Some(agent) = deps.agents.resolve(&sender_id) else {
                produced.push(crate::processor::system_message_event(
                    &thread.id,
                    &event.trace_id,
                    event.priority,
                    format!("❌ unknown agent issued tool calls: {sender_id}"),
                    true,
                ));
                return Ok(ProcessOutcome {
                    produced,
                    result: json!({"messageId": message.id, "error": "unknown agent"}),
                });
            };
            let batched = payload.tool_calls.len() > 1;
            let batch_id = batched.then(|| {
                payload
                    .tool_calls
                    .first()
                    .and_then(|c| c.batch_id.clone())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
            });
            for (index, call) in payload.tool_calls.iter().enumerate() {
                let call_id = call
                    .id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let arguments = match &call.args {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                deps.sink.emit(
                    thread.id.clone(),
                    event.trace_id.clone(),
                    run_event::RunStreamEvent::ToolCall {
                        id: call_id.clone(),
                        name: call.name.clone(),
                        status: "dispatched".to_string(),
                    },
                );
                produced.push(
                    Event::child_of(
                        event,
                        EventPayload::ToolCall(ToolCallPayload {
                            agent_name: agent.name.clone(),
                            sender_id: agent.id.clone(),
                            sender_kind: SenderKind::Agent,
                            call: ToolCallSpec {
                                id: Some(call_id),
                                function: ToolFunction {
                                    name: call.name.clone(),
                                    arguments,
                                },
                            },
                            batch_id: batch_id.clone(),
                            batch_size: batched.then_some(payload.tool_calls.len()),
                            batch_index: batched.then_some(index),
                        }),
                    )
                    // Routing state rides along so the post-batch LLM call can restore it.
                    .with_metadata(event.metadata.clone()),
                );
            }
            return Ok(ProcessOutcome {
                produced,
                result: json!({
                    "messageId": message.id,
                    "toolCalls": payload.tool_calls.len(),
                }),
            });
        }

        // 8. Target is an agent: assemble the prompt and emit the LLM call.
        if let Some(agent) = deps.agents.resolve(&target) {
            let rag_context = auto_rag_context(deps, &agent, &thread, &content_text).await?;
            let memory = read_agent_memory(deps.graph.as_ref(), &agent).await?;
            let system = assemble_system_prompt(&agent, &thread, memory, rag_context);
            let history = deps.messages.list_thread(&thread.id).await?;
            let mut messages = vec![ChatMessage::system(system)];
            messages.extend(transcript(
                &history,
                &agent.id,
                HistoryOptions {
                    include_target_context: deps.config.include_target_context,
                },
            ));
            let tools = deps.tools.specs_for(&agent.allowed_tools);

            // Routing for the agent's eventual reply: next queued stop, else back to
            // whoever the agent is answering.
            let source_sender = if sender_kind == SenderKind::Tool {
                persisted_target_of(&thread, &agent.id, &agent.name)
                    .or_else(|| event.meta_str("sourceMessageSenderId").map(String::from))
                    .unwrap_or_else(|| sender_id.clone())
            } else {
                sender_id.clone()
            };
            let (queue_head, queue_rest) = pop_queue(&queue);
            let reply_target = queue_head
                .or_else(|| Some(source_sender.clone()))
                .filter(|t| t != &agent.id && t != &agent.name);

            produced.push(
                Event::child_of(
                    event,
                    EventPayload::LlmCall(LlmCallPayload {
                        agent_name: agent.name.clone(),
                        agent_id: agent.id.clone(),
                        messages,
                        tools,
                        config: agent.llm.clone(),
                    }),
                )
                .with_metadata(json!({
                    "targetId": reply_target,
                    "targetQueue": queue_rest,
                    "sourceMessageSenderId": source_sender,
                })),
            );
            return Ok(ProcessOutcome {
                produced,
                result: json!({"messageId": message.id, "routedTo": target}),
            });
        }

        // Target is a user: the turn ends here.
        Ok(ProcessOutcome {
            produced,
            result: json!({"messageId": message.id, "routedTo": target}),
        })
    }
}

async fn persist_message(
    event: &Event,
    payload: &NewMessagePayload,
    thread: &Thread,
    deps: &ProcessorDeps,
) -> Result<StoredMessage, ProcessError> {
    let mut message = StoredMessage::new(
        thread.id.clone(),
        payload.sender.kind,
        payload.sender.participant_id(),
    );
    message.sender_name = payload.sender.name.clone();
    message.content = payload.content.as_text();
    message.tool_call_id = payload.tool_call_id.clone();
    message.target_id = event.meta_str("targetId").map(String::from);
    message.target_queue = event.meta_str_list("targetQueue");
    message.metadata = payload.metadata.clone().unwrap_or(Value::Null);
    message.tool_calls = payload
        .tool_calls
        .iter()
        .map(|c| MessageToolCall {
            id: c.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name: c.name.clone(),
            args: c.args.clone(),
        })
        .collect();
    deps.messages.insert(&message).await?;
    Ok(message)
}

/// Dual-write: a `message` node in the thread namespace plus a `SENT_BY` edge from the
/// sender's thread-scoped participant node.
async fn persist_message_node(
    message: &StoredMessage,
    thread: &Thread,
    deps: &ProcessorDeps,
) -> Result<Node, ProcessError> {
    let namespace = thread.namespace();
    let node = deps
        .graph
        .create_node(
            NodeDraft::new(&namespace, "message", &message.id)
                .with_content(message.content.clone())
                .with_data(json!({
                    "senderId": message.sender_id,
                    "senderType": message.sender_kind.as_str(),
                }))
                .with_source("message", &message.id),
        )
        .await?;
    let participant =
        ensure_thread_participant(deps.graph.as_ref(), &namespace, message).await?;
    deps.graph
        .create_edge(EdgeDraft::new(&participant.id, &node.id, "SENT_BY"))
        .await?;
    Ok(node)
}

async fn ensure_thread_participant(
    graph: &dyn GraphStore,
    namespace: &str,
    message: &StoredMessage,
) -> Result<Node, ProcessError> {
    let existing = graph.nodes_in_namespace(namespace, Some("participant")).await?;
    if let Some(node) = existing.into_iter().find(|n| {
        n.data.get("participantId").and_then(|v| v.as_str()) == Some(message.sender_id.as_str())
    }) {
        return Ok(node);
    }
    let name = message
        .sender_name
        .clone()
        .unwrap_or_else(|| message.sender_id.clone());
    Ok(graph
        .create_node(
            NodeDraft::new(namespace, "participant", &name)
                .with_data(json!({
                    "participantId": message.sender_id,
                    "participantType": message.sender_kind.as_str(),
                }))
                .with_source("participant", format!("{namespace}:{}", message.sender_id)),
        )
        .await?)
}

/// Returns `Some(true)` when the batch is still collecting, `Some(false)` when this
/// message completed it, `None` when the message is not part of a multi-call batch.
async fn aggregate_batch(
    event: &Event,
    payload: &NewMessagePayload,
    msg_meta: &Value,
    deps: &ProcessorDeps,
) -> Result<Option<bool>, ProcessError> {
    let Some(batch_id) = msg_meta.get("batchId").and_then(|v| v.as_str()) else {
        return Ok(None);
    };
    let batch_size = msg_meta
        .get("batchSize")
        .and_then(|v| v.as_u64())
        .unwrap_or(1) as usize;
    if batch_size <= 1 {
        return Ok(None);
    }

    let entry_result = json!({
        "toolCallId": payload.tool_call_id,
        "content": payload.content.as_text(),
        "status": msg_meta
            .pointer("/toolCalls/0/status")
            .cloned()
            .unwrap_or(Value::String("completed".into())),
        "batchIndex": msg_meta.get("batchIndex").cloned().unwrap_or(Value::Null),
    });
    let agent_name = msg_meta
        .get("agentName")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let agent_id = msg_meta
        .get("agentId")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let key = batch_id.to_string();
    let now = ids::now_millis();
    let updated = deps
        .threads
        .update_metadata(&event.thread_id, move |m| {
            let entry = m.pending_tool_batches.entry(key).or_insert_with(|| PendingBatch {
                batch_size,
                agent_name,
                sender_id: agent_id,
                results: Vec::new(),
                created_at: now,
            });
            let call_id = entry_result.get("toolCallId").cloned().unwrap_or(Value::Null);
            let duplicate = entry
                .results
                .iter()
                .any(|r| r.get("toolCallId") == Some(&call_id));
            if !duplicate && entry.results.len() < entry.batch_size {
                entry.results.push(entry_result);
            }
        })
        .await?;

    let complete = updated
        .pending_tool_batches
        .get(batch_id)
        .map(|e| e.results.len() >= e.batch_size)
        .unwrap_or(true);
    if complete {
        let key = batch_id.to_string();
        deps.threads
            .update_metadata(&event.thread_id, move |m| {
                m.pending_tool_batches.remove(&key);
            })
            .await?;
        debug!(batch = batch_id, "tool batch complete");
        Ok(Some(false))
    } else {
        debug!(batch = batch_id, "tool batch waiting for more results");
        Ok(Some(true))
    }
}

struct Resolution {
    target: String,
    queue: Vec<String>,
    persist_target: Option<(String, String)>,
}

#[allow(clippy::too_many_arguments)]
fn resolve_target(
    event: &Event,
    thread: &Thread,
    deps: &ProcessorDeps,
    sender_kind: SenderKind,
    sender_id: &str,
    content: &str,
    msg_meta: &Value,
    carried_queue: &[String],
) -> Option<Resolution> {
    // Tool results always return to the requesting agent.
    if sender_kind == SenderKind::Tool {
        let requester = msg_meta
            .get("agentId")
            .and_then(|v| v.as_str())
            .or_else(|| msg_meta.get("agentName").and_then(|v| v.as_str()))?;
        let agent = deps.agents.resolve(requester)?;
        return Some(Resolution {
            target: agent.id.clone(),
            queue: carried_queue.to_vec(),
            persist_target: None,
        });
    }

    // Explicit mentions of known agents or thread participants win.
    let mentions: Vec<String> = parse_mentions(content)
        .into_iter()
        .filter(|m| deps.agents.is_agent(m) || thread.participants.iter().any(|p| p == m))
        .collect();
    if let Some(first) = mentions.first() {
        let origin = event
            .meta_str("sourceMessageSenderId")
            .unwrap_or(sender_id);
        let queue = build_mention_queue(&mentions[1..], carried_queue, Some(origin), first);
        return Some(Resolution {
            target: first.clone(),
            queue,
            persist_target: Some((sender_id.to_string(), first.clone())),
        });
    }

    // A target routed by a prior LLM-call response.
    if let Some(target) = event.meta_str("targetId") {
        if target != sender_id {
            return Some(Resolution {
                target: target.to_string(),
                queue: carried_queue
                    .iter()
                    .filter(|q| q.as_str() != target)
                    .cloned()
                    .collect(),
                persist_target: None,
            });
        }
    }

    // The sender's remembered conversation partner, if it still names a real agent.
    if let Some(persisted) = thread.metadata.participant_targets.get(sender_id) {
        if deps.agents.is_agent(persisted) {
            return Some(Resolution {
                target: persisted.clone(),
                queue: carried_queue.to_vec(),
                persist_target: None,
            });
        }
    }

    // Fall back to the first agent participant that is not the sender.
    let first_agent = thread
        .participants
        .iter()
        .find(|p| p.as_str() != sender_id && deps.agents.is_agent(p))?;
    Some(Resolution {
        target: first_agent.clone(),
        queue: Vec::new(),
        persist_target: Some((sender_id.to_string(), first_agent.clone())),
    })
}

fn persisted_target_of(thread: &Thread, agent_id: &str, agent_name: &str) -> Option<String> {
    thread
        .metadata
        .participant_targets
        .get(agent_id)
        .or_else(|| thread.metadata.participant_targets.get(agent_name))
        .cloned()
}

async fn auto_rag_context(
    deps: &ProcessorDeps,
    agent: &crate::agent::AgentDefinition,
    thread: &Thread,
    content: &str,
) -> Result<Option<String>, ProcessError> {
    if agent.rag.mode != RagMode::Auto || content.trim().is_empty() {
        return Ok(None);
    }
    let Some(embedder) = &deps.embedder else {
        return Ok(None);
    };
    let query = crate::embedding::truncate_for_embedding(content, deps.config.embedding.max_input_tokens);
    let vectors = embedder.embed(&[query.as_str()]).await?;
    let Some(embedding) = vectors.into_iter().next() else {
        return Ok(None);
    };
    let mut namespaces = vec![thread.namespace()];
    namespaces.extend(agent.rag.namespaces.iter().cloned());
    let hits = deps
        .graph
        .search_chunks(ChunkQuery {
            embedding,
            namespaces,
            limit: agent.rag.top_k,
            threshold: agent.rag.min_similarity,
            document_ids: None,
        })
        .await?;
    if hits.is_empty() {
        return Ok(None);
    }
    let lines: Vec<String> = hits
        .iter()
        .map(|h| {
            let title = h
                .document
                .as_ref()
                .map(|d| d.name.as_str())
                .unwrap_or("untitled");
            format!("- [{}] {}", title, h.chunk.content.replace('\n', " "))
        })
        .collect();
    Ok(Some(lines.join("\n")))
}

fn assemble_system_prompt(
    agent: &crate::agent::AgentDefinition,
    thread: &Thread,
    memory: Option<String>,
    rag_context: Option<String>,
) -> String {
    let mut sections: Vec<String> = Vec::new();

    let mut identity = format!("You are {}.", agent.name);
    if let Some(description) = &agent.description {
        identity.push(' ');
        identity.push_str(description);
    }
    sections.push(identity);
    if let Some(instructions) = &agent.instructions {
        sections.push(instructions.clone());
    }

    let roster: Vec<String> = thread
        .participants
        .iter()
        .map(|p| {
            if p == &agent.id || p == &agent.name {
                format!("{p} (you)")
            } else {
                p.clone()
            }
        })
        .collect();
    sections.push(format!(
        "Conversation: {} with participants: {}.\n\
         Address a specific participant with @name. Without a mention your reply goes \
         back to whoever you are currently speaking with.",
        thread.name,
        roster.join(", ")
    ));

    if let Some(user_external_id) = &thread.metadata.user_external_id {
        sections.push(format!("User external id: {user_external_id}."));
    }
    if let Some(user_context) = &thread.metadata.user_context {
        sections.push(format!("User context: {user_context}"));
    }
    if let Some(memory) = memory {
        if !memory.trim().is_empty() {
            sections.push(format!("Your persistent memory:\n{memory}"));
        }
    }
    if let Some(rag) = rag_context {
        sections.push(format!("Relevant knowledge:\n{rag}"));
    }
    sections.push(format!(
        "Current date: {}.",
        chrono::Utc::now().format("%Y-%m-%d")
    ));
    sections.join("\n\n")
}
