//! The `ENTITY_EXTRACT` processor: pull entities out of a message with an LLM, dedup
//! them against existing graph nodes by embedding similarity, and wire `MENTIONS` and
//! `RELATED_TO` edges.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::event::{Event, EventPayload};
use crate::graph::{EdgeDraft, NodeDraft, NodePatch, NodeQuery, ScoredNode};
use crate::llm::ChatMessage;
use crate::processor::{ProcessError, ProcessOutcome, Processor, ProcessorDeps};

pub struct EntityExtractProcessor;

/// One entity candidate as the extraction LLM reports it.
#[derive(Debug, Deserialize)]
struct Candidate {
    name: String,
    #[serde(default, rename = "type")]
    entity_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[async_trait]
impl Processor for EntityExtractProcessor {
    fn should_process(&self, event: &Event) -> bool {
        matches!(event.payload, EventPayload::EntityExtract(_))
    }

    async fn process(
        &self,
        event: &Event,
        deps: &ProcessorDeps,
    ) -> Result<ProcessOutcome, ProcessError> {
        let EventPayload::EntityExtract(payload) = &event.payload else {
            return Err(ProcessError::Invalid(
                "expected ENTITY_EXTRACT payload".into(),
            ));
        };
        let Some(agent) = deps.agents.get(&payload.agent_id) else {
            return Err(ProcessError::Invalid(format!(
                "unknown agent {}",
                payload.agent_id
            )));
        };
        let Some(embedder) = &deps.embedder else {
            // Extraction without similarity search would duplicate entities endlessly.
            return Ok(ProcessOutcome::with_result(
                json!({"skipped": "no embedder"}),
            ));
        };
        let options = &agent.rag.entity_extraction;

        let candidates = extract_candidates(deps, &agent.llm, &payload.content, options.max_entities)
            .await?;
        if candidates.is_empty() {
            return Ok(ProcessOutcome::with_result(json!({"entities": 0})));
        }

        let mut resolved_ids = Vec::new();
        for candidate in candidates {
            let text = match &candidate.description {
                Some(description) => format!("{}: {description}", candidate.name),
                None => candidate.name.clone(),
            };
            let vectors = embedder.embed(&[text.as_str()]).await?;
            let Some(embedding) = vectors.into_iter().next() else {
                continue;
            };

            let matches = deps
                .graph
                .search_nodes(NodeQuery {
                    embedding: embedding.clone(),
                    namespaces: vec![payload.namespace.clone()],
                    node_kinds: Some(vec!["concept".to_string(), "entity".to_string()]),
                    limit: 5,
                    min_similarity: options.similarity_threshold,
                })
                .await?;

            let resolved = match matches.first() {
                Some(best) if best.similarity >= options.auto_merge_threshold => {
                    merge_into(deps, best, &candidate).await?
                }
                _ => {
                    deps.graph
                        .create_node(
                            NodeDraft::new(&payload.namespace, "concept", &candidate.name)
                                .with_content(candidate.description.clone().unwrap_or_default())
                                .with_embedding(embedding)
                                .with_data(json!({
                                    "entityType": candidate.entity_type,
                                    "aliases": [],
                                    "mentionCount": 1,
                                }))
                                .with_source(
                                    payload.source_type.clone().unwrap_or_else(|| "message".into()),
                                    &payload.source_node_id,
                                ),
                        )
                        .await?
                        .id
                }
            };

            deps.graph
                .create_edge(
                    EdgeDraft::new(&payload.source_node_id, &resolved, "MENTIONS")
                        .with_data(json!({"extractedName": candidate.name})),
                )
                .await?;

            // Similar-but-distinct neighbors get RELATED_TO edges with the similarity.
            for other in matches
                .iter()
                .filter(|m| m.node.id != resolved && m.similarity < options.auto_merge_threshold)
            {
                deps.graph
                    .create_edge(
                        EdgeDraft::new(&resolved, &other.node.id, "RELATED_TO")
                            .with_data(json!({"similarity": other.similarity})),
                    )
                    .await?;
            }
            resolved_ids.push(resolved);
        }

        debug!(source = %payload.source_node_id, entities = resolved_ids.len(), "entities linked");
        Ok(ProcessOutcome::with_result(json!({
            "entities": resolved_ids.len(),
            "nodeIds": resolved_ids,
        })))
    }
}

/// Merge a candidate into an existing node: push an alias, bump the mention count.
async fn merge_into(
    deps: &ProcessorDeps,
    best: &ScoredNode,
    candidate: &Candidate,
) -> Result<String, ProcessError> {
    let mut object = match best.node.data.clone() {
        Value::Object(o) => o,
        _ => serde_json::Map::new(),
    };
    let mentions = object
        .get("mentionCount")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    object.insert("mentionCount".into(), json!(mentions + 1));
    let aliases = object
        .entry("aliases")
        .or_insert_with(|| json!([]));
    if let Some(list) = aliases.as_array_mut() {
        let known = candidate.name == best.node.name
            || list.iter().any(|a| a.as_str() == Some(candidate.name.as_str()));
        if !known {
            list.push(Value::String(candidate.name.clone()));
        }
    }
    deps.graph
        .update_node(
            &best.node.id,
            NodePatch {
                data: Some(Value::Object(object)),
                ..Default::default()
            },
        )
        .await?;
    Ok(best.node.id.clone())
}

/// One non-streamed LLM call that must answer with a JSON array of entities.
async fn extract_candidates(
    deps: &ProcessorDeps,
    provider: &crate::llm::ProviderConfig,
    content: &str,
    max_entities: usize,
) -> Result<Vec<Candidate>, ProcessError> {
    let client = deps.llm.client_for(provider)?;
    let prompt = format!(
        "Extract up to {max_entities} named entities (people, places, projects, concepts) \
         from the message below. Respond with ONLY a JSON array, each element \
         {{\"name\": string, \"type\": string, \"description\": string}}. \
         Respond with [] when nothing is worth remembering.\n\nMessage:\n{content}"
    );
    let reply = client
        .invoke(&[ChatMessage::user(prompt)], &[])
        .await?;
    let mut candidates = parse_candidates(&reply.content);
    candidates.truncate(max_entities);
    Ok(candidates)
}

/// Tolerant parse: strips code fences and trailing prose around the JSON array.
fn parse_candidates(raw: &str) -> Vec<Candidate> {
    let trimmed = raw.trim();
    let without_fence = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();
    let slice = match (without_fence.find('['), without_fence.rfind(']')) {
        (Some(start), Some(end)) if start < end => &without_fence[start..=end],
        _ => return Vec::new(),
    };
    serde_json::from_str::<Vec<Candidate>>(slice)
        .unwrap_or_default()
        .into_iter()
        .filter(|c| !c.name.trim().is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: candidate parsing survives code fences, prose, and bad JSON.
    #[test]
    fn parse_candidates_tolerantly() {
        let plain = r#"[{"name": "Rust", "type": "language"}]"#;
        assert_eq!(parse_candidates(plain).len(), 1);

        let fenced = "```json\n[{\"name\": \"Tokio\"}]\n```";
        assert_eq!(parse_candidates(fenced)[0].name, "Tokio");

        let prose = "Here you go: [{\"name\": \"SQLite\", \"description\": \"db\"}] hope it helps";
        let parsed = parse_candidates(prose);
        assert_eq!(parsed[0].description.as_deref(), Some("db"));

        assert!(parse_candidates("no json here").is_empty());
        assert!(parse_candidates("[]").is_empty());
        assert!(parse_candidates("[{\"name\": \"  \"}]").is_empty());
    }
}
