//! The `INGEST_DOCUMENT` processor: fetch → normalize → hash/dedup → chunk → embed →
//! dual-write (chunk rows + chunk nodes with `NEXT_CHUNK` edges) → finalize.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::embedding::embed_batched;
use crate::event::{Event, EventPayload, IngestDocumentPayload};
use crate::graph::{EdgeDraft, NodeDraft};
use crate::ids;
use crate::processor::{
    system_message_event, ProcessError, ProcessOutcome, Processor, ProcessorDeps,
};
use crate::rag::{chunk_text, content_hash, normalize_content, ChunkRecord, DocumentStatus, IngestError};

pub struct IngestProcessor;

#[async_trait]
impl Processor for IngestProcessor {
    fn should_process(&self, event: &Event) -> bool {
        matches!(event.payload, EventPayload::IngestDocument(_))
    }

    async fn process(
        &self,
        event: &Event,
        deps: &ProcessorDeps,
    ) -> Result<ProcessOutcome, ProcessError> {
        let EventPayload::IngestDocument(payload) = &event.payload else {
            return Err(ProcessError::Invalid(
                "expected INGEST_DOCUMENT payload".into(),
            ));
        };
        match pipeline(event, deps, payload).await {
            Ok(outcome) => Ok(outcome),
            Err((document_id, err)) => {
                // Partial chunk writes stay; the next forceReindex wipes them.
                if let Some(id) = document_id {
                    deps.documents.mark_failed(&id, &err.to_string()).await?;
                }
                Err(err.into())
            }
        }
    }
}

type PipelineError = (Option<String>, IngestError);

async fn pipeline(
    event: &Event,
    deps: &ProcessorDeps,
    payload: &IngestDocumentPayload,
) -> Result<ProcessOutcome, PipelineError> {
    let namespace = payload.namespace.clone();

    // Fetch and normalize.
    let fetched = deps
        .fetcher
        .fetch(&payload.source)
        .await
        .map_err(|e| (None, e))?;
    let content = normalize_content(&fetched.content, &fetched.mime_type);
    let hash = content_hash(&content);

    // Dedup by content hash within the namespace.
    if let Some(existing) = deps
        .documents
        .find_by_hash(&namespace, &hash)
        .await
        .map_err(|e| (None, e.into()))?
    {
        if existing.status == DocumentStatus::Indexed && !payload.force_reindex {
            debug!(document = %existing.id, "identical content already indexed; skipping");
            return Ok(ProcessOutcome {
                produced: vec![system_message_event(
                    &event.thread_id,
                    &event.trace_id,
                    event.priority,
                    format!(
                        "📄 document already indexed in {namespace} ({} chunks); skipped",
                        existing.chunk_count
                    ),
                    false,
                )],
                result: json!({"documentId": existing.id, "skipped": true}),
            });
        }
        // Non-indexed leftovers (or a forced reindex) are wiped before re-ingesting.
        deps.graph
            .delete_nodes_by_source("document", &existing.id)
            .await
            .map_err(|e| (None, e.into()))?;
        deps.documents
            .delete(&existing.id)
            .await
            .map_err(|e| (None, e.into()))?;
    }

    let title = payload
        .title
        .clone()
        .unwrap_or_else(|| default_title(&content));
    let document = deps
        .documents
        .create(
            &namespace,
            Some(title.clone()),
            &fetched.source_type,
            &fetched.source_uri,
            &hash,
            payload.metadata.clone().unwrap_or(Value::Null),
        )
        .await
        .map_err(|e| (None, e.into()))?;
    let doc_id = document.id.clone();
    let fail = |e: IngestError| (Some(doc_id.clone()), e);

    // Chunk.
    let chunks = chunk_text(&content, &deps.config.chunking);
    if chunks.is_empty() {
        deps.documents
            .mark_indexed(&document.id, 0)
            .await
            .map_err(|e| fail(e.into()))?;
        return Ok(ProcessOutcome {
            produced: vec![system_message_event(
                &event.thread_id,
                &event.trace_id,
                event.priority,
                format!("📄 \"{title}\" had no indexable content"),
                false,
            )],
            result: json!({"documentId": document.id, "chunks": 0}),
        });
    }

    // Embed in batches.
    let embedder = deps
        .embedder
        .as_ref()
        .ok_or_else(|| fail(IngestError::EmbeddingNotConfigured))?;
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embed_batched(embedder, &texts, &deps.config.embedding)
        .await
        .map_err(|e| fail(e.into()))?;

    // Dual-write: a document node, chunk rows, chunk nodes, and linking edges.
    let document_node = deps
        .graph
        .create_node(
            NodeDraft::new(&namespace, "document", &title)
                .with_data(json!({
                    "documentId": document.id,
                    "sourceUri": fetched.source_uri,
                    "contentHash": hash,
                }))
                .with_source("document", &document.id),
        )
        .await
        .map_err(|e| fail(e.into()))?;

    let mut rows = Vec::with_capacity(chunks.len());
    let mut previous_node_id: Option<String> = None;
    for (chunk, vector) in chunks.iter().zip(vectors) {
        rows.push(ChunkRecord {
            id: ids::new_id(),
            document_id: document.id.clone(),
            chunk_index: chunk.index,
            content: chunk.text.clone(),
            token_count: chunk.token_count,
            start_position: chunk.start,
            end_position: chunk.end,
        });
        let node = deps
            .graph
            .create_node(
                NodeDraft::new(&namespace, "chunk", format!("{title}#{}", chunk.index))
                    .with_content(chunk.text.clone())
                    .with_embedding(vector)
                    .with_data(json!({
                        "documentId": document.id,
                        "chunkIndex": chunk.index,
                        "tokenCount": chunk.token_count,
                        "startPosition": chunk.start,
                        "endPosition": chunk.end,
                        "title": title,
                    }))
                    .with_source("document", &document.id),
            )
            .await
            .map_err(|e| fail(e.into()))?;
        deps.graph
            .create_edge(EdgeDraft::new(&document_node.id, &node.id, "HAS_CHUNK"))
            .await
            .map_err(|e| fail(e.into()))?;
        if let Some(previous) = &previous_node_id {
            deps.graph
                .create_edge(EdgeDraft::new(previous, &node.id, "NEXT_CHUNK"))
                .await
                .map_err(|e| fail(e.into()))?;
        }
        previous_node_id = Some(node.id);
    }
    deps.documents
        .insert_chunks(rows)
        .await
        .map_err(|e| fail(e.into()))?;

    deps.documents
        .mark_indexed(&document.id, chunks.len())
        .await
        .map_err(|e| fail(e.into()))?;
    info!(document = %document.id, chunks = chunks.len(), namespace = %namespace, "document indexed");

    Ok(ProcessOutcome {
        produced: vec![system_message_event(
            &event.thread_id,
            &event.trace_id,
            event.priority,
            format!("📄 indexed \"{title}\" ({} chunks) into {namespace}", chunks.len()),
            false,
        )],
        result: json!({"documentId": document.id, "chunks": chunks.len()}),
    })
}

fn default_title(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or("untitled");
    let mut title: String = first_line.chars().take(80).collect();
    if title.trim().is_empty() {
        title = "untitled".to_string();
    }
    title
}
