//! Built-in tools: knowledge search and ingest, agent memory, HTTP, file I/O, clock,
//! and thread creation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::event::{Event, EventPayload, IngestDocumentPayload};
use crate::graph::{NodePatch, NodeQuery};
use crate::tools::{Tool, ToolContext, ToolError, ToolOutput, ToolRegistry, ToolSpec};

pub const TOOL_SEARCH_KNOWLEDGE: &str = "search_knowledge";
pub const TOOL_INGEST_DOCUMENT: &str = "ingest_document";
pub const TOOL_LIST_NAMESPACES: &str = "list_namespaces";
pub const TOOL_UPDATE_MY_MEMORY: &str = "update_my_memory";
pub const TOOL_HTTP_REQUEST: &str = "http_request";
pub const TOOL_READ_FILE: &str = "read_file";
pub const TOOL_WRITE_FILE: &str = "write_file";
pub const TOOL_CURRENT_TIME: &str = "current_time";
pub const TOOL_WAIT: &str = "wait";
pub const TOOL_CREATE_THREAD: &str = "create_thread";

/// Registry with every built-in tool registered.
pub fn builtin_registry() -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(SearchKnowledgeTool));
    registry.register(Arc::new(IngestDocumentTool));
    registry.register(Arc::new(ListNamespacesTool));
    registry.register(Arc::new(UpdateMyMemoryTool));
    registry.register(Arc::new(HttpRequestTool::new()));
    registry.register(Arc::new(ReadFileTool));
    registry.register(Arc::new(WriteFileTool));
    registry.register(Arc::new(CurrentTimeTool));
    registry.register(Arc::new(WaitTool));
    registry.register(Arc::new(CreateThreadTool));
    registry
}

fn str_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(String::from)
}

/// Semantic search over the knowledge graph: chunks first, then any node kind.
pub struct SearchKnowledgeTool;

#[async_trait]
impl Tool for SearchKnowledgeTool {
    fn name(&self) -> &str {
        TOOL_SEARCH_KNOWLEDGE
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_SEARCH_KNOWLEDGE.to_string(),
            description: Some(
                "Search the knowledge graph for content relevant to a query. Returns the \
                 best-matching chunks and notes with similarity scores."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "What to look for"},
                    "namespaces": {"type": "array", "items": {"type": "string"},
                                   "description": "Namespaces to search (default: this thread and global)"},
                    "limit": {"type": "integer", "description": "Max results (default 5)"},
                    "minSimilarity": {"type": "number", "description": "Similarity floor (default 0.3)"}
                },
                "required": ["query"]
            }),
            output_schema: None,
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let query = str_arg(&args, "query")
            .ok_or_else(|| ToolError::InvalidArguments("query is required".into()))?;
        let embedder = ctx
            .embedder
            .as_ref()
            .ok_or_else(|| ToolError::Execution("embedding is not configured".into()))?;
        let namespaces: Vec<String> = args
            .get("namespaces")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_else(|| vec![ctx.namespace.clone(), "global".to_string()]);
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(5) as usize;
        let min_similarity = args
            .get("minSimilarity")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.3);

        let vectors = embedder
            .embed(&[query.as_str()])
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        let embedding = vectors
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::Execution("embedder returned no vector".into()))?;

        let chunks = ctx
            .graph
            .search_chunks(crate::graph::ChunkQuery {
                embedding: embedding.clone(),
                namespaces: namespaces.clone(),
                limit,
                threshold: min_similarity,
                document_ids: None,
            })
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        let mut lines = Vec::new();
        let mut data = Vec::new();
        for hit in &chunks {
            let title = hit
                .document
                .as_ref()
                .map(|d| d.name.as_str())
                .unwrap_or("untitled");
            lines.push(format!(
                "{:.2} [{}] {}",
                hit.similarity,
                title,
                snippet(&hit.chunk.content)
            ));
            data.push(json!({
                "nodeId": hit.chunk.id,
                "similarity": hit.similarity,
                "title": title,
            }));
        }

        if lines.is_empty() {
            // Fall back to non-chunk knowledge (concepts, entities, memories).
            let nodes = ctx
                .graph
                .search_nodes(NodeQuery {
                    embedding,
                    namespaces,
                    node_kinds: None,
                    limit,
                    min_similarity,
                })
                .await
                .map_err(|e| ToolError::Execution(e.to_string()))?;
            for hit in &nodes {
                lines.push(format!(
                    "{:.2} [{}/{}] {}",
                    hit.similarity,
                    hit.node.kind,
                    hit.node.name,
                    snippet(&hit.node.content)
                ));
                data.push(json!({
                    "nodeId": hit.node.id,
                    "similarity": hit.similarity,
                    "kind": hit.node.kind,
                }));
            }
        }

        if lines.is_empty() {
            return Ok(ToolOutput::text("no matching knowledge found"));
        }
        Ok(ToolOutput {
            text: lines.join("\n"),
            data: Some(Value::Array(data)),
        })
    }
}

fn snippet(text: &str) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= 160 {
        return flattened;
    }
    let mut cut: String = flattened.chars().take(159).collect();
    cut.push('…');
    cut
}

/// Enqueues a document for the RAG ingest pipeline.
pub struct IngestDocumentTool;

#[async_trait]
impl Tool for IngestDocumentTool {
    fn name(&self) -> &str {
        TOOL_INGEST_DOCUMENT
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_INGEST_DOCUMENT.to_string(),
            description: Some(
                "Ingest a document (URL, file path, or raw text) into the knowledge graph \
                 so it becomes searchable. Runs in the background."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "source": {"type": "string", "description": "URL, file path, or raw text"},
                    "title": {"type": "string"},
                    "namespace": {"type": "string", "description": "Target namespace (default: this thread)"},
                    "forceReindex": {"type": "boolean"}
                },
                "required": ["source"]
            }),
            output_schema: None,
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let source = str_arg(&args, "source")
            .ok_or_else(|| ToolError::InvalidArguments("source is required".into()))?;
        let namespace = str_arg(&args, "namespace").unwrap_or_else(|| ctx.namespace.clone());
        let payload = IngestDocumentPayload {
            source,
            title: str_arg(&args, "title"),
            namespace,
            metadata: None,
            force_reindex: args
                .get("forceReindex")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        };
        let mut event = Event::new(ctx.thread_id.clone(), EventPayload::IngestDocument(payload));
        event.trace_id = ctx.trace_id.clone();
        event.priority = ctx.priority;
        let event_id = event.id.clone();
        ctx.queue
            .append(vec![event])
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(ToolOutput {
            text: "document ingestion enqueued".to_string(),
            data: Some(json!({"eventId": event_id})),
        })
    }
}

/// Lists namespaces present in the graph.
pub struct ListNamespacesTool;

#[async_trait]
impl Tool for ListNamespacesTool {
    fn name(&self) -> &str {
        TOOL_LIST_NAMESPACES
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_LIST_NAMESPACES.to_string(),
            description: Some("List the knowledge namespaces that currently hold data.".to_string()),
            input_schema: json!({"type": "object", "properties": {}}),
            output_schema: None,
        }
    }

    async fn call(&self, _args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let namespaces = ctx
            .graph
            .namespaces()
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        if namespaces.is_empty() {
            return Ok(ToolOutput::text("no namespaces yet"));
        }
        Ok(ToolOutput::text(namespaces.join("\n")))
    }
}

/// Rewrites the calling agent's persistent memory on its participant node.
/// The system prompt assembly reads this node fresh on every LLM call.
pub struct UpdateMyMemoryTool;

#[async_trait]
impl Tool for UpdateMyMemoryTool {
    fn name(&self) -> &str {
        TOOL_UPDATE_MY_MEMORY
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_UPDATE_MY_MEMORY.to_string(),
            description: Some(
                "Replace your persistent memory with new content. Use this to remember \
                 durable facts and preferences across conversations."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "memory": {"type": "string", "description": "The full new memory text"}
                },
                "required": ["memory"]
            }),
            output_schema: None,
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let memory = str_arg(&args, "memory")
            .ok_or_else(|| ToolError::InvalidArguments("memory is required".into()))?;
        let agent = ctx
            .agents
            .resolve(&ctx.sender_id)
            .ok_or_else(|| ToolError::Execution(format!("no agent for {}", ctx.sender_id)))?;
        let node = crate::processor::ensure_participant_node(ctx.graph.as_ref(), agent.as_ref())
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        let mut object = match node.data.clone() {
            Value::Object(o) => o,
            _ => serde_json::Map::new(),
        };
        let metadata = object.entry("metadata").or_insert_with(|| json!({}));
        if !metadata.is_object() {
            *metadata = json!({});
        }
        metadata["memory"] = Value::String(memory);
        ctx.graph
            .update_node(
                &node.id,
                NodePatch {
                    data: Some(Value::Object(object)),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(ToolOutput::text("memory updated"))
    }
}

/// Plain HTTP request tool.
pub struct HttpRequestTool {
    http: reqwest::Client,
}

impl Default for HttpRequestTool {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRequestTool {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        TOOL_HTTP_REQUEST
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_HTTP_REQUEST.to_string(),
            description: Some("Make an HTTP request and return the response body.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string"},
                    "method": {"type": "string", "description": "GET, POST, PUT, DELETE (default GET)"},
                    "headers": {"type": "object"},
                    "body": {"type": "string"}
                },
                "required": ["url"]
            }),
            output_schema: None,
        }
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let url = str_arg(&args, "url")
            .ok_or_else(|| ToolError::InvalidArguments("url is required".into()))?;
        let method = str_arg(&args, "method").unwrap_or_else(|| "GET".to_string());
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| ToolError::InvalidArguments(format!("bad method: {method}")))?;

        let mut request = self.http.request(method, &url);
        if let Some(headers) = args.get("headers").and_then(|v| v.as_object()) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key, value);
                }
            }
        }
        if let Some(body) = str_arg(&args, "body") {
            request = request.body(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        let truncated: String = body.chars().take(8000).collect();
        Ok(ToolOutput {
            text: format!("HTTP {status}\n{truncated}"),
            data: Some(json!({"status": status})),
        })
    }
}

/// Reads a UTF-8 file.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        TOOL_READ_FILE
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_READ_FILE.to_string(),
            description: Some("Read a text file from disk.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
            output_schema: None,
        }
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let path = str_arg(&args, "path")
            .ok_or_else(|| ToolError::InvalidArguments("path is required".into()))?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::Execution(format!("read {path}: {e}")))?;
        Ok(ToolOutput::text(content))
    }
}

/// Writes a UTF-8 file, creating parent directories.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        TOOL_WRITE_FILE
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_WRITE_FILE.to_string(),
            description: Some("Write a text file to disk.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
            output_schema: None,
        }
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let path = str_arg(&args, "path")
            .ok_or_else(|| ToolError::InvalidArguments("path is required".into()))?;
        let content = str_arg(&args, "content")
            .ok_or_else(|| ToolError::InvalidArguments("content is required".into()))?;
        if let Some(parent) = std::path::Path::new(&path).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::Execution(e.to_string()))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::Execution(format!("write {path}: {e}")))?;
        Ok(ToolOutput::text(format!("wrote {path}")))
    }
}

/// Current UTC time.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        TOOL_CURRENT_TIME
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_CURRENT_TIME.to_string(),
            description: Some("Get the current UTC date and time.".to_string()),
            input_schema: json!({"type": "object", "properties": {}}),
            output_schema: None,
        }
    }

    async fn call(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::text(chrono::Utc::now().to_rfc3339()))
    }
}

/// Sleeps up to 60 seconds. Useful for polling workflows.
pub struct WaitTool;

#[async_trait]
impl Tool for WaitTool {
    fn name(&self) -> &str {
        TOOL_WAIT
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_WAIT.to_string(),
            description: Some("Wait for a number of seconds (max 60).".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {"seconds": {"type": "number"}},
                "required": ["seconds"]
            }),
            output_schema: None,
        }
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let seconds = args
            .get("seconds")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| ToolError::InvalidArguments("seconds is required".into()))?;
        let capped = seconds.clamp(0.0, 60.0);
        tokio::time::sleep(std::time::Duration::from_secs_f64(capped)).await;
        Ok(ToolOutput::text(format!("waited {capped}s")))
    }
}

/// Creates (or returns) a thread by external id.
pub struct CreateThreadTool;

#[async_trait]
impl Tool for CreateThreadTool {
    fn name(&self) -> &str {
        TOOL_CREATE_THREAD
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_CREATE_THREAD.to_string(),
            description: Some(
                "Create a new conversation thread (or fetch it if it already exists).".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "externalId": {"type": "string"},
                    "name": {"type": "string"},
                    "participants": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["externalId"]
            }),
            output_schema: None,
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let external_id = str_arg(&args, "externalId")
            .ok_or_else(|| ToolError::InvalidArguments("externalId is required".into()))?;
        let name = str_arg(&args, "name").unwrap_or_else(|| external_id.clone());
        let participants: Vec<String> = args
            .get("participants")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        let thread = ctx
            .threads
            .load_or_create_by_external_id(&external_id, &name, &participants)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(ToolOutput {
            text: format!("thread {} ready", thread.id),
            data: Some(json!({"threadId": thread.id})),
        })
    }
}
