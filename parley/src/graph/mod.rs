//! Knowledge graph: namespaced nodes + edges with vector search.
//!
//! The graph is the single substrate behind conversation persistence (message and
//! participant nodes), RAG retrieval (chunk and document nodes), and entity memory
//! (concept nodes). Nodes from different namespaces never mix in queries; retrieval
//! always takes an explicit namespace list.

mod sqlite;

pub use sqlite::SqliteGraphStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::db::StoreError;

/// Edge kinds that encode storage structure rather than meaning; BFS over related nodes
/// skips them.
pub const STRUCTURAL_EDGE_KINDS: &[&str] = &["NEXT_CHUNK", "HAS_CHUNK", "SENT_BY"];

/// One graph node.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: String,
    pub namespace: String,
    /// Type string: `chunk`, `entity`, `concept`, `message`, `participant`, `document`, ...
    pub kind: String,
    pub name: String,
    pub content: String,
    /// `None` means "not searchable"; such nodes never appear in vector results.
    pub embedding: Option<Vec<f32>>,
    pub data: Value,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for node creation.
#[derive(Clone, Debug)]
pub struct NodeDraft {
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub data: Value,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
}

impl NodeDraft {
    pub fn new(namespace: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            name: name.into(),
            content: String::new(),
            embedding: None,
            data: Value::Object(Default::default()),
            source_type: None,
            source_id: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_source(mut self, source_type: impl Into<String>, source_id: impl Into<String>) -> Self {
        self.source_type = Some(source_type.into());
        self.source_id = Some(source_id.into());
        self
    }
}

/// Partial node update. Namespace, kind, and source backrefs are immutable by
/// construction: the patch has no fields for them.
#[derive(Clone, Debug, Default)]
pub struct NodePatch {
    pub name: Option<String>,
    pub content: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub data: Option<Value>,
}

/// One graph edge. Immutable once created; recreating an existing
/// (source, target, kind) triple is a no-op.
#[derive(Clone, Debug)]
pub struct Edge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    /// Type string: `NEXT_CHUNK`, `MENTIONS`, `RELATED_TO`, `HAS_CHUNK`, `SENT_BY`, ...
    pub kind: String,
    pub data: Value,
    pub weight: Option<f64>,
    pub created_at: i64,
}

/// Input for edge creation.
#[derive(Clone, Debug)]
pub struct EdgeDraft {
    pub source_id: String,
    pub target_id: String,
    pub kind: String,
    pub data: Value,
    pub weight: Option<f64>,
}

impl EdgeDraft {
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            kind: kind.into(),
            data: Value::Object(Default::default()),
            weight: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Direction for edge lookups relative to a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeDirection {
    In,
    Out,
    Both,
}

/// Vector search over nodes.
#[derive(Clone, Debug)]
pub struct NodeQuery {
    pub embedding: Vec<f32>,
    pub namespaces: Vec<String>,
    /// Restrict to these node kinds; `None` searches all kinds.
    pub node_kinds: Option<Vec<String>>,
    pub limit: usize,
    pub min_similarity: f64,
}

/// A vector search hit.
#[derive(Clone, Debug)]
pub struct ScoredNode {
    pub node: Node,
    /// `1 - cosine_distance`, in [-1, 1].
    pub similarity: f64,
}

/// Vector search over chunk nodes, joined with their parent document node.
#[derive(Clone, Debug)]
pub struct ChunkQuery {
    pub embedding: Vec<f32>,
    pub namespaces: Vec<String>,
    pub limit: usize,
    pub threshold: f64,
    /// Restrict to chunks of these document node source ids.
    pub document_ids: Option<Vec<String>>,
}

/// One chunk hit with its parent document node when linked.
#[derive(Clone, Debug)]
pub struct ChunkHit {
    pub chunk: Node,
    pub document: Option<Node>,
    pub similarity: f64,
}

/// Persistent storage of nodes and edges plus vector search. All operations are
/// transactional; deleting a node cascades its incident edges.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn create_node(&self, draft: NodeDraft) -> Result<Node, StoreError>;

    /// Applies a partial update and returns the full node.
    async fn update_node(&self, id: &str, patch: NodePatch) -> Result<Node, StoreError>;

    async fn get_node(&self, id: &str) -> Result<Option<Node>, StoreError>;

    async fn nodes_in_namespace(
        &self,
        namespace: &str,
        kind: Option<&str>,
    ) -> Result<Vec<Node>, StoreError>;

    /// Deletes every node created from `(source_type, source_id)`, cascading edges.
    /// Returns the number of nodes removed.
    async fn delete_nodes_by_source(
        &self,
        source_type: &str,
        source_id: &str,
    ) -> Result<usize, StoreError>;

    async fn create_edge(&self, draft: EdgeDraft) -> Result<Edge, StoreError>;

    async fn edges_for_node(
        &self,
        node_id: &str,
        direction: EdgeDirection,
        kinds: Option<&[String]>,
    ) -> Result<Vec<Edge>, StoreError>;

    async fn delete_edges_for_node(&self, node_id: &str) -> Result<usize, StoreError>;

    /// KNN search ordered by similarity descending, ties broken by insertion order
    /// (older first). Nodes without embeddings never match.
    async fn search_nodes(&self, query: NodeQuery) -> Result<Vec<ScoredNode>, StoreError>;

    /// KNN search over `chunk` nodes joined with their parent `document` node.
    async fn search_chunks(&self, query: ChunkQuery) -> Result<Vec<ChunkHit>, StoreError>;

    /// BFS out to `depth` over non-structural edges, excluding the start node.
    async fn find_related_nodes(&self, node_id: &str, depth: usize) -> Result<Vec<Node>, StoreError>;

    /// Distinct namespaces present in the store, sorted.
    async fn namespaces(&self) -> Result<Vec<String>, StoreError>;
}
