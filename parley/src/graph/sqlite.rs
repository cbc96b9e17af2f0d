//! SQLite + sqlite-vec implementation of [`GraphStore`].
//!
//! Dual-table design: `nodes` holds metadata and content, the `node_vectors` vec0 virtual
//! table holds embeddings keyed by the node rowid. KNN queries over-fetch and filter by
//! namespace/kind afterwards, because vec0 MATCH cannot carry relational predicates.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::db::{classify, Db, StoreError};
use crate::graph::{
    ChunkHit, ChunkQuery, Edge, EdgeDirection, EdgeDraft, GraphStore, Node, NodeDraft, NodePatch,
    NodeQuery, ScoredNode, STRUCTURAL_EDGE_KINDS,
};
use crate::ids;

/// Formats a vector as JSON text for sqlite-vec (e.g. `[0.1,0.2]`).
fn vector_to_json(v: &[f32]) -> String {
    let parts: Vec<String> = v.iter().map(|f| f.to_string()).collect();
    format!("[{}]", parts.join(","))
}

pub struct SqliteGraphStore {
    db: Db,
    dimension: usize,
}

impl SqliteGraphStore {
    /// Creates the store, ensuring the vec0 table exists with the configured dimension.
    /// Cosine distance is declared on the table so similarity is `1 - distance`.
    pub async fn new(db: Db, dimension: usize) -> Result<Self, StoreError> {
        let create_sql = format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS node_vectors \
             USING vec0(embedding float[{dimension}] distance_metric=cosine)"
        );
        db.run(move |conn| {
            conn.execute(&create_sql, []).map_err(classify)?;
            Ok(())
        })
        .await?;
        Ok(Self { db, dimension })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<(), StoreError> {
        if embedding.len() != self.dimension {
            return Err(StoreError::InvalidInput(format!(
                "embedding dimension {} != expected {}",
                embedding.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    /// Raw KNN over the vector table: `(rid, distance)` pairs, nearest first.
    async fn knn(&self, embedding: Vec<f32>, k: usize) -> Result<Vec<(i64, f64)>, StoreError> {
        self.check_dimension(&embedding)?;
        let vec_json = vector_to_json(&embedding);
        self.db
            .run(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT rowid, distance FROM node_vectors WHERE embedding MATCH ?1 AND k = ?2",
                    )
                    .map_err(classify)?;
                let rows = stmt
                    .query_map(params![vec_json, k as i64], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
                    })
                    .map_err(classify)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(classify)
            })
            .await
    }

    /// Fetches nodes (with their rids) for a rid list, preserving no particular order.
    async fn nodes_by_rids(&self, rids: Vec<i64>) -> Result<Vec<(i64, Node)>, StoreError> {
        if rids.is_empty() {
            return Ok(Vec::new());
        }
        let rid_json = serde_json::to_string(&rids)?;
        self.db
            .run(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT rid, {NODE_COLUMNS} FROM nodes \
                         WHERE rid IN (SELECT value FROM json_each(?1))"
                    ))
                    .map_err(classify)?;
                let rows = stmt
                    .query_map(params![rid_json], |row| {
                        Ok((row.get::<_, i64>(0)?, row_to_node_offset(row, 1)?))
                    })
                    .map_err(classify)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(classify)
            })
            .await
    }
}

const NODE_COLUMNS: &str = "id, namespace, kind, name, content, data, source_type, source_id, \
                            created_at, updated_at";

fn row_to_node_offset(row: &rusqlite::Row<'_>, base: usize) -> rusqlite::Result<Node> {
    let data: String = row.get(base + 5)?;
    Ok(Node {
        id: row.get(base)?,
        namespace: row.get(base + 1)?,
        kind: row.get(base + 2)?,
        name: row.get(base + 3)?,
        content: row.get(base + 4)?,
        embedding: None,
        data: serde_json::from_str(&data).unwrap_or(Value::Null),
        source_type: row.get(base + 6)?,
        source_id: row.get(base + 7)?,
        created_at: row.get(base + 8)?,
        updated_at: row.get(base + 9)?,
    })
}

fn read_node(conn: &Connection, id: &str) -> Result<Option<Node>, StoreError> {
    conn.query_row(
        &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"),
        params![id],
        |row| row_to_node_offset(row, 0),
    )
    .optional()
    .map_err(classify)
}

fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<Edge> {
    let data: String = row.get(4)?;
    Ok(Edge {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        kind: row.get(3)?,
        data: serde_json::from_str(&data).unwrap_or(Value::Null),
        weight: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const EDGE_COLUMNS: &str = "id, source_id, target_id, kind, data, weight, created_at";

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn create_node(&self, draft: NodeDraft) -> Result<Node, StoreError> {
        if let Some(ref embedding) = draft.embedding {
            self.check_dimension(embedding)?;
        }
        let id = ids::new_id();
        let now = ids::now_millis();
        let data = serde_json::to_string(&draft.data)?;
        let vec_json = draft.embedding.as_ref().map(|e| vector_to_json(e));
        let node = Node {
            id: id.clone(),
            namespace: draft.namespace.clone(),
            kind: draft.kind.clone(),
            name: draft.name.clone(),
            content: draft.content.clone(),
            embedding: draft.embedding.clone(),
            data: draft.data,
            source_type: draft.source_type.clone(),
            source_id: draft.source_id.clone(),
            created_at: now,
            updated_at: now,
        };
        self.db
            .run(move |conn| {
                let tx = conn.transaction().map_err(classify)?;
                tx.execute(
                    "INSERT INTO nodes (id, namespace, kind, name, content, data, source_type, \
                     source_id, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                    params![
                        id,
                        draft.namespace,
                        draft.kind,
                        draft.name,
                        draft.content,
                        data,
                        draft.source_type,
                        draft.source_id,
                        now,
                    ],
                )
                .map_err(classify)?;
                if let Some(vec_json) = vec_json {
                    let rid = tx.last_insert_rowid();
                    tx.execute(
                        "INSERT INTO node_vectors (rowid, embedding) VALUES (?1, ?2)",
                        params![rid, vec_json],
                    )
                    .map_err(classify)?;
                }
                tx.commit().map_err(classify)?;
                Ok(())
            })
            .await?;
        Ok(node)
    }

    async fn update_node(&self, id: &str, patch: NodePatch) -> Result<Node, StoreError> {
        if let Some(ref embedding) = patch.embedding {
            self.check_dimension(embedding)?;
        }
        let id = id.to_string();
        let now = ids::now_millis();
        let data = match &patch.data {
            Some(d) => Some(serde_json::to_string(d)?),
            None => None,
        };
        let vec_json = patch.embedding.as_ref().map(|e| vector_to_json(e));
        self.db
            .run(move |conn| {
                let tx = conn.transaction().map_err(classify)?;
                let rid: i64 = tx
                    .query_row(
                        "SELECT rid FROM nodes WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(classify)?
                    .ok_or_else(|| StoreError::NotFound(format!("node {id}")))?;
                if let Some(name) = &patch.name {
                    tx.execute(
                        "UPDATE nodes SET name = ?1 WHERE rid = ?2",
                        params![name, rid],
                    )
                    .map_err(classify)?;
                }
                if let Some(content) = &patch.content {
                    tx.execute(
                        "UPDATE nodes SET content = ?1 WHERE rid = ?2",
                        params![content, rid],
                    )
                    .map_err(classify)?;
                }
                if let Some(data) = &data {
                    tx.execute(
                        "UPDATE nodes SET data = ?1 WHERE rid = ?2",
                        params![data, rid],
                    )
                    .map_err(classify)?;
                }
                if let Some(vec_json) = &vec_json {
                    tx.execute("DELETE FROM node_vectors WHERE rowid = ?1", params![rid])
                        .map_err(classify)?;
                    tx.execute(
                        "INSERT INTO node_vectors (rowid, embedding) VALUES (?1, ?2)",
                        params![rid, vec_json],
                    )
                    .map_err(classify)?;
                }
                tx.execute(
                    "UPDATE nodes SET updated_at = ?1 WHERE rid = ?2",
                    params![now, rid],
                )
                .map_err(classify)?;
                tx.commit().map_err(classify)?;
                let node = read_node(conn, &id)?
                    .ok_or_else(|| StoreError::NotFound(format!("node {id}")))?;
                Ok(node)
            })
            .await
    }

    async fn get_node(&self, id: &str) -> Result<Option<Node>, StoreError> {
        let id = id.to_string();
        self.db.run(move |conn| read_node(conn, &id)).await
    }

    async fn nodes_in_namespace(
        &self,
        namespace: &str,
        kind: Option<&str>,
    ) -> Result<Vec<Node>, StoreError> {
        let namespace = namespace.to_string();
        let kind = kind.map(String::from);
        self.db
            .run(move |conn| match kind {
                Some(kind) => {
                    let mut stmt = conn
                        .prepare(&format!(
                            "SELECT {NODE_COLUMNS} FROM nodes \
                             WHERE namespace = ?1 AND kind = ?2 ORDER BY rid ASC"
                        ))
                        .map_err(classify)?;
                    let rows = stmt
                        .query_map(params![namespace, kind], |row| row_to_node_offset(row, 0))
                        .map_err(classify)?;
                    rows.collect::<Result<Vec<_>, _>>().map_err(classify)
                }
                None => {
                    let mut stmt = conn
                        .prepare(&format!(
                            "SELECT {NODE_COLUMNS} FROM nodes WHERE namespace = ?1 ORDER BY rid ASC"
                        ))
                        .map_err(classify)?;
                    let rows = stmt
                        .query_map(params![namespace], |row| row_to_node_offset(row, 0))
                        .map_err(classify)?;
                    rows.collect::<Result<Vec<_>, _>>().map_err(classify)
                }
            })
            .await
    }

    async fn delete_nodes_by_source(
        &self,
        source_type: &str,
        source_id: &str,
    ) -> Result<usize, StoreError> {
        let source_type = source_type.to_string();
        let source_id = source_id.to_string();
        self.db
            .run(move |conn| {
                let tx = conn.transaction().map_err(classify)?;
                let mut stmt = tx
                    .prepare("SELECT rid, id FROM nodes WHERE source_type = ?1 AND source_id = ?2")
                    .map_err(classify)?;
                let doomed: Vec<(i64, String)> = stmt
                    .query_map(params![source_type, source_id], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })
                    .map_err(classify)?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(classify)?;
                drop(stmt);
                for (rid, node_id) in &doomed {
                    tx.execute(
                        "DELETE FROM edges WHERE source_id = ?1 OR target_id = ?1",
                        params![node_id],
                    )
                    .map_err(classify)?;
                    tx.execute("DELETE FROM node_vectors WHERE rowid = ?1", params![rid])
                        .map_err(classify)?;
                    tx.execute("DELETE FROM nodes WHERE rid = ?1", params![rid])
                        .map_err(classify)?;
                }
                tx.commit().map_err(classify)?;
                Ok(doomed.len())
            })
            .await
    }

    async fn create_edge(&self, draft: EdgeDraft) -> Result<Edge, StoreError> {
        let id = ids::new_id();
        let now = ids::now_millis();
        let data = serde_json::to_string(&draft.data)?;
        self.db
            .run(move |conn| {
                let endpoints: i64 = conn
                    .query_row(
                        "SELECT COUNT(*) FROM nodes WHERE id IN (?1, ?2)",
                        params![draft.source_id, draft.target_id],
                        |row| row.get(0),
                    )
                    .map_err(classify)?;
                let distinct = draft.source_id != draft.target_id;
                let expected = if distinct { 2 } else { 1 };
                if endpoints < expected {
                    return Err(StoreError::Constraint(format!(
                        "edge endpoints must exist: {} -> {}",
                        draft.source_id, draft.target_id
                    )));
                }
                // UNIQUE(source, target, kind) ON CONFLICT IGNORE makes re-creation a no-op.
                conn.execute(
                    "INSERT INTO edges (id, source_id, target_id, kind, data, weight, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        id,
                        draft.source_id,
                        draft.target_id,
                        draft.kind,
                        data,
                        draft.weight,
                        now
                    ],
                )
                .map_err(classify)?;
                conn.query_row(
                    &format!(
                        "SELECT {EDGE_COLUMNS} FROM edges \
                         WHERE source_id = ?1 AND target_id = ?2 AND kind = ?3"
                    ),
                    params![draft.source_id, draft.target_id, draft.kind],
                    row_to_edge,
                )
                .map_err(classify)
            })
            .await
    }

    async fn edges_for_node(
        &self,
        node_id: &str,
        direction: EdgeDirection,
        kinds: Option<&[String]>,
    ) -> Result<Vec<Edge>, StoreError> {
        let node_id = node_id.to_string();
        let kinds = kinds.map(|k| k.to_vec());
        self.db
            .run(move |conn| {
                let clause = match direction {
                    EdgeDirection::In => "target_id = ?1",
                    EdgeDirection::Out => "source_id = ?1",
                    EdgeDirection::Both => "(source_id = ?1 OR target_id = ?1)",
                };
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {EDGE_COLUMNS} FROM edges WHERE {clause} ORDER BY created_at ASC"
                    ))
                    .map_err(classify)?;
                let mut edges: Vec<Edge> = stmt
                    .query_map(params![node_id], row_to_edge)
                    .map_err(classify)?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(classify)?;
                if let Some(kinds) = kinds {
                    edges.retain(|e| kinds.iter().any(|k| k == &e.kind));
                }
                Ok(edges)
            })
            .await
    }

    async fn delete_edges_for_node(&self, node_id: &str) -> Result<usize, StoreError> {
        let node_id = node_id.to_string();
        self.db
            .run(move |conn| {
                conn.execute(
                    "DELETE FROM edges WHERE source_id = ?1 OR target_id = ?1",
                    params![node_id],
                )
                .map_err(classify)
            })
            .await
    }

    async fn search_nodes(&self, query: NodeQuery) -> Result<Vec<ScoredNode>, StoreError> {
        if query.namespaces.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }
        // Over-fetch: namespace and kind filters run after the KNN pass.
        let k = (query.limit * 4).max(64);
        let hits = self.knn(query.embedding.clone(), k).await?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }
        let distances: std::collections::HashMap<i64, f64> = hits.iter().cloned().collect();
        let rids: Vec<i64> = hits.iter().map(|(rid, _)| *rid).collect();
        let nodes = self.nodes_by_rids(rids).await?;

        let mut scored: Vec<(i64, ScoredNode)> = nodes
            .into_iter()
            .filter(|(_, node)| query.namespaces.iter().any(|ns| ns == &node.namespace))
            .filter(|(_, node)| match &query.node_kinds {
                Some(kinds) => kinds.iter().any(|k| k == &node.kind),
                None => true,
            })
            .filter_map(|(rid, node)| {
                let similarity = 1.0 - distances.get(&rid).copied()?;
                (similarity >= query.min_similarity).then_some((rid, ScoredNode { node, similarity }))
            })
            .collect();
        scored.sort_by(|(rid_a, a), (rid_b, b)| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(rid_a.cmp(rid_b))
        });
        Ok(scored
            .into_iter()
            .map(|(_, s)| s)
            .take(query.limit)
            .collect())
    }

    async fn search_chunks(&self, query: ChunkQuery) -> Result<Vec<ChunkHit>, StoreError> {
        let chunks = self
            .search_nodes(NodeQuery {
                embedding: query.embedding,
                namespaces: query.namespaces,
                node_kinds: Some(vec!["chunk".to_string()]),
                limit: query.limit,
                min_similarity: query.threshold,
            })
            .await?;
        let mut hits = Vec::with_capacity(chunks.len());
        for scored in chunks {
            if let Some(ids) = &query.document_ids {
                let doc_id = scored
                    .node
                    .data
                    .get("documentId")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                if !ids.iter().any(|d| d == doc_id) {
                    continue;
                }
            }
            let parents = self
                .edges_for_node(
                    &scored.node.id,
                    EdgeDirection::In,
                    Some(&["HAS_CHUNK".to_string()]),
                )
                .await?;
            let document = match parents.first() {
                Some(edge) => self.get_node(&edge.source_id).await?,
                None => None,
            };
            hits.push(ChunkHit {
                chunk: scored.node,
                document,
                similarity: scored.similarity,
            });
        }
        Ok(hits)
    }

    async fn find_related_nodes(
        &self,
        node_id: &str,
        depth: usize,
    ) -> Result<Vec<Node>, StoreError> {
        let mut visited: std::collections::HashSet<String> =
            std::collections::HashSet::from([node_id.to_string()]);
        let mut frontier = vec![node_id.to_string()];
        let mut found: Vec<String> = Vec::new();
        for _ in 0..depth {
            let mut next = Vec::new();
            for current in &frontier {
                let edges = self
                    .edges_for_node(current, EdgeDirection::Both, None)
                    .await?;
                for edge in edges {
                    if STRUCTURAL_EDGE_KINDS.contains(&edge.kind.as_str()) {
                        continue;
                    }
                    let neighbor = if edge.source_id == *current {
                        edge.target_id
                    } else {
                        edge.source_id
                    };
                    if visited.insert(neighbor.clone()) {
                        found.push(neighbor.clone());
                        next.push(neighbor);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        let mut nodes = Vec::with_capacity(found.len());
        for id in found {
            if let Some(node) = self.get_node(&id).await? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    async fn namespaces(&self) -> Result<Vec<String>, StoreError> {
        self.db
            .run(|conn| {
                let mut stmt = conn
                    .prepare("SELECT DISTINCT namespace FROM nodes ORDER BY namespace")
                    .map_err(classify)?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(classify)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(classify)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, SqliteGraphStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path().join("g.db")).unwrap();
        let store = SqliteGraphStore::new(db, 4).await.unwrap();
        (dir, store)
    }

    /// **Scenario**: a node with an embedding is findable by vector search in its
    /// namespace, and invisible from other namespaces.
    #[tokio::test]
    async fn search_respects_namespaces() {
        let (_dir, store) = store().await;
        store
            .create_node(
                NodeDraft::new("thread:a", "chunk", "c1")
                    .with_content("alpha")
                    .with_embedding(vec![1.0, 0.0, 0.0, 0.0]),
            )
            .await
            .unwrap();

        let hits = store
            .search_nodes(NodeQuery {
                embedding: vec![1.0, 0.0, 0.0, 0.0],
                namespaces: vec!["thread:a".into()],
                node_kinds: None,
                limit: 5,
                min_similarity: 0.5,
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].similarity > 0.99);

        let other = store
            .search_nodes(NodeQuery {
                embedding: vec![1.0, 0.0, 0.0, 0.0],
                namespaces: vec!["thread:b".into()],
                node_kinds: None,
                limit: 5,
                min_similarity: 0.0,
            })
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    /// **Scenario**: nodes without embeddings never error vector search; they are simply
    /// absent from results.
    #[tokio::test]
    async fn null_embedding_is_unsearchable() {
        let (_dir, store) = store().await;
        store
            .create_node(NodeDraft::new("ns", "entity", "plain").with_content("no vector"))
            .await
            .unwrap();
        let hits = store
            .search_nodes(NodeQuery {
                embedding: vec![0.5, 0.5, 0.0, 0.0],
                namespaces: vec!["ns".into()],
                node_kinds: None,
                limit: 10,
                min_similarity: -1.0,
            })
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    /// **Scenario**: recreating an existing edge is idempotent and deleting a node by
    /// source cascades its edges.
    #[tokio::test]
    async fn edges_idempotent_and_cascade() {
        let (_dir, store) = store().await;
        let a = store
            .create_node(NodeDraft::new("ns", "document", "doc").with_source("document", "d-1"))
            .await
            .unwrap();
        let b = store
            .create_node(NodeDraft::new("ns", "chunk", "c0").with_source("document", "d-1"))
            .await
            .unwrap();
        let e1 = store
            .create_edge(EdgeDraft::new(&a.id, &b.id, "HAS_CHUNK"))
            .await
            .unwrap();
        let e2 = store
            .create_edge(EdgeDraft::new(&a.id, &b.id, "HAS_CHUNK"))
            .await
            .unwrap();
        assert_eq!(e1.id, e2.id);

        let removed = store.delete_nodes_by_source("document", "d-1").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.get_node(&a.id).await.unwrap().is_none());
        let edges = store
            .edges_for_node(&a.id, EdgeDirection::Both, None)
            .await
            .unwrap();
        assert!(edges.is_empty());
    }

    /// **Scenario**: an edge to a missing node is rejected as a constraint violation.
    #[tokio::test]
    async fn edge_requires_existing_endpoints() {
        let (_dir, store) = store().await;
        let a = store
            .create_node(NodeDraft::new("ns", "entity", "a"))
            .await
            .unwrap();
        let err = store
            .create_edge(EdgeDraft::new(&a.id, "missing-node", "RELATED_TO"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    /// **Scenario**: BFS over related nodes follows semantic edges but not structural
    /// ones, out to the requested depth.
    #[tokio::test]
    async fn find_related_skips_structural_edges() {
        let (_dir, store) = store().await;
        let msg = store
            .create_node(NodeDraft::new("ns", "message", "m"))
            .await
            .unwrap();
        let ent = store
            .create_node(NodeDraft::new("ns", "concept", "rust"))
            .await
            .unwrap();
        let far = store
            .create_node(NodeDraft::new("ns", "concept", "tokio"))
            .await
            .unwrap();
        let chunk = store
            .create_node(NodeDraft::new("ns", "chunk", "c"))
            .await
            .unwrap();
        store
            .create_edge(EdgeDraft::new(&msg.id, &ent.id, "MENTIONS"))
            .await
            .unwrap();
        store
            .create_edge(EdgeDraft::new(&ent.id, &far.id, "RELATED_TO"))
            .await
            .unwrap();
        store
            .create_edge(EdgeDraft::new(&msg.id, &chunk.id, "NEXT_CHUNK"))
            .await
            .unwrap();

        let depth1 = store.find_related_nodes(&msg.id, 1).await.unwrap();
        assert_eq!(depth1.len(), 1);
        assert_eq!(depth1[0].id, ent.id);

        let depth2 = store.find_related_nodes(&msg.id, 2).await.unwrap();
        let ids: Vec<&str> = depth2.iter().map(|n| n.id.as_str()).collect();
        assert!(ids.contains(&ent.id.as_str()) && ids.contains(&far.id.as_str()));
        assert!(!ids.contains(&chunk.id.as_str()));
    }

    /// **Scenario**: update_node cannot change namespace or kind (no such patch fields)
    /// and bumps updated_at.
    #[tokio::test]
    async fn update_node_patches_content() {
        let (_dir, store) = store().await;
        let node = store
            .create_node(NodeDraft::new("ns", "participant", "helper"))
            .await
            .unwrap();
        let updated = store
            .update_node(
                &node.id,
                NodePatch {
                    data: Some(serde_json::json!({"metadata": {"memory": "likes rust"}})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.namespace, "ns");
        assert_eq!(updated.kind, "participant");
        assert_eq!(updated.data["metadata"]["memory"], "likes rust");
    }
}
