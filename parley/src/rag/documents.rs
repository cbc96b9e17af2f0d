//! Document and chunk rows: the relational mirror of the RAG graph nodes, used for
//! dedup-by-hash, status tracking, and stats.

use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::db::{classify, Db, StoreError};
use crate::ids;

/// Document ingest lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentStatus {
    Processing,
    Indexed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> DocumentStatus {
        match s {
            "indexed" => DocumentStatus::Indexed,
            "failed" => DocumentStatus::Failed,
            _ => DocumentStatus::Processing,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DocumentRecord {
    pub id: String,
    pub namespace: String,
    pub title: Option<String>,
    pub source_type: String,
    pub source_uri: String,
    pub content_hash: String,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    pub error: Option<String>,
    pub metadata: Value,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Clone, Debug)]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub token_count: usize,
    pub start_position: usize,
    pub end_position: usize,
}

/// SQLite-backed document + chunk store.
#[derive(Clone)]
pub struct DocumentStore {
    db: Db,
}

impl DocumentStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Finds a document by content hash within a namespace.
    pub async fn find_by_hash(
        &self,
        namespace: &str,
        content_hash: &str,
    ) -> Result<Option<DocumentRecord>, StoreError> {
        let namespace = namespace.to_string();
        let content_hash = content_hash.to_string();
        self.db
            .run(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT {DOC_COLUMNS} FROM documents \
                         WHERE namespace = ?1 AND content_hash = ?2"
                    ),
                    params![namespace, content_hash],
                    row_to_document,
                )
                .optional()
                .map_err(classify)
            })
            .await
    }

    /// Inserts a new document row in `processing` status and returns it.
    pub async fn create(
        &self,
        namespace: &str,
        title: Option<String>,
        source_type: &str,
        source_uri: &str,
        content_hash: &str,
        metadata: Value,
    ) -> Result<DocumentRecord, StoreError> {
        let record = DocumentRecord {
            id: ids::new_id(),
            namespace: namespace.to_string(),
            title,
            source_type: source_type.to_string(),
            source_uri: source_uri.to_string(),
            content_hash: content_hash.to_string(),
            status: DocumentStatus::Processing,
            chunk_count: 0,
            error: None,
            metadata,
            created_at: ids::now_millis(),
            updated_at: ids::now_millis(),
        };
        let r = record.clone();
        let metadata_json = serde_json::to_string(&r.metadata)?;
        self.db
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO documents (id, namespace, title, source_type, source_uri, \
                     content_hash, status, chunk_count, metadata, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'processing', 0, ?7, ?8, ?8)",
                    params![
                        r.id,
                        r.namespace,
                        r.title,
                        r.source_type,
                        r.source_uri,
                        r.content_hash,
                        metadata_json,
                        r.created_at
                    ],
                )
                .map_err(classify)?;
                Ok(())
            })
            .await?;
        Ok(record)
    }

    /// Marks a document `indexed` with its final chunk count.
    pub async fn mark_indexed(&self, document_id: &str, chunk_count: usize) -> Result<(), StoreError> {
        self.set_status(document_id, DocumentStatus::Indexed, chunk_count, None)
            .await
    }

    /// Marks a document `failed` with the error message.
    pub async fn mark_failed(&self, document_id: &str, error: &str) -> Result<(), StoreError> {
        self.set_status(document_id, DocumentStatus::Failed, 0, Some(error.to_string()))
            .await
    }

    async fn set_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
        chunk_count: usize,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let document_id = document_id.to_string();
        let now = ids::now_millis();
        self.db
            .run(move |conn| {
                conn.execute(
                    "UPDATE documents SET status = ?1, chunk_count = ?2, error = ?3, \
                     updated_at = ?4 WHERE id = ?5",
                    params![status.as_str(), chunk_count as i64, error, now, document_id],
                )
                .map_err(classify)?;
                Ok(())
            })
            .await
    }

    /// Deletes a document and its chunk rows (graph-side cleanup is the caller's job).
    pub async fn delete(&self, document_id: &str) -> Result<(), StoreError> {
        let document_id = document_id.to_string();
        self.db
            .run(move |conn| {
                let tx = conn.transaction().map_err(classify)?;
                tx.execute(
                    "DELETE FROM document_chunks WHERE document_id = ?1",
                    params![document_id],
                )
                .map_err(classify)?;
                tx.execute("DELETE FROM documents WHERE id = ?1", params![document_id])
                    .map_err(classify)?;
                tx.commit().map_err(classify)?;
                Ok(())
            })
            .await
    }

    /// Inserts chunk rows. `UNIQUE(document_id, chunk_index)` makes redelivery a no-op.
    pub async fn insert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let now = ids::now_millis();
        self.db
            .run(move |conn| {
                let tx = conn.transaction().map_err(classify)?;
                for c in &chunks {
                    tx.execute(
                        "INSERT INTO document_chunks (id, document_id, chunk_index, content, \
                         token_count, start_position, end_position, created_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            c.id,
                            c.document_id,
                            c.chunk_index as i64,
                            c.content,
                            c.token_count as i64,
                            c.start_position as i64,
                            c.end_position as i64,
                            now
                        ],
                    )
                    .map_err(classify)?;
                }
                tx.commit().map_err(classify)?;
                Ok(())
            })
            .await
    }

    pub async fn count_chunks(&self, document_id: &str) -> Result<usize, StoreError> {
        let document_id = document_id.to_string();
        let count: i64 = self
            .db
            .run(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM document_chunks WHERE document_id = ?1",
                    params![document_id],
                    |row| row.get(0),
                )
                .map_err(classify)
            })
            .await?;
        Ok(count as usize)
    }
}

const DOC_COLUMNS: &str = "id, namespace, title, source_type, source_uri, content_hash, status, \
                           chunk_count, error, metadata, created_at, updated_at";

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRecord> {
    let status: String = row.get(6)?;
    let chunk_count: i64 = row.get(7)?;
    let metadata: String = row.get(9)?;
    Ok(DocumentRecord {
        id: row.get(0)?,
        namespace: row.get(1)?,
        title: row.get(2)?,
        source_type: row.get(3)?,
        source_uri: row.get(4)?,
        content_hash: row.get(5)?,
        status: DocumentStatus::parse(&status),
        chunk_count: chunk_count as usize,
        error: row.get(8)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, DocumentStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path().join("d.db")).unwrap();
        (dir, DocumentStore::new(db))
    }

    /// **Scenario**: create → find_by_hash → mark_indexed round-trips status and counts.
    #[tokio::test]
    async fn lifecycle_roundtrip() {
        let (_dir, store) = store().await;
        let doc = store
            .create("demo", Some("Title".into()), "inline", "inline:demo", "abc123", Value::Null)
            .await
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Processing);

        store.mark_indexed(&doc.id, 3).await.unwrap();
        let found = store.find_by_hash("demo", "abc123").await.unwrap().unwrap();
        assert_eq!(found.status, DocumentStatus::Indexed);
        assert_eq!(found.chunk_count, 3);

        assert!(store.find_by_hash("other", "abc123").await.unwrap().is_none());
    }

    /// **Scenario**: duplicate chunk inserts are ignored, not errors.
    #[tokio::test]
    async fn chunk_insert_is_idempotent() {
        let (_dir, store) = store().await;
        let doc = store
            .create("demo", None, "inline", "inline:x", "h", Value::Null)
            .await
            .unwrap();
        let chunk = ChunkRecord {
            id: ids::new_id(),
            document_id: doc.id.clone(),
            chunk_index: 0,
            content: "text".into(),
            token_count: 1,
            start_position: 0,
            end_position: 4,
        };
        store.insert_chunks(vec![chunk.clone()]).await.unwrap();
        let mut replay = chunk.clone();
        replay.id = ids::new_id();
        store.insert_chunks(vec![replay]).await.unwrap();
        assert_eq!(store.count_chunks(&doc.id).await.unwrap(), 1);
    }
}
