//! Shared SQLite handle. Persistent state lives in one database file; every store opens a
//! connection per operation inside `tokio::task::spawn_blocking` so async workers never
//! block on disk I/O.
//!
//! The sqlite-vec extension is registered once per process; the graph store creates its
//! `vec0` virtual table lazily because the embedding dimension is configuration.

use std::path::{Path, PathBuf};
use std::sync::Once;

use rusqlite::Connection;
use thiserror::Error;

static SQLITE_VEC_INIT: Once = Once::new();

/// Storage error. `Storage` covers transient conditions (locked database, I/O) that the
/// queue retries by lease expiry; `Constraint` is terminal.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether a retry may succeed (connection drop, lock contention).
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Storage(_))
    }
}

/// Maps a rusqlite error onto the retryable/terminal split.
pub(crate) fn classify(e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Constraint(e.to_string())
        }
        _ => StoreError::Storage(e.to_string()),
    }
}

/// Handle to the database file. Cheap to clone; each operation opens its own connection.
#[derive(Clone)]
pub struct Db {
    path: PathBuf,
}

impl Db {
    /// Opens (creating if needed) the database at `path`, registers sqlite-vec, and
    /// bootstraps the relational schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        SQLITE_VEC_INIT.call_once(|| unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        });

        let db = Self {
            path: path.as_ref().to_path_buf(),
        };
        let conn = db.connect()?;
        bootstrap_schema(&conn)?;
        Ok(db)
    }

    /// Opens one connection with the pragmas every worker needs (WAL for concurrent
    /// readers, busy timeout for claim contention).
    pub(crate) fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path).map_err(classify)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(classify)?;
        conn.pragma_update(None, "busy_timeout", 5000_i64)
            .map_err(classify)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(classify)?;
        Ok(conn)
    }

    /// Runs `f` with a fresh connection on the blocking pool.
    pub(crate) async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.connect()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Storage(format!("blocking task failed: {e}")))?
    }
}

fn bootstrap_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS threads (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            external_id TEXT UNIQUE,
            mode TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            participants TEXT NOT NULL DEFAULT '[]',
            parent_thread_id TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            lease_holder TEXT,
            lease_expires_at INTEGER,
            summary TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            thread_id TEXT NOT NULL,
            sender_type TEXT NOT NULL,
            sender_id TEXT NOT NULL,
            sender_name TEXT,
            target_id TEXT,
            target_queue TEXT NOT NULL DEFAULT '[]',
            content TEXT NOT NULL,
            tool_calls TEXT NOT NULL DEFAULT '[]',
            tool_call_id TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, created_at);

        CREATE TABLE IF NOT EXISTS events (
            rid INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            thread_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            parent_event_id TEXT,
            trace_id TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            ttl_ms INTEGER,
            expires_at INTEGER,
            namespace TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            worker_locked_by TEXT,
            worker_lease_expires_at INTEGER,
            result TEXT,
            error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_claim
            ON events(status, kind, priority DESC, created_at ASC);
        CREATE INDEX IF NOT EXISTS idx_events_trace ON events(trace_id, status);

        CREATE TABLE IF NOT EXISTS nodes (
            rid INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            namespace TEXT NOT NULL,
            kind TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL DEFAULT '',
            data TEXT NOT NULL DEFAULT '{}',
            source_type TEXT,
            source_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_nodes_namespace ON nodes(namespace, kind);
        CREATE INDEX IF NOT EXISTS idx_nodes_source ON nodes(source_type, source_id);

        CREATE TABLE IF NOT EXISTS edges (
            id TEXT NOT NULL UNIQUE,
            source_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            data TEXT NOT NULL DEFAULT '{}',
            weight REAL,
            created_at INTEGER NOT NULL,
            UNIQUE(source_id, target_id, kind) ON CONFLICT IGNORE
        );
        CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
        CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);

        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            namespace TEXT NOT NULL,
            title TEXT,
            source_type TEXT NOT NULL,
            source_uri TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            status TEXT NOT NULL,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_documents_hash ON documents(namespace, content_hash);

        CREATE TABLE IF NOT EXISTS document_chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            start_position INTEGER NOT NULL,
            end_position INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(document_id, chunk_index) ON CONFLICT IGNORE
        );
        "#,
    )
    .map_err(classify)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: opening the same file twice is idempotent (schema bootstrap reruns).
    #[tokio::test]
    async fn open_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.db");
        let _first = Db::open(&path).unwrap();
        let second = Db::open(&path).unwrap();
        let count: i64 = second
            .run(|conn| {
                conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))
                    .map_err(classify)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
