//! Thread state: metadata, participants, and the per-thread worker lease.
//!
//! Thread metadata is the persisted half of the routing state machine: who each sender
//! last addressed, the agent-hop counter, and in-flight tool batches. All mutation goes
//! through [`ThreadStore::update_metadata`], a read-modify-write that is safe because the
//! queue serializes processing per thread.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{classify, Db, StoreError};
use crate::ids;

/// Default agent-to-agent hop cap before routing is forced back to a user.
pub const DEFAULT_MAX_AGENT_TURNS: u32 = 5;

/// Aggregation state for one in-flight tool-call batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingBatch {
    pub batch_size: usize,
    pub agent_name: String,
    pub sender_id: String,
    #[serde(default)]
    pub results: Vec<Value>,
    pub created_at: i64,
}

/// Recognized thread metadata keys; anything else is carried in `extra` untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMetadata {
    /// `senderId -> lastTargetId`: whom each participant was last speaking to.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub participant_targets: BTreeMap<String, String>,
    /// Consecutive agent-to-agent hops; reset by user messages.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub agent_turn_count: u32,
    /// Loop-prevention cap; falls back to [`DEFAULT_MAX_AGENT_TURNS`] when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_agent_turns: Option<u32>,
    /// `batchId -> aggregation state` for tool batches still collecting results.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pending_tool_batches: BTreeMap<String, PendingBatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_context: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_external_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl ThreadMetadata {
    pub fn max_agent_turns(&self) -> u32 {
        self.max_agent_turns.unwrap_or(DEFAULT_MAX_AGENT_TURNS)
    }
}

/// One conversation thread.
#[derive(Clone, Debug)]
pub struct Thread {
    pub id: String,
    pub name: String,
    pub external_id: Option<String>,
    pub mode: Option<String>,
    pub status: String,
    /// Ordered participant ids (users and agents).
    pub participants: Vec<String>,
    pub parent_thread_id: Option<String>,
    pub metadata: ThreadMetadata,
    pub lease_holder: Option<String>,
    pub lease_expires_at: Option<i64>,
    pub summary: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Thread {
    /// The node namespace scoping this conversation.
    pub fn namespace(&self) -> String {
        format!("thread:{}", self.id)
    }
}

/// SQLite-backed thread store.
#[derive(Clone)]
pub struct ThreadStore {
    db: Db,
}

impl ThreadStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Loads the thread with `external_id`, creating it when absent. Creation is
    /// idempotent under races: the UNIQUE constraint makes the loser re-read.
    pub async fn load_or_create_by_external_id(
        &self,
        external_id: &str,
        name: &str,
        participants: &[String],
    ) -> Result<Thread, StoreError> {
        let external_id = external_id.to_string();
        let name = name.to_string();
        let participants_json = serde_json::to_string(participants)?;
        let id = ids::new_id();
        let now = ids::now_millis();
        self.db
            .run(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO threads \
                     (id, name, external_id, participants, metadata, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, '{}', ?5, ?5)",
                    rusqlite::params![id, name, external_id, participants_json, now],
                )
                .map_err(classify)?;
                read_thread(conn, "external_id", &external_id)?
                    .ok_or_else(|| StoreError::NotFound(format!("thread external_id={external_id}")))
            })
            .await
    }

    pub async fn get(&self, thread_id: &str) -> Result<Option<Thread>, StoreError> {
        let thread_id = thread_id.to_string();
        self.db
            .run(move |conn| read_thread(conn, "id", &thread_id))
            .await
    }

    /// Read-modify-write of thread metadata. Must only be called while processing an
    /// event for this thread (the thread lease is the write guard).
    pub async fn update_metadata<F>(
        &self,
        thread_id: &str,
        mutate: F,
    ) -> Result<ThreadMetadata, StoreError>
    where
        F: FnOnce(&mut ThreadMetadata) + Send + 'static,
    {
        let thread_id = thread_id.to_string();
        let now = ids::now_millis();
        self.db
            .run(move |conn| {
                let raw: String = conn
                    .query_row(
                        "SELECT metadata FROM threads WHERE id = ?1",
                        rusqlite::params![thread_id],
                        |row| row.get(0),
                    )
                    .map_err(classify)?;
                let mut metadata: ThreadMetadata =
                    serde_json::from_str(&raw).unwrap_or_default();
                mutate(&mut metadata);
                let serialized = serde_json::to_string(&metadata)?;
                conn.execute(
                    "UPDATE threads SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![serialized, now, thread_id],
                )
                .map_err(classify)?;
                Ok(metadata)
            })
            .await
    }

    /// Adds a participant if not already present, preserving order.
    pub async fn append_participant(
        &self,
        thread_id: &str,
        participant: &str,
    ) -> Result<(), StoreError> {
        let thread_id = thread_id.to_string();
        let participant = participant.to_string();
        let now = ids::now_millis();
        self.db
            .run(move |conn| {
                let raw: String = conn
                    .query_row(
                        "SELECT participants FROM threads WHERE id = ?1",
                        rusqlite::params![thread_id],
                        |row| row.get(0),
                    )
                    .map_err(classify)?;
                let mut participants: Vec<String> =
                    serde_json::from_str(&raw).unwrap_or_default();
                if !participants.iter().any(|p| p == &participant) {
                    participants.push(participant);
                    let serialized = serde_json::to_string(&participants)?;
                    conn.execute(
                        "UPDATE threads SET participants = ?1, updated_at = ?2 WHERE id = ?3",
                        rusqlite::params![serialized, now, thread_id],
                    )
                    .map_err(classify)?;
                }
                Ok(())
            })
            .await
    }

    /// Persists `participantTargets[sender_id] = target_id`.
    pub async fn set_participant_target(
        &self,
        thread_id: &str,
        sender_id: &str,
        target_id: &str,
    ) -> Result<(), StoreError> {
        let sender = sender_id.to_string();
        let target = target_id.to_string();
        self.update_metadata(thread_id, move |meta| {
            meta.participant_targets.insert(sender, target);
        })
        .await
        .map(|_| ())
    }

    /// Releases the thread lease if `worker_id` still holds it.
    pub async fn release_lease(&self, thread_id: &str, worker_id: &str) -> Result<(), StoreError> {
        let thread_id = thread_id.to_string();
        let worker_id = worker_id.to_string();
        self.db
            .run(move |conn| {
                conn.execute(
                    "UPDATE threads SET lease_holder = NULL, lease_expires_at = NULL \
                     WHERE id = ?1 AND lease_holder = ?2",
                    rusqlite::params![thread_id, worker_id],
                )
                .map_err(classify)?;
                Ok(())
            })
            .await
    }
}

fn read_thread(
    conn: &rusqlite::Connection,
    column: &str,
    value: &str,
) -> Result<Option<Thread>, StoreError> {
    use rusqlite::OptionalExtension;
    // `column` is one of two internal constants, never caller input.
    let sql = format!(
        "SELECT id, name, external_id, mode, status, participants, parent_thread_id, \
         metadata, lease_holder, lease_expires_at, summary, created_at, updated_at \
         FROM threads WHERE {column} = ?1"
    );
    conn.query_row(&sql, rusqlite::params![value], |row| {
        let participants: String = row.get(5)?;
        let metadata: String = row.get(7)?;
        Ok(Thread {
            id: row.get(0)?,
            name: row.get(1)?,
            external_id: row.get(2)?,
            mode: row.get(3)?,
            status: row.get(4)?,
            participants: serde_json::from_str(&participants).unwrap_or_default(),
            parent_thread_id: row.get(6)?,
            metadata: serde_json::from_str(&metadata).unwrap_or_default(),
            lease_holder: row.get(8)?,
            lease_expires_at: row.get(9)?,
            summary: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    })
    .optional()
    .map_err(classify)
}
