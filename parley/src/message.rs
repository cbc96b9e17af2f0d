//! Message rows: the immutable chat log. Created only by the message processor when it
//! handles a `NEW_MESSAGE` event; read back by the history view.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{classify, Db, StoreError};
use crate::ids;

/// Who authored a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    Agent,
    #[default]
    User,
    Tool,
    System,
}

impl SenderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderKind::Agent => "agent",
            SenderKind::User => "user",
            SenderKind::Tool => "tool",
            SenderKind::System => "system",
        }
    }

    pub fn parse(s: &str) -> SenderKind {
        match s {
            "agent" => SenderKind::Agent,
            "tool" => SenderKind::Tool,
            "system" => SenderKind::System,
            _ => SenderKind::User,
        }
    }
}

/// A tool call attached to an agent message, in the shape the LLM emitted it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// One persisted message. Immutable after creation.
#[derive(Clone, Debug)]
pub struct StoredMessage {
    pub id: String,
    pub thread_id: String,
    pub sender_kind: SenderKind,
    pub sender_id: String,
    pub sender_name: Option<String>,
    /// Primary recipient resolved at creation, when known.
    pub target_id: Option<String>,
    /// Remaining routing stops after `target_id`.
    pub target_queue: Vec<String>,
    pub content: String,
    /// Agent-authored tool calls carried by this message.
    pub tool_calls: Vec<MessageToolCall>,
    /// Back-reference to the tool call this message answers (tool results only).
    pub tool_call_id: Option<String>,
    pub metadata: Value,
    pub created_at: i64,
}

impl StoredMessage {
    pub fn new(thread_id: impl Into<String>, sender_kind: SenderKind, sender_id: impl Into<String>) -> Self {
        Self {
            id: ids::new_id(),
            thread_id: thread_id.into(),
            sender_kind,
            sender_id: sender_id.into(),
            sender_name: None,
            target_id: None,
            target_queue: Vec::new(),
            content: String::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            metadata: Value::Object(Default::default()),
            created_at: ids::now_millis(),
        }
    }
}

/// SQLite-backed message store.
#[derive(Clone)]
pub struct MessageStore {
    db: Db,
}

impl MessageStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Inserts a message. `INSERT OR IGNORE` on the primary key makes redelivery of the
    /// same event a no-op.
    pub async fn insert(&self, message: &StoredMessage) -> Result<(), StoreError> {
        let m = message.clone();
        let tool_calls = serde_json::to_string(&m.tool_calls)?;
        let target_queue = serde_json::to_string(&m.target_queue)?;
        let metadata = serde_json::to_string(&m.metadata)?;
        self.db
            .run(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO messages \
                     (id, thread_id, sender_type, sender_id, sender_name, target_id, target_queue, \
                      content, tool_calls, tool_call_id, metadata, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    rusqlite::params![
                        m.id,
                        m.thread_id,
                        m.sender_kind.as_str(),
                        m.sender_id,
                        m.sender_name,
                        m.target_id,
                        target_queue,
                        m.content,
                        tool_calls,
                        m.tool_call_id,
                        metadata,
                        m.created_at,
                    ],
                )
                .map_err(classify)?;
                Ok(())
            })
            .await
    }

    /// All messages in a thread, oldest first.
    pub async fn list_thread(&self, thread_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let thread_id = thread_id.to_string();
        self.db
            .run(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, thread_id, sender_type, sender_id, sender_name, target_id, \
                         target_queue, content, tool_calls, tool_call_id, metadata, created_at \
                         FROM messages WHERE thread_id = ?1 ORDER BY created_at ASC, id ASC",
                    )
                    .map_err(classify)?;
                let rows = stmt
                    .query_map(rusqlite::params![thread_id], row_to_message)
                    .map_err(classify)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(classify)
            })
            .await
    }

    /// Fetch one message by id.
    pub async fn get(&self, id: &str) -> Result<Option<StoredMessage>, StoreError> {
        let id = id.to_string();
        self.db
            .run(move |conn| {
                use rusqlite::OptionalExtension;
                conn.query_row(
                    "SELECT id, thread_id, sender_type, sender_id, sender_name, target_id, \
                     target_queue, content, tool_calls, tool_call_id, metadata, created_at \
                     FROM messages WHERE id = ?1",
                    rusqlite::params![id],
                    row_to_message,
                )
                .optional()
                .map_err(classify)
            })
            .await
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let sender_type: String = row.get(2)?;
    let target_queue: String = row.get(6)?;
    let tool_calls: String = row.get(8)?;
    let metadata: String = row.get(10)?;
    Ok(StoredMessage {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        sender_kind: SenderKind::parse(&sender_type),
        sender_id: row.get(3)?,
        sender_name: row.get(4)?,
        target_id: row.get(5)?,
        target_queue: serde_json::from_str(&target_queue).unwrap_or_default(),
        content: row.get(7)?,
        tool_calls: serde_json::from_str(&tool_calls).unwrap_or_default(),
        tool_call_id: row.get(9)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
        created_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, MessageStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path().join("t.db")).unwrap();
        (dir, MessageStore::new(db))
    }

    /// **Scenario**: inserting the same message twice keeps a single row.
    #[tokio::test]
    async fn insert_is_idempotent_by_id() {
        let (_dir, store) = store().await;
        let mut msg = StoredMessage::new("th-1", SenderKind::User, "u-1");
        msg.content = "hello".to_string();
        store.insert(&msg).await.unwrap();
        store.insert(&msg).await.unwrap();
        let all = store.list_thread("th-1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content, "hello");
    }

    /// **Scenario**: listing returns messages oldest-first with tool calls round-tripped.
    #[tokio::test]
    async fn list_orders_and_roundtrips_tool_calls() {
        let (_dir, store) = store().await;
        let mut first = StoredMessage::new("th-2", SenderKind::Agent, "a-1");
        first.tool_calls = vec![MessageToolCall {
            id: "call-1".into(),
            name: "search_knowledge".into(),
            args: serde_json::json!({"query": "x"}),
        }];
        let mut second = StoredMessage::new("th-2", SenderKind::Tool, "search_knowledge");
        second.tool_call_id = Some("call-1".into());
        second.created_at = first.created_at + 1;
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        let all = store.list_thread("th-2").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].tool_calls[0].name, "search_knowledge");
        assert_eq!(all[1].tool_call_id.as_deref(), Some("call-1"));
    }
}
