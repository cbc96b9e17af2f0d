//! SQLite implementation of [`EventQueue`].
//!
//! The claim runs as one `BEGIN IMMEDIATE` transaction joining events against threads, so
//! two workers cannot hold the same thread at once and the thread lease is written in the
//! same step that locks the event. Kind filters are passed as a JSON array and matched
//! with `json_each`, keeping the SQL static.

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use tracing::{debug, warn};

use crate::db::{classify, Db, StoreError};
use crate::event::{Event, EventKind, EventPayload, EventStatus};
use crate::ids;
use crate::queue::{EventQueue, QueueError, ReapReport};

#[derive(Clone)]
pub struct SqliteEventQueue {
    db: Db,
}

impl SqliteEventQueue {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

const EVENT_COLUMNS: &str = "id, thread_id, kind, payload, status, parent_event_id, trace_id, \
                             priority, ttl_ms, expires_at, namespace, metadata, \
                             worker_locked_by, worker_lease_expires_at, created_at";

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, Event)> {
    let kind: String = row.get(2)?;
    let payload: String = row.get(3)?;
    let status: String = row.get(4)?;
    let metadata: String = row.get(11)?;
    let event = Event {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        // Placeholder payload; decoded by the caller so a corrupt row can error cleanly.
        payload: EventPayload::Custom {
            kind: kind.clone(),
            raw: Value::Null,
        },
        status: EventStatus::parse(&status),
        parent_id: row.get(5)?,
        trace_id: row.get(6)?,
        priority: row.get(7)?,
        ttl_ms: row.get(8)?,
        expires_at: row.get(9)?,
        namespace: row.get(10)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
        worker_locked_by: row.get(12)?,
        worker_lease_expires_at: row.get(13)?,
        created_at: row.get(14)?,
    };
    Ok((kind, payload, event))
}

fn decode_event((kind, payload, mut event): (String, String, Event)) -> Result<Event, QueueError> {
    let raw: Value = serde_json::from_str(&payload).map_err(|e| QueueError::Payload {
        id: event.id.clone(),
        message: e.to_string(),
    })?;
    event.payload = EventPayload::from_parts(&kind, raw).map_err(|e| QueueError::Payload {
        id: event.id.clone(),
        message: e.to_string(),
    })?;
    Ok(event)
}

#[async_trait]
impl EventQueue for SqliteEventQueue {
    async fn append(&self, events: Vec<Event>) -> Result<(), QueueError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut rows = Vec::with_capacity(events.len());
        for event in &events {
            let payload = event
                .payload
                .to_value()
                .map_err(StoreError::from)?
                .to_string();
            let metadata = event.metadata.to_string();
            rows.push((event.clone(), payload, metadata));
        }
        self.db
            .run(move |conn| {
                let tx = conn.transaction().map_err(classify)?;
                for (event, payload, metadata) in &rows {
                    tx.execute(
                        "INSERT OR IGNORE INTO events \
                         (id, thread_id, kind, payload, status, parent_event_id, trace_id, \
                          priority, ttl_ms, expires_at, namespace, metadata, created_at, updated_at) \
                         VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
                        params![
                            event.id,
                            event.thread_id,
                            event.kind().as_str(),
                            payload,
                            event.parent_id,
                            event.trace_id,
                            event.priority,
                            event.ttl_ms,
                            event.expires_at,
                            event.namespace,
                            metadata,
                            event.created_at,
                        ],
                    )
                    .map_err(classify)?;
                }
                tx.commit().map_err(classify)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn claim(
        &self,
        kinds: &[EventKind],
        thread_id: Option<&str>,
        worker_id: &str,
        lease_ms: i64,
    ) -> Result<Option<Event>, QueueError> {
        if kinds.is_empty() {
            return Ok(None);
        }
        let kinds_json = serde_json::to_string(
            &kinds.iter().map(|k| k.as_str().to_string()).collect::<Vec<_>>(),
        )
        .map_err(StoreError::from)?;
        let thread_filter = thread_id.map(String::from);
        let worker = worker_id.to_string();
        let now = ids::now_millis();
        let row = self
            .db
            .run(move |conn| {
                let tx = conn
                    .transaction_with_behavior(TransactionBehavior::Immediate)
                    .map_err(classify)?;
                let candidate: Option<String> = tx
                    .query_row(
                        "SELECT e.id FROM events e LEFT JOIN threads t ON t.id = e.thread_id \
                         WHERE e.status = 'pending' \
                           AND (e.expires_at IS NULL OR e.expires_at > ?1) \
                           AND e.kind IN (SELECT value FROM json_each(?2)) \
                           AND (?3 IS NULL OR e.thread_id = ?3) \
                           AND (t.id IS NULL \
                                OR t.lease_holder IS NULL \
                                OR t.lease_expires_at IS NULL \
                                OR t.lease_expires_at <= ?1 \
                                OR t.lease_holder = ?4) \
                         ORDER BY e.priority DESC, e.created_at ASC, e.rid ASC \
                         LIMIT 1",
                        params![now, kinds_json, thread_filter, worker],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(classify)?;
                let Some(event_id) = candidate else {
                    // Nothing ready; roll back the write transaction.
                    return Ok(None);
                };
                let lease_until = now + lease_ms;
                tx.execute(
                    "UPDATE events SET status = 'processing', worker_locked_by = ?1, \
                     worker_lease_expires_at = ?2, updated_at = ?3 WHERE id = ?4",
                    params![worker, lease_until, now, event_id],
                )
                .map_err(classify)?;
                tx.execute(
                    "UPDATE threads SET lease_holder = ?1, lease_expires_at = ?2 \
                     WHERE id = (SELECT thread_id FROM events WHERE id = ?3)",
                    params![worker, lease_until, event_id],
                )
                .map_err(classify)?;
                let row = tx
                    .query_row(
                        &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                        params![event_id],
                        row_to_event,
                    )
                    .map_err(classify)?;
                tx.commit().map_err(classify)?;
                Ok(Some(row))
            })
            .await?;
        match row {
            Some(row) => {
                let event = decode_event(row)?;
                debug!(event = %event.id, kind = %event.kind(), thread = %event.thread_id, "claimed event");
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    async fn complete(&self, event_id: &str, result: Value) -> Result<(), QueueError> {
        let event_id = event_id.to_string();
        let result = result.to_string();
        let now = ids::now_millis();
        let updated = self
            .db
            .run(move |conn| {
                conn.execute(
                    "UPDATE events SET status = 'completed', result = ?1, \
                     worker_locked_by = NULL, worker_lease_expires_at = NULL, updated_at = ?2 \
                     WHERE id = ?3 AND status = 'processing'",
                    params![result, now, event_id],
                )
                .map_err(classify)
            })
            .await?;
        if updated == 0 {
            warn!("complete() found no processing event; likely a reaped retry finished elsewhere");
        }
        Ok(())
    }

    async fn fail(&self, event_id: &str, error: &str) -> Result<(), QueueError> {
        let event_id = event_id.to_string();
        let error = error.to_string();
        let now = ids::now_millis();
        let updated = self
            .db
            .run(move |conn| {
                conn.execute(
                    "UPDATE events SET status = 'failed', error = ?1, \
                     worker_locked_by = NULL, worker_lease_expires_at = NULL, updated_at = ?2 \
                     WHERE id = ?3 AND status = 'processing'",
                    params![error, now, event_id],
                )
                .map_err(classify)
            })
            .await?;
        if updated == 0 {
            warn!("fail() found no processing event; likely a reaped retry finished elsewhere");
        }
        Ok(())
    }

    async fn extend_lease(
        &self,
        event_id: &str,
        worker_id: &str,
        lease_ms: i64,
    ) -> Result<(), QueueError> {
        let id = event_id.to_string();
        let worker = worker_id.to_string();
        let now = ids::now_millis();
        let updated = self
            .db
            .run(move |conn| {
                conn.execute(
                    "UPDATE events SET worker_lease_expires_at = ?1, updated_at = ?2 \
                     WHERE id = ?3 AND worker_locked_by = ?4 AND status = 'processing'",
                    params![now + lease_ms, now, id, worker],
                )
                .map_err(classify)
            })
            .await?;
        if updated == 0 {
            return Err(QueueError::LeaseLost(event_id.to_string()));
        }
        Ok(())
    }

    async fn reap(&self) -> Result<ReapReport, QueueError> {
        let now = ids::now_millis();
        let report = self
            .db
            .run(move |conn| {
                let tx = conn.transaction().map_err(classify)?;
                let expired = tx
                    .execute(
                        "UPDATE events SET status = 'expired', updated_at = ?1 \
                         WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at <= ?1",
                        params![now],
                    )
                    .map_err(classify)?;
                let revived = tx
                    .execute(
                        "UPDATE events SET status = 'pending', worker_locked_by = NULL, \
                         worker_lease_expires_at = NULL, updated_at = ?1 \
                         WHERE status = 'processing' AND worker_lease_expires_at <= ?1",
                        params![now],
                    )
                    .map_err(classify)?;
                let thread_leases_cleared = tx
                    .execute(
                        "UPDATE threads SET lease_holder = NULL, lease_expires_at = NULL \
                         WHERE lease_holder IS NOT NULL AND lease_expires_at <= ?1",
                        params![now],
                    )
                    .map_err(classify)?;
                tx.commit().map_err(classify)?;
                Ok(ReapReport {
                    expired,
                    revived,
                    thread_leases_cleared,
                })
            })
            .await?;
        if report != ReapReport::default() {
            debug!(?report, "reaper sweep");
        }
        Ok(report)
    }

    async fn open_count_for_trace(&self, trace_id: &str) -> Result<u64, QueueError> {
        let trace_id = trace_id.to_string();
        let count: i64 = self
            .db
            .run(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM events WHERE trace_id = ?1 \
                     AND status IN ('pending', 'processing')",
                    params![trace_id],
                    |row| row.get(0),
                )
                .map_err(classify)
            })
            .await?;
        Ok(count as u64)
    }

    async fn get(&self, event_id: &str) -> Result<Option<Event>, QueueError> {
        let event_id = event_id.to_string();
        let row = self
            .db
            .run(move |conn| {
                conn.query_row(
                    &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                    params![event_id],
                    row_to_event,
                )
                .optional()
                .map_err(classify)
            })
            .await?;
        row.map(decode_event).transpose()
    }
}
