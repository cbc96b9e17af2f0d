//! Durable event queue: priority-ordered, at-least-once, lease-locked.
//!
//! Claiming takes the event lease and the thread lease in a single transaction, which is
//! what serializes processing per thread. The reaper returns lease-expired work to
//! `pending` (retry with the same id), so processor side effects must be idempotent.

mod sqlite;

pub use sqlite::SqliteEventQueue;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::db::StoreError;
use crate::event::{Event, EventKind};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("lease not held by this worker for event {0}")]
    LeaseLost(String),
    #[error("event not found: {0}")]
    NotFound(String),
    #[error("corrupt event payload for {id}: {message}")]
    Payload { id: String, message: String },
}

/// Counts from one reaper sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Pending events past their TTL, now `expired`.
    pub expired: usize,
    /// Processing events whose worker lease lapsed, returned to `pending`.
    pub revived: usize,
    /// Stale thread leases cleared.
    pub thread_leases_cleared: usize,
}

/// A typed, persistent queue with per-thread serialization.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Atomic batch insert; every event lands `pending`. Re-appending an id is a no-op.
    async fn append(&self, events: Vec<Event>) -> Result<(), QueueError>;

    /// Atomically selects the highest-priority ready event matching `kinds` (optionally
    /// restricted to one thread), marks it `processing` under a worker lease, and takes
    /// the thread lease alongside. Ready = `pending`, not expired, and its thread lease
    /// free or already held by this worker. Ties break by creation order.
    async fn claim(
        &self,
        kinds: &[EventKind],
        thread_id: Option<&str>,
        worker_id: &str,
        lease_ms: i64,
    ) -> Result<Option<Event>, QueueError>;

    async fn complete(&self, event_id: &str, result: Value) -> Result<(), QueueError>;

    async fn fail(&self, event_id: &str, error: &str) -> Result<(), QueueError>;

    /// Renews an active lease; errors if this worker no longer holds it.
    async fn extend_lease(
        &self,
        event_id: &str,
        worker_id: &str,
        lease_ms: i64,
    ) -> Result<(), QueueError>;

    /// Background sweep: TTL expiry, worker-lease recovery, stale thread leases.
    async fn reap(&self) -> Result<ReapReport, QueueError>;

    /// Open (pending or processing) events for a trace; zero means the run chain is done.
    async fn open_count_for_trace(&self, trace_id: &str) -> Result<u64, QueueError>;

    /// Fetch one event regardless of status (introspection and tests).
    async fn get(&self, event_id: &str) -> Result<Option<Event>, QueueError>;
}
