//! Queue semantics: priority order, per-thread serialization, leases, TTL, reaping.


use std::sync::Arc;

use parley::event::{Event, EventKind, EventPayload};
use parley::queue::{EventQueue, QueueError, SqliteEventQueue};
use parley::{Db, EventStatus, ThreadStore};

struct Fixture {
    queue: SqliteEventQueue,
    threads: ThreadStore,
    _dir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path().join("q.db")).unwrap();
    Fixture {
        queue: SqliteEventQueue::new(db.clone()),
        threads: ThreadStore::new(db),
        _dir: dir,
    }
}

fn probe(thread_id: &str, priority: i64) -> Event {
    Event::new(
        thread_id,
        EventPayload::Custom {
            kind: "PROBE".to_string(),
            raw: serde_json::json!({}),
        },
    )
    .with_priority(priority)
}

fn probe_kinds() -> Vec<EventKind> {
    vec![EventKind::Custom("PROBE".to_string())]
}

/// **Scenario**: within a class, higher priority wins; ties break by creation order.
#[tokio::test]
async fn claim_orders_by_priority_then_age() {
    let f = fixture().await;
    f.threads
        .load_or_create_by_external_id("t", "t", &[])
        .await
        .unwrap();
    let thread = f
        .threads
        .load_or_create_by_external_id("t", "t", &[])
        .await
        .unwrap();

    let low = probe(&thread.id, 0);
    let high = probe(&thread.id, 10);
    let low_id = low.id.clone();
    let high_id = high.id.clone();
    f.queue.append(vec![low, high]).await.unwrap();

    let first = f
        .queue
        .claim(&probe_kinds(), None, "w1", 60_000)
        .await
        .unwrap()
        .expect("event ready");
    assert_eq!(first.id, high_id);
    f.queue
        .complete(&first.id, serde_json::json!({}))
        .await
        .unwrap();
    f.threads.release_lease(&thread.id, "w1").await.unwrap();

    let second = f
        .queue
        .claim(&probe_kinds(), None, "w1", 60_000)
        .await
        .unwrap()
        .expect("second event");
    assert_eq!(second.id, low_id);
}

/// **Scenario**: while one event of a thread is processing, another worker cannot claim
/// a second event of the same thread, but an unrelated thread stays claimable.
#[tokio::test]
async fn per_thread_serialization() {
    let f = fixture().await;
    let busy = f
        .threads
        .load_or_create_by_external_id("busy", "busy", &[])
        .await
        .unwrap();
    let idle = f
        .threads
        .load_or_create_by_external_id("idle", "idle", &[])
        .await
        .unwrap();

    f.queue
        .append(vec![probe(&busy.id, 0), probe(&busy.id, 0), probe(&idle.id, 0)])
        .await
        .unwrap();

    let claimed = f
        .queue
        .claim(&probe_kinds(), Some(&busy.id), "w1", 60_000)
        .await
        .unwrap()
        .expect("first claim");
    assert_eq!(claimed.status, EventStatus::Processing);

    // Another worker: the busy thread is locked, only the idle thread's event comes out.
    let other = f
        .queue
        .claim(&probe_kinds(), None, "w2", 60_000)
        .await
        .unwrap()
        .expect("unrelated thread claimable");
    assert_eq!(other.thread_id, idle.id);
    let none = f
        .queue
        .claim(&probe_kinds(), Some(&busy.id), "w2", 60_000)
        .await
        .unwrap();
    assert!(none.is_none(), "second event of a busy thread must not be claimable");

    // After completion and lease release the second event becomes claimable.
    f.queue
        .complete(&claimed.id, serde_json::json!({}))
        .await
        .unwrap();
    f.threads.release_lease(&busy.id, "w1").await.unwrap();
    let next = f
        .queue
        .claim(&probe_kinds(), Some(&busy.id), "w2", 60_000)
        .await
        .unwrap();
    assert!(next.is_some());
}

/// **Scenario**: only the lease owner can extend; the reaper returns lease-expired work
/// to pending with the same id (at-least-once).
#[tokio::test]
async fn lease_expiry_revives_event() {
    let f = fixture().await;
    let thread = f
        .threads
        .load_or_create_by_external_id("lease", "lease", &[])
        .await
        .unwrap();
    f.queue.append(vec![probe(&thread.id, 0)]).await.unwrap();

    let claimed = f
        .queue
        .claim(&probe_kinds(), None, "w1", 10)
        .await
        .unwrap()
        .expect("claim");

    assert!(matches!(
        f.queue.extend_lease(&claimed.id, "w2", 1000).await,
        Err(QueueError::LeaseLost(_))
    ));

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    let report = f.queue.reap().await.unwrap();
    assert_eq!(report.revived, 1);
    assert_eq!(report.thread_leases_cleared, 1);

    let again = f
        .queue
        .claim(&probe_kinds(), None, "w2", 60_000)
        .await
        .unwrap()
        .expect("revived event");
    assert_eq!(again.id, claimed.id, "retry keeps the same event id");
}

/// **Scenario**: a pending event past its TTL expires on the next sweep and is never
/// handed to a worker.
#[tokio::test]
async fn ttl_expires_pending_events() {
    let f = fixture().await;
    let thread = f
        .threads
        .load_or_create_by_external_id("ttl", "ttl", &[])
        .await
        .unwrap();
    let doomed = probe(&thread.id, 0).with_ttl_ms(-50);
    let doomed_id = doomed.id.clone();
    f.queue.append(vec![doomed]).await.unwrap();

    let report = f.queue.reap().await.unwrap();
    assert_eq!(report.expired, 1);
    let claimed = f.queue.claim(&probe_kinds(), None, "w1", 1000).await.unwrap();
    assert!(claimed.is_none());
    let stored = f.queue.get(&doomed_id).await.unwrap().unwrap();
    assert_eq!(stored.status, EventStatus::Expired);
}

/// **Scenario**: appending the same event twice keeps one row; claims filter by kind.
#[tokio::test]
async fn append_idempotent_and_kind_filtered() {
    let f = fixture().await;
    let thread = f
        .threads
        .load_or_create_by_external_id("kinds", "kinds", &[])
        .await
        .unwrap();
    let event = probe(&thread.id, 0);
    f.queue.append(vec![event.clone()]).await.unwrap();
    f.queue.append(vec![event.clone()]).await.unwrap();

    let wrong_kind = f
        .queue
        .claim(&[EventKind::LlmCall], None, "w1", 1000)
        .await
        .unwrap();
    assert!(wrong_kind.is_none());

    let claimed = f
        .queue
        .claim(&probe_kinds(), None, "w1", 1000)
        .await
        .unwrap()
        .expect("claim");
    f.queue.complete(&claimed.id, serde_json::json!({})).await.unwrap();
    f.threads.release_lease(&thread.id, "w1").await.unwrap();

    // The duplicate insert did not create a second row.
    let leftover = f.queue.claim(&probe_kinds(), None, "w1", 1000).await.unwrap();
    assert!(leftover.is_none());
}
