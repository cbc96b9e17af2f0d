//! Worker loop: claim → process → append produced → complete → release the thread lease.
//!
//! Failures never panic the worker: every processor error becomes a `failed` event, and
//! user-facing kinds additionally surface a system message on the thread.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::event::{Event, EventKind};
use crate::processor::{system_message_event, ProcessError, ProcessorDeps, ProcessorSet};

pub(crate) async fn run_worker(
    worker_id: String,
    deps: ProcessorDeps,
    processors: Arc<ProcessorSet>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker = %worker_id, "worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let mut claimed: Option<Event> = None;
        for class in &deps.config.priority_classes {
            match deps
                .queue
                .claim(class, None, &worker_id, deps.config.lease_ms)
                .await
            {
                Ok(Some(event)) => {
                    claimed = Some(event);
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(worker = %worker_id, error = %e, "claim failed");
                    break;
                }
            }
        }
        match claimed {
            Some(event) => process_one(&worker_id, &deps, &processors, event).await,
            None => {
                let idle = std::time::Duration::from_millis(deps.config.poll_interval_ms.max(1));
                tokio::select! {
                    _ = tokio::time::sleep(idle) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
    debug!(worker = %worker_id, "worker drained");
}

async fn process_one(
    worker_id: &str,
    deps: &ProcessorDeps,
    processors: &ProcessorSet,
    event: Event,
) {
    let chain = processors.for_event(&event);
    if chain.is_empty() {
        // Unknown custom kind with no registered processor: complete harmlessly.
        debug!(event = %event.id, kind = %event.kind(), "no processor; completing as no-op");
        finish(deps, &event, worker_id, Ok(Value::Null), Vec::new()).await;
        return;
    }

    // Keep the lease alive across long external calls.
    let keeper = spawn_lease_keeper(deps.clone(), event.id.clone(), worker_id.to_string());

    let mut produced: Vec<Event> = Vec::new();
    let mut result = Value::Null;
    let mut failure: Option<ProcessError> = None;
    for processor in chain {
        match processor.process(&event, deps).await {
            Ok(outcome) => {
                produced.extend(outcome.produced);
                result = outcome.result;
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    keeper.abort();

    match failure {
        None => finish(deps, &event, worker_id, Ok(result), produced).await,
        Some(err) => finish(deps, &event, worker_id, Err(err), produced).await,
    }
}

async fn finish(
    deps: &ProcessorDeps,
    event: &Event,
    worker_id: &str,
    outcome: Result<Value, ProcessError>,
    produced: Vec<Event>,
) {
    match outcome {
        Ok(result) => {
            if let Err(e) = deps.queue.append(produced).await {
                error!(event = %event.id, error = %e, "appending produced events failed");
                let _ = deps.queue.fail(&event.id, &e.to_string()).await;
            } else if let Err(e) = deps.queue.complete(&event.id, result).await {
                warn!(event = %event.id, error = %e, "complete failed");
            }
        }
        Err(err) => {
            error!(event = %event.id, kind = %event.kind(), error = %err, "processor failed");
            // User-facing failures surface on the thread without re-triggering routing.
            // Appended before fail() so a waiter never observes the chain momentarily
            // quiescent between the two writes.
            if matches!(
                event.kind(),
                EventKind::LlmCall | EventKind::IngestDocument
            ) {
                let system = system_message_event(
                    &event.thread_id,
                    &event.trace_id,
                    event.priority,
                    format!("❌ {err}"),
                    true,
                );
                if let Err(e) = deps.queue.append(vec![system]).await {
                    warn!(error = %e, "failed to surface system error message");
                }
            }
            let _ = deps.queue.fail(&event.id, &err.to_string()).await;
            deps.sink.emit(
                event.thread_id.clone(),
                event.trace_id.clone(),
                run_event::RunStreamEvent::RunFailed {
                    message: err.to_string(),
                },
            );
        }
    }
    if let Err(e) = deps
        .threads
        .release_lease(&event.thread_id, worker_id)
        .await
    {
        warn!(thread = %event.thread_id, error = %e, "thread lease release failed");
    }
}

/// Extends the event lease at half-life until aborted. Losing the lease stops the
/// keeper; the event will be retried by whoever reaps it.
fn spawn_lease_keeper(
    deps: ProcessorDeps,
    event_id: String,
    worker_id: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let half_life = std::time::Duration::from_millis((deps.config.lease_ms / 2).max(100) as u64);
        loop {
            tokio::time::sleep(half_life).await;
            match deps
                .queue
                .extend_lease(&event_id, &worker_id, deps.config.lease_ms)
                .await
            {
                Ok(()) => {}
                Err(e) => {
                    warn!(event = %event_id, error = %e, "lease extension failed; stopping keeper");
                    break;
                }
            }
        }
    })
}
