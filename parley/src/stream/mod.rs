//! In-process fan-out of run-stream events to subscribed consumers.
//!
//! Token streaming must never block on a slow consumer, so the sink is a broadcast
//! channel with a bounded ring: laggards lose the oldest events and keep going. Nothing
//! here is persistent; durable state lives in the queue and stores.

use run_event::RunStreamEvent;
use tokio::sync::broadcast;

/// One emitted event with its envelope identity.
#[derive(Clone, Debug)]
pub struct Emitted {
    pub thread_id: String,
    pub trace_id: String,
    pub event: RunStreamEvent,
}

/// Cloneable emitter handle shared by processors and the worker loop.
#[derive(Clone)]
pub struct RunEventSink {
    tx: broadcast::Sender<Emitted>,
}

impl RunEventSink {
    /// `capacity` bounds the per-subscriber ring; beyond it the oldest events drop.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(8));
        Self { tx }
    }

    /// Emits to all current subscribers. No subscribers is not an error.
    pub fn emit(&self, thread_id: impl Into<String>, trace_id: impl Into<String>, event: RunStreamEvent) {
        let _ = self.tx.send(Emitted {
            thread_id: thread_id.into(),
            trace_id: trace_id.into(),
            event,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Emitted> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: subscribers receive events emitted after they subscribe; a full ring
    /// drops the oldest events instead of blocking the emitter.
    #[tokio::test]
    async fn fanout_drops_oldest_under_backpressure() {
        let sink = RunEventSink::new(8);
        let mut rx = sink.subscribe();
        for i in 0..20 {
            sink.emit(
                "th",
                "tr",
                RunStreamEvent::Token {
                    agent_name: "a".into(),
                    token: format!("t{i}"),
                    is_complete: false,
                },
            );
        }
        // The first recv reports the lag, subsequent ones drain what is left.
        let mut received = 0;
        loop {
            match rx.try_recv() {
                Ok(_) => received += 1,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        assert!(received > 0 && received <= 8);
    }
}
