//! The run event bus.
//!
//! Every state transition of a run is published as a structured event.
//! Consumers are decoupled through a broadcast channel: the built-in logging
//! subscriber and the health endpoint read it today, and a slow or absent
//! consumer never blocks the engine.

use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        run_id: String,
        tenant: String,
        agent_id: String,
        model: String,
    },
    AttemptStarted {
        run_id: String,
        attempt: usize,
        provider: String,
        model: String,
    },
    AttemptFailed {
        run_id: String,
        attempt: usize,
        provider: String,
        model: String,
        error_kind: String,
        retryable: bool,
    },
    ChunkForwarded {
        run_id: String,
        bytes: usize,
    },
    ToolCalled {
        run_id: String,
        tool: String,
        call_id: String,
    },
    ToolReturned {
        run_id: String,
        tool: String,
        call_id: String,
        status: String,
        duration_ms: u64,
    },
    Finished {
        run_id: String,
        status: String,
        cost_usd: f64,
        duration_ms: u64,
    },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }
}

/// Logging subscriber: turns the event stream into debug log lines.
pub(crate) fn spawn_log_subscriber(bus: &EventBus) {
    let mut rx = bus.subscribe();

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => log::debug!("run event: {line}"),
                    Err(e) => log::debug!("unserializable run event: {e}"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("event log subscriber lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_emitted_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(RunEvent::Started {
            run_id: "run_1".into(),
            tenant: "acme".into(),
            agent_id: "support".into(),
            model: "gpt-4o-mini".into(),
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, RunEvent::Started { run_id, .. } if run_id == "run_1"));
    }

    #[test]
    fn emitting_without_subscribers_is_fine() {
        let bus = EventBus::new(16);
        bus.emit(RunEvent::ChunkForwarded {
            run_id: "run_1".into(),
            bytes: 42,
        });
    }

    #[test]
    fn events_serialize_with_snake_case_tags() {
        let event = RunEvent::ToolReturned {
            run_id: "run_1".into(),
            tool: "browser-text".into(),
            call_id: "call_1".into(),
            status: "success".into(),
            duration_ms: 120,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], serde_json::json!("tool_returned"));
    }
}
