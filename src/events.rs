//! Progress events of a transcript batch, published on a broadcast channel.

use serde::Serialize;
use tokio::sync::broadcast;

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TranscriptEvent {
    Started { matricule: String },
    Rendered { matricule: String, bytes: usize },
    Failed { matricule: String, reason: String },
    Packaged { entries: usize, failures: usize },
}

/// Fan-out bus: every subscriber receives every event. Slow receivers
/// observe `RecvError::Lagged` once the buffer is full.
pub struct EventBus {
    sender: broadcast::Sender<TranscriptEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: TranscriptEvent) {
        // Zero receivers is not an error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Logs every event until the bus is dropped.
pub fn spawn_logger(bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(TranscriptEvent::Started { matricule }) => {
                    tracing::debug!(%matricule, "generating transcript");
                }
                Ok(TranscriptEvent::Rendered { matricule, bytes }) => {
                    tracing::info!(%matricule, bytes, "transcript rendered");
                }
                Ok(TranscriptEvent::Failed { matricule, reason }) => {
                    tracing::warn!(%matricule, %reason, "transcript failed");
                }
                Ok(TranscriptEvent::Packaged { entries, failures }) => {
                    tracing::info!(entries, failures, "batch packaged");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
