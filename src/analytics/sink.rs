//! The `EventSink` capability: where published events ultimately land.
//! Swappable independently of the producer's queueing/circuit-breaker logic.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::info;

use super::event::GameEvent;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &GameEvent) -> Result<(), SinkError>;
}

/// Reference sink: logs each event at `info` and keeps a published count.
/// Stands in for a real downstream (Kafka topic, HTTP ingest endpoint, …),
/// which is out of scope.
#[derive(Default)]
pub struct LoggingEventSink {
    published: AtomicU64,
}

impl LoggingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn publish(&self, event: &GameEvent) -> Result<(), SinkError> {
        info!(
            event_id = %event.id,
            game_id = %event.game_id,
            kind = event.data.kind_name(),
            "analytics event"
        );
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::event::GameEventData;
    use crate::session::types::SessionId;
    use chrono::Utc;

    #[tokio::test]
    async fn logging_sink_counts_publishes() {
        let sink = LoggingEventSink::new();
        let event = GameEvent::new(SessionId::new(), None, Utc::now(), GameEventData::PlayerJoined);
        sink.publish(&event).await.unwrap();
        sink.publish(&event).await.unwrap();
        assert_eq!(sink.published_count(), 2);
    }
}
