//! Fire-and-forget analytics pipeline: a soft-capped queue drained by a
//! single background worker that publishes through a circuit breaker.
//!
//! Producers (the session manager, the hub) call [`AnalyticsProducer::emit`],
//! which never blocks and never fails — back-pressure is handled by
//! dropping the oldest queued event once the soft cap is exceeded, per
//! `spec.md` §4.6. A single worker drains the queue in order, so events for
//! a given game are published in the order they were emitted.

pub mod circuit_breaker;
pub mod event;
pub mod sink;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::warn;

pub use circuit_breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use event::{GameEvent, GameEventData};
pub use sink::{EventSink, LoggingEventSink, SinkError};

const DEFAULT_MAX_PUBLISH_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(20);

struct Inner {
    queue: Mutex<VecDeque<GameEvent>>,
    notify: Notify,
    soft_cap: usize,
    dropped: AtomicU64,
    published: AtomicU64,
    breaker: Arc<CircuitBreaker>,
    sink: Arc<dyn EventSink>,
}

/// Handle to the analytics pipeline. Cheap to clone; clones share the same
/// queue and worker.
#[derive(Clone)]
pub struct AnalyticsProducer {
    inner: Arc<Inner>,
}

impl AnalyticsProducer {
    pub fn new(sink: Arc<dyn EventSink>, soft_cap: usize, breaker_config: BreakerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                soft_cap,
                dropped: AtomicU64::new(0),
                published: AtomicU64::new(0),
                breaker: Arc::new(CircuitBreaker::new(breaker_config)),
                sink,
            }),
        }
    }

    /// Enqueues `event`. Non-blocking: acquires a short-lived lock on the
    /// in-memory queue only, never the network. If the queue is already at
    /// its soft cap, the oldest queued event is dropped to make room.
    pub async fn emit(&self, event: GameEvent) {
        let mut queue = self.inner.queue.lock().await;
        if queue.len() >= self.inner.soft_cap {
            queue.pop_front();
            let dropped = self.inner.dropped.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(dropped_total = dropped, soft_cap = self.inner.soft_cap, "analytics queue overflow, dropping oldest event");
        }
        queue.push_back(event);
        drop(queue);
        self.inner.notify.notify_one();
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::SeqCst)
    }

    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::SeqCst)
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.inner.breaker.state()
    }

    async fn queue_len(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    /// Drains and publishes every currently-queued event, in order. Returns
    /// the number of events processed (published or dropped by the
    /// breaker). Used by the background worker loop and directly by tests
    /// that want deterministic draining without sleeping on a notify.
    pub async fn drain_once(&self) -> usize {
        let mut processed = 0;
        loop {
            let event = {
                let mut queue = self.inner.queue.lock().await;
                match queue.pop_front() {
                    Some(event) => event,
                    None => break,
                }
            };
            self.publish_one(event).await;
            processed += 1;
        }
        processed
    }

    async fn publish_one(&self, event: GameEvent) {
        let sink = self.inner.sink.clone();
        let result = circuit_breaker::call_with_breaker(
            &self.inner.breaker,
            DEFAULT_MAX_PUBLISH_ATTEMPTS,
            DEFAULT_RETRY_BACKOFF,
            move || {
                let sink = sink.clone();
                let event = event.clone();
                async move { sink.publish(&event).await }
            },
        )
        .await;

        match result {
            Some(Ok(())) => {
                self.inner.published.fetch_add(1, Ordering::SeqCst);
            }
            Some(Err(err)) => {
                warn!(error = %err, "analytics event publish failed after retries, dropping");
            }
            None => {
                warn!("analytics circuit breaker open, dropping event");
            }
        }
    }

    /// Runs forever, waking whenever `emit` signals new work and draining
    /// the queue each time. Intended to be spawned once as a background
    /// task from `main`.
    pub async fn run(self) {
        loop {
            self.inner.notify.notified().await;
            self.drain_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::SessionId;
    use chrono::Utc;
    use std::sync::atomic::AtomicU32;

    fn sample_event() -> GameEvent {
        GameEvent::new(SessionId::new(), None, Utc::now(), GameEventData::PlayerJoined)
    }

    #[tokio::test]
    async fn emit_then_drain_publishes_through_sink() {
        let sink = Arc::new(LoggingEventSink::new());
        let producer = AnalyticsProducer::new(sink.clone(), 100, BreakerConfig::default());
        producer.emit(sample_event()).await;
        producer.emit(sample_event()).await;
        let processed = producer.drain_once().await;
        assert_eq!(processed, 2);
        assert_eq!(sink.published_count(), 2);
        assert_eq!(producer.published_count(), 2);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts_it() {
        let sink = Arc::new(LoggingEventSink::new());
        let producer = AnalyticsProducer::new(sink, 2, BreakerConfig::default());
        producer.emit(sample_event()).await;
        producer.emit(sample_event()).await;
        producer.emit(sample_event()).await;
        assert_eq!(producer.queue_len().await, 2);
        assert_eq!(producer.dropped_count(), 1);
    }

    struct FailingSink {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl EventSink for FailingSink {
        async fn publish(&self, _event: &GameEvent) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SinkError::Unavailable("boom".into()))
        }
    }

    #[tokio::test]
    async fn persistent_failures_trip_the_breaker() {
        let sink = Arc::new(FailingSink { calls: AtomicU32::new(0) });
        let producer = AnalyticsProducer::new(
            sink,
            10,
            BreakerConfig {
                failure_threshold: 1,
                success_threshold: 1,
                cooldown: Duration::from_secs(60),
            },
        );
        producer.emit(sample_event()).await;
        producer.drain_once().await;
        assert_eq!(producer.breaker_state(), BreakerState::Open);

        // A second event is dropped outright because the breaker is open.
        producer.emit(sample_event()).await;
        producer.drain_once().await;
        assert_eq!(producer.published_count(), 0);
    }
}
