//! The Event Log: durable, totally-ordered append-only outbox with in-process direct
//! dispatch and pluggable durable storage.

pub mod memory;
pub mod sqlite;

use crate::error::{WeaverError, WeaverResult};
use crate::model::Envelope;
pub use crate::model::EventType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// What a subscriber cares about. An empty filter (`None`/`None`) matches everything.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub event_types: Option<HashSet<EventType>>,
    pub run_id: Option<String>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_run(run_id: impl Into<String>) -> Self {
        Self {
            event_types: None,
            run_id: Some(run_id.into()),
        }
    }

    pub fn for_types(types: impl IntoIterator<Item = EventType>) -> Self {
        Self {
            event_types: Some(types.into_iter().collect()),
            run_id: None,
        }
    }

    pub fn matches(&self, envelope: &Envelope) -> bool {
        if let Some(types) = &self.event_types {
            if !types.contains(&envelope.event_type) {
                return false;
            }
        }
        if let Some(run_id) = &self.run_id {
            if envelope.run_id.as_deref() != Some(run_id.as_str()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub types: Vec<EventType>,
    pub run_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Pluggable durable backend. Implementations must make `append` atomic with any
/// co-transactional state the caller writes in the same call; the in-memory backend
/// trivially satisfies this by being single-threaded under the log's own lock.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(
        &self,
        offset: u64,
        draft: &crate::model::envelope::EnvelopeDraft,
        appended_at: DateTime<Utc>,
    ) -> WeaverResult<()>;

    async fn read_from(&self, offset: u64, limit: usize) -> WeaverResult<Vec<Envelope>>;

    async fn query(&self, filter: QueryFilter) -> WeaverResult<Vec<Envelope>>;

    async fn last_offset(&self) -> WeaverResult<Option<u64>>;

    async fn get_consumer_offset(&self, consumer_id: &str) -> WeaverResult<i64>;

    async fn set_consumer_offset(&self, consumer_id: &str, offset: i64) -> WeaverResult<()>;
}

/// A handler invoked synchronously (relative to append ordering) for every envelope that
/// matches its filter. Errors are isolated: they are logged and do not unsubscribe the
/// handler or fail the append.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope) -> WeaverResult<()>;
}

struct ChannelHandler {
    tx: mpsc::Sender<Envelope>,
}

#[async_trait]
impl EventHandler for ChannelHandler {
    async fn handle(&self, envelope: &Envelope) -> WeaverResult<()> {
        self.tx
            .send(envelope.clone())
            .await
            .map_err(|_| WeaverError::Internal(anyhow::anyhow!("subscriber channel closed")))
    }
}

struct Subscriber {
    id: u64,
    filter: Filter,
    handler: Arc<dyn EventHandler>,
}

/// An opaque handle returned by `subscribe`; pass to `unsubscribe` to stop delivery.
/// `unsubscribe` is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle(u64);

struct Inner {
    subscribers: Vec<Subscriber>,
}

/// The Event Log: single source of truth for all inter-component messages.
///
/// `append` assigns the next offset and dispatches to matching in-process subscribers
/// under a single lock, so offset assignment and in-process delivery are both totally
/// ordered.
pub struct EventLog {
    store: Arc<dyn EventStore>,
    next_offset: AtomicU64,
    next_subscriber_id: AtomicU64,
    inner: Mutex<Inner>,
    producer_id: String,
}

impl EventLog {
    pub async fn new(store: Arc<dyn EventStore>, producer_id: impl Into<String>) -> WeaverResult<Self> {
        let next_offset = store.last_offset().await?.map(|o| o + 1).unwrap_or(0);
        Ok(Self {
            store,
            next_offset: AtomicU64::new(next_offset),
            next_subscriber_id: AtomicU64::new(0),
            inner: Mutex::new(Inner {
                subscribers: Vec::new(),
            }),
            producer_id: producer_id.into(),
        })
    }

    /// Assign the next offset, persist, then dispatch to every matching in-process
    /// subscriber. Offset assignment and the durable write run under `inner`'s lock, which
    /// is how the log serializes them and guarantees a reader calling `read_from` right
    /// after this returns observes the new envelope; the lock is released before dispatch
    /// so a handler reacting to this envelope (most handlers do, by publishing a follow-up
    /// event) can call `append` again on this same log without deadlocking on itself.
    pub async fn append(
        &self,
        mut draft: crate::model::envelope::EnvelopeDraft,
    ) -> WeaverResult<Envelope> {
        if draft.producer_id.is_empty() {
            draft.producer_id = self.producer_id.clone();
        }

        let (envelope, subscribers) = {
            let inner = self.inner.lock().await;
            let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
            let appended_at = Utc::now();

            self.store.append(offset, &draft, appended_at).await?;

            let envelope = Envelope {
                offset,
                event_type: draft.event_type,
                appended_at,
                producer_id: draft.producer_id,
                run_id: draft.run_id,
                payload: draft.payload,
                correlation_id: draft.correlation_id,
                causation_id: draft.causation_id,
            };

            let subscribers: Vec<(u64, Arc<dyn EventHandler>)> = inner
                .subscribers
                .iter()
                .filter(|s| s.filter.matches(&envelope))
                .map(|s| (s.id, s.handler.clone()))
                .collect();

            metrics::gauge!("weaver_event_log_offset").set(offset as f64);
            (envelope, subscribers)
        };

        for (subscriber_id, handler) in subscribers {
            if let Err(e) = handler.handle(&envelope).await {
                // The only handler that returns an error today is the SSE channel
                // handler, and only once its receiver has already been dropped —
                // i.e. the client disconnected without its stream's `Drop` having
                // unsubscribed it yet.
                metrics::counter!("weaver_sse_clients_disconnected_slow_consumer").increment(1);
                warn!(
                    subscriber_id,
                    offset = envelope.offset,
                    error = %e,
                    "subscriber failed to handle envelope; continuing dispatch to other subscribers"
                );
            }
        }
        debug!(offset = envelope.offset, event_type = %envelope.event_type, "appended envelope");

        Ok(envelope)
    }

    pub async fn read_from(&self, offset: u64, limit: usize) -> WeaverResult<Vec<Envelope>> {
        self.store.read_from(offset, limit).await
    }

    pub async fn query(&self, filter: QueryFilter) -> WeaverResult<Vec<Envelope>> {
        self.store.query(filter).await
    }

    pub async fn get_consumer_offset(&self, consumer_id: &str) -> WeaverResult<i64> {
        self.store.get_consumer_offset(consumer_id).await
    }

    pub async fn set_consumer_offset(&self, consumer_id: &str, offset: i64) -> WeaverResult<()> {
        self.store.set_consumer_offset(consumer_id, offset).await
    }

    /// Register a raw handler; used internally by `subscribe_channel` and by components
    /// (tests) that need to observe handler errors rather than just a channel of events.
    pub async fn subscribe(&self, filter: Filter, handler: Arc<dyn EventHandler>) -> SubscriptionHandle {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        inner.subscribers.push(Subscriber { id, filter, handler });
        SubscriptionHandle(id)
    }

    /// Convenience subscription: returns a bounded channel fed in offset order. A full
    /// channel blocks the next `append` (backpressure) rather than dropping events.
    pub async fn subscribe_channel(
        &self,
        filter: Filter,
        capacity: usize,
    ) -> (SubscriptionHandle, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = self.subscribe(filter, Arc::new(ChannelHandler { tx })).await;
        (handle, rx)
    }

    /// Idempotent: unsubscribing an already-removed or unknown handle is a no-op.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut inner = self.inner.lock().await;
        inner.subscribers.retain(|s| s.id != handle.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::memory::InMemoryEventStore;
    use crate::model::envelope::EnvelopeDraft;
    use std::sync::atomic::AtomicUsize;

    async fn new_log() -> EventLog {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        EventLog::new(store, "test").await.unwrap()
    }

    #[tokio::test]
    async fn offsets_are_dense_and_monotonic() {
        let log = new_log().await;
        for i in 0..5 {
            let e = log
                .append(EnvelopeDraft::new(
                    EventType::ClockTick,
                    "test",
                    None,
                    serde_json::json!({"i": i}),
                ))
                .await
                .unwrap();
            assert_eq!(e.offset, i);
        }
    }

    #[tokio::test]
    async fn read_from_sees_just_appended_envelope() {
        let log = new_log().await;
        let e = log
            .append(EnvelopeDraft::new(
                EventType::ClockTick,
                "test",
                None,
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        let read = log.read_from(e.offset.wrapping_sub(1), 10).await.unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].offset, e.offset);
    }

    struct FailingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for FailingHandler {
        async fn handle(&self, _envelope: &Envelope) -> WeaverResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(WeaverError::Internal(anyhow::anyhow!("boom")))
        }
    }

    #[tokio::test]
    async fn failing_subscriber_does_not_unsubscribe_or_block_others() {
        let log = new_log().await;
        let failing = Arc::new(FailingHandler {
            calls: AtomicUsize::new(0),
        });
        log.subscribe(Filter::all(), failing.clone()).await;
        let (_handle, mut rx) = log.subscribe_channel(Filter::all(), 8).await;

        for _ in 0..3 {
            log.append(EnvelopeDraft::new(
                EventType::ClockTick,
                "test",
                None,
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        }

        assert_eq!(failing.calls.load(Ordering::SeqCst), 3);
        for _ in 0..3 {
            assert!(rx.recv().await.is_some());
        }
    }

    struct ReappendingHandler {
        log: std::sync::Weak<EventLog>,
    }

    #[async_trait]
    impl EventHandler for ReappendingHandler {
        async fn handle(&self, envelope: &Envelope) -> WeaverResult<()> {
            if envelope.event_type == EventType::ClockTick {
                if let Some(log) = self.log.upgrade() {
                    log.append(EnvelopeDraft::new(
                        EventType::RunStarted,
                        "test",
                        None,
                        serde_json::json!({}),
                    ))
                    .await?;
                }
            }
            Ok(())
        }
    }

    /// A subscriber that reacts to an envelope by appending a follow-up one, on the same
    /// log, from inside its own dispatch — the shape every real handler (`DomainRouter`,
    /// `BacktestEngine`, `StrategyRunner`) takes. Must not deadlock on `inner`'s mutex.
    #[tokio::test]
    async fn subscriber_can_append_to_the_same_log_from_within_dispatch() {
        let log = Arc::new(new_log().await);
        log.subscribe(
            Filter::all(),
            Arc::new(ReappendingHandler {
                log: Arc::downgrade(&log),
            }),
        )
        .await;
        let (_handle, mut rx) = log.subscribe_channel(Filter::all(), 8).await;

        let first = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            log.append(EnvelopeDraft::new(
                EventType::ClockTick,
                "test",
                None,
                serde_json::json!({}),
            )),
        )
        .await
        .expect("append deadlocked")
        .unwrap();

        assert_eq!(first.offset, 0);
        let reacted = rx.recv().await.unwrap();
        assert_eq!(reacted.offset, 0);
        let follow_up = rx.recv().await.unwrap();
        assert_eq!(follow_up.event_type, EventType::RunStarted);
        assert_eq!(follow_up.offset, 1);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let log = new_log().await;
        let (handle, _rx) = log.subscribe_channel(Filter::all(), 8).await;
        log.unsubscribe(handle).await;
        log.unsubscribe(handle).await;
    }
}
