//! SSE Broadcaster: fans `Envelope`s out to HTTP clients as Server-Sent Events. Each
//! client gets its own bounded channel; a full channel backpressures the Event Log's
//! `append` the same as any other in-process subscriber, so a slow client is felt as
//! latency, not as a dropped event.

use crate::error::WeaverResult;
use crate::event_log::{EventLog, Filter, SubscriptionHandle};
use crate::model::Envelope;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_stream::wrappers::{IntervalStream, ReceiverStream};
use tokio_stream::{Stream, StreamExt};

#[derive(Debug, Clone)]
pub enum SseFrame {
    Event(Envelope),
    Heartbeat,
}

pub struct SseBroadcaster {
    event_log: Arc<EventLog>,
    heartbeat_interval: Duration,
    channel_capacity: usize,
}

impl SseBroadcaster {
    pub fn new(event_log: Arc<EventLog>, heartbeat_interval: Duration, channel_capacity: usize) -> Self {
        Self {
            event_log,
            heartbeat_interval,
            channel_capacity,
        }
    }

    /// Subscribes a client. `run_id` filters to a single run's events; `last_event_id`
    /// resumes from just after that offset by replaying durable history before the live
    /// channel takes over, so a reconnecting client doesn't miss anything in between.
    ///
    /// Subscribes to the live channel *before* reading the backlog: if the order were
    /// reversed, any envelope appended between the backlog snapshot and the subscribe call
    /// would land in neither and be silently lost. Subscribing first means the backlog read
    /// can only ever overlap with the live channel, never miss a window — the overlap (an
    /// envelope that's both in the backlog and replayed live) is deduped by offset below.
    /// The returned stream unsubscribes from the Event Log when dropped (client disconnect).
    pub async fn subscribe(
        &self,
        run_id: Option<String>,
        last_event_id: Option<u64>,
    ) -> WeaverResult<impl Stream<Item = SseFrame> + Send + 'static> {
        let filter = Filter {
            event_types: None,
            run_id: run_id.clone(),
        };

        let (handle, rx) = self.event_log.subscribe_channel(filter.clone(), self.channel_capacity).await;
        metrics::gauge!("weaver_sse_clients_connected").increment(1.0);

        let backlog = match last_event_id {
            Some(since) => self.event_log.read_from(since, 10_000).await?,
            None => Vec::new(),
        };
        let backlog: Vec<Envelope> = backlog.into_iter().filter(|e| filter.matches(e)).collect();
        let backlog_max_offset = backlog.last().map(|e| e.offset);
        let backlog_stream = tokio_stream::iter(backlog.into_iter().map(SseFrame::Event));

        let live = ReceiverStream::new(rx)
            .filter(move |envelope| backlog_max_offset.map_or(true, |max| envelope.offset > max))
            .map(SseFrame::Event);

        let heartbeat =
            IntervalStream::new(tokio::time::interval(self.heartbeat_interval)).map(|_| SseFrame::Heartbeat);

        let tail = UnsubscribeOnDrop {
            inner: live.merge(heartbeat),
            event_log: self.event_log.clone(),
            handle,
        };

        Ok(backlog_stream.chain(tail))
    }
}

/// Wraps the live half of the stream so dropping it (the client disconnecting) releases
/// the Event Log subscription rather than leaking a subscriber that forwards into a
/// channel nobody is draining.
struct UnsubscribeOnDrop<S> {
    inner: S,
    event_log: Arc<EventLog>,
    handle: SubscriptionHandle,
}

impl<S: Stream + Unpin> Stream for UnsubscribeOnDrop<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_next(cx)
    }
}

impl<S> Drop for UnsubscribeOnDrop<S> {
    fn drop(&mut self) {
        metrics::gauge!("weaver_sse_clients_connected").decrement(1.0);
        let event_log = self.event_log.clone();
        let handle = self.handle;
        tokio::spawn(async move {
            event_log.unsubscribe(handle).await;
        });
    }
}
