//! In-memory Event Log backend: used by default and by tests. Behaviorally equivalent
//! to the SQLite backend for everything the rest of the core relies on.

use super::{EventStore, QueryFilter};
use crate::error::WeaverResult;
use crate::model::Envelope;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct State {
    envelopes: Vec<Envelope>,
    consumer_offsets: HashMap<String, i64>,
}

pub struct InMemoryEventStore {
    state: Mutex<State>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        offset: u64,
        draft: &crate::model::envelope::EnvelopeDraft,
        appended_at: DateTime<Utc>,
    ) -> WeaverResult<()> {
        let envelope = Envelope {
            offset,
            event_type: draft.event_type,
            appended_at,
            producer_id: draft.producer_id.clone(),
            run_id: draft.run_id.clone(),
            payload: draft.payload.clone(),
            correlation_id: draft.correlation_id.clone(),
            causation_id: draft.causation_id,
        };
        self.state.lock().envelopes.push(envelope);
        Ok(())
    }

    async fn read_from(&self, offset: u64, limit: usize) -> WeaverResult<Vec<Envelope>> {
        let state = self.state.lock();
        Ok(state
            .envelopes
            .iter()
            .filter(|e| e.offset > offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn query(&self, filter: QueryFilter) -> WeaverResult<Vec<Envelope>> {
        let state = self.state.lock();
        let mut out: Vec<Envelope> = state
            .envelopes
            .iter()
            .filter(|e| {
                if !filter.types.is_empty() && !filter.types.contains(&e.event_type) {
                    return false;
                }
                if let Some(run_id) = &filter.run_id {
                    if e.run_id.as_deref() != Some(run_id.as_str()) {
                        return false;
                    }
                }
                if let Some(since) = filter.since {
                    if e.appended_at < since {
                        return false;
                    }
                }
                if let Some(until) = filter.until {
                    if e.appended_at > until {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn last_offset(&self) -> WeaverResult<Option<u64>> {
        Ok(self.state.lock().envelopes.last().map(|e| e.offset))
    }

    async fn get_consumer_offset(&self, consumer_id: &str) -> WeaverResult<i64> {
        Ok(*self
            .state
            .lock()
            .consumer_offsets
            .get(consumer_id)
            .unwrap_or(&-1))
    }

    async fn set_consumer_offset(&self, consumer_id: &str, offset: i64) -> WeaverResult<()> {
        self.state
            .lock()
            .consumer_offsets
            .insert(consumer_id.to_string(), offset);
        Ok(())
    }
}
