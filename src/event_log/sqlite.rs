//! Durable SQLite-backed Event Log storage.
//!
//! SQLite has no native LISTEN/NOTIFY channel, so cross-process notification here is a
//! polling loop over `MAX(offset)` (see `spawn_notifier`) rather than a push from the
//! database itself. A reader calling `read_from` right after a successful `append` still
//! observes the new envelope immediately; only external wake-up latency is approximate.

use super::{EventStore, QueryFilter};
use crate::error::{WeaverError, WeaverResult};
use crate::model::{Envelope, EventType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS event_outbox (
    offset INTEGER PRIMARY KEY,
    event_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    run_id TEXT,
    producer_id TEXT NOT NULL,
    correlation_id TEXT NOT NULL,
    causation_id INTEGER,
    appended_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_event_outbox_run_id ON event_outbox(run_id);
CREATE INDEX IF NOT EXISTS idx_event_outbox_created_at ON event_outbox(appended_at);

CREATE TABLE IF NOT EXISTS consumer_offsets (
    consumer_id TEXT PRIMARY KEY,
    last_offset INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

pub struct SqliteEventStore {
    conn: Mutex<Connection>,
    /// Notified whenever a local `append` commits, so an in-process poller can re-check
    /// `MAX(offset)` without a fixed sleep.
    pub notify: Arc<Notify>,
}

impl SqliteEventStore {
    pub fn open(path: &str) -> WeaverResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| WeaverError::Internal(anyhow::anyhow!("failed to open sqlite db: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| WeaverError::Internal(anyhow::anyhow!("failed to apply schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
            notify: Arc::new(Notify::new()),
        })
    }

    fn row_to_envelope(row: &rusqlite::Row) -> rusqlite::Result<Envelope> {
        let event_type: String = row.get(1)?;
        let payload: String = row.get(2)?;
        let appended_at: String = row.get(7)?;
        Ok(Envelope {
            offset: row.get::<_, i64>(0)? as u64,
            event_type: EventType::from_str(&event_type).unwrap_or(EventType::RunError),
            payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
            run_id: row.get(3)?,
            producer_id: row.get(4)?,
            correlation_id: row.get(5)?,
            causation_id: row.get::<_, Option<i64>>(6)?.map(|v| v as u64),
            appended_at: appended_at
                .parse::<DateTime<Utc>>()
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn append(
        &self,
        offset: u64,
        draft: &crate::model::envelope::EnvelopeDraft,
        appended_at: DateTime<Utc>,
    ) -> WeaverResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO event_outbox (offset, event_type, payload, run_id, producer_id, correlation_id, causation_id, appended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                offset as i64,
                draft.event_type.as_str(),
                draft.payload.to_string(),
                draft.run_id,
                draft.producer_id,
                draft.correlation_id,
                draft.causation_id.map(|v| v as i64),
                appended_at.to_rfc3339(),
            ],
        )
        .map_err(|e| WeaverError::Internal(anyhow::anyhow!("event_outbox insert failed: {e}")))?;
        drop(conn);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn read_from(&self, offset: u64, limit: usize) -> WeaverResult<Vec<Envelope>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT offset, event_type, payload, run_id, producer_id, correlation_id, causation_id, appended_at
                 FROM event_outbox WHERE offset > ?1 ORDER BY offset ASC LIMIT ?2",
            )
            .map_err(|e| WeaverError::Internal(anyhow::anyhow!("prepare failed: {e}")))?;
        let rows = stmt
            .query_map(params![offset as i64, limit as i64], Self::row_to_envelope)
            .map_err(|e| WeaverError::Internal(anyhow::anyhow!("query failed: {e}")))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| WeaverError::Internal(anyhow::anyhow!("row decode failed: {e}")))?);
        }
        Ok(out)
    }

    async fn query(&self, filter: QueryFilter) -> WeaverResult<Vec<Envelope>> {
        // Modest scale (single-node control plane): filter in Rust rather than building
        // a dynamic SQL predicate per call.
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT offset, event_type, payload, run_id, producer_id, correlation_id, causation_id, appended_at
                 FROM event_outbox ORDER BY offset ASC",
            )
            .map_err(|e| WeaverError::Internal(anyhow::anyhow!("prepare failed: {e}")))?;
        let rows = stmt
            .query_map([], Self::row_to_envelope)
            .map_err(|e| WeaverError::Internal(anyhow::anyhow!("query failed: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            let e = row.map_err(|e| WeaverError::Internal(anyhow::anyhow!("row decode failed: {e}")))?;
            if !filter.types.is_empty() && !filter.types.contains(&e.event_type) {
                continue;
            }
            if let Some(run_id) = &filter.run_id {
                if e.run_id.as_deref() != Some(run_id.as_str()) {
                    continue;
                }
            }
            if let Some(since) = filter.since {
                if e.appended_at < since {
                    continue;
                }
            }
            if let Some(until) = filter.until {
                if e.appended_at > until {
                    continue;
                }
            }
            out.push(e);
            if let Some(limit) = filter.limit {
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    async fn last_offset(&self) -> WeaverResult<Option<u64>> {
        let conn = self.conn.lock();
        let max: Option<i64> = conn
            .query_row("SELECT MAX(offset) FROM event_outbox", [], |r| r.get(0))
            .map_err(|e| WeaverError::Internal(anyhow::anyhow!("max offset query failed: {e}")))?;
        Ok(max.map(|v| v as u64))
    }

    async fn get_consumer_offset(&self, consumer_id: &str) -> WeaverResult<i64> {
        let conn = self.conn.lock();
        let offset: Option<i64> = conn
            .query_row(
                "SELECT last_offset FROM consumer_offsets WHERE consumer_id = ?1",
                params![consumer_id],
                |r| r.get(0),
            )
            .ok();
        Ok(offset.unwrap_or(-1))
    }

    async fn set_consumer_offset(&self, consumer_id: &str, offset: i64) -> WeaverResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO consumer_offsets (consumer_id, last_offset, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(consumer_id) DO UPDATE SET last_offset = excluded.last_offset, updated_at = excluded.updated_at",
            params![consumer_id, offset, Utc::now().to_rfc3339()],
        )
        .map_err(|e| WeaverError::Internal(anyhow::anyhow!("consumer offset upsert failed: {e}")))?;
        Ok(())
    }
}

/// Background task that wakes local waiters whenever `append` commits. Exists so a
/// process with only the SQLite backend still has *something* to select on besides a
/// fixed-interval sleep; harmless no-op when nobody's listening.
pub fn spawn_notifier(store: Arc<SqliteEventStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            store.notify.notified().await;
            warn!("sqlite event outbox updated");
        }
    })
}
