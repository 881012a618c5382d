//! Append-only operational timeline per tenant.
//!
//! Every load mutation leaves an immutable event here, giving each tenant a
//! replayable audit trail alongside the export artifacts.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::OpsResult;
use crate::sequence::{SequenceAllocator, SequenceKind};
use crate::store::{format_ts, map_sqlite_err, parse_ts, OpsDb};

/// Per-tenant retention cap; oldest events beyond it are pruned on append.
const TIMELINE_RETENTION: i64 = 5_000;

/// Default page size for timeline queries.
const TIMELINE_QUERY_LIMIT: i64 = 300;

/// One immutable operational event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub event_id: String,
    pub load_id: String,
    pub event_type: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}

/// Recorder and reader for the per-tenant timeline.
#[derive(Clone)]
pub struct Timeline {
    db: OpsDb,
    sequences: SequenceAllocator,
}

impl Timeline {
    pub fn new(db: OpsDb, sequences: SequenceAllocator) -> Self {
        Self { db, sequences }
    }

    /// Append an event in its own transaction and prune to the retention cap.
    ///
    /// Components that mutate other records alongside the event use
    /// [`Timeline::next_event_id`] plus [`Timeline::append`] inside their own
    /// transaction instead, so the event commits atomically with the change
    /// it describes.
    pub fn record(
        &self,
        tenant_id: &str,
        load_id: &str,
        event_type: &str,
        actor: &str,
        details: serde_json::Value,
    ) -> OpsResult<TimelineEvent> {
        let event = TimelineEvent {
            event_id: self.next_event_id(tenant_id)?,
            load_id: load_id.to_string(),
            event_type: event_type.to_string(),
            actor: actor.to_string(),
            timestamp: Utc::now(),
            details,
        };
        self.db.with_tx(|tx| self.append(tx, tenant_id, &event))?;
        tracing::debug!(tenant_id, event_type, load_id, "timeline event recorded");
        Ok(event)
    }

    /// Allocate the next event id. Runs its own transaction, so callers must
    /// invoke this before opening theirs; an id burned by a later rollback
    /// is only a gap.
    pub(crate) fn next_event_id(&self, tenant_id: &str) -> OpsResult<String> {
        self.sequences.next_id(tenant_id, SequenceKind::TimelineEvent)
    }

    /// Write a prepared event on the caller's connection and prune the
    /// tenant's log to the retention cap.
    pub(crate) fn append(
        &self,
        conn: &Connection,
        tenant_id: &str,
        event: &TimelineEvent,
    ) -> OpsResult<()> {
        conn.execute(
            "INSERT INTO timeline (tenant_id, event_id, load_id, event_type, actor, timestamp, details_json)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                tenant_id,
                event.event_id,
                event.load_id,
                event.event_type,
                event.actor,
                format_ts(event.timestamp),
                event.details.to_string(),
            ],
        )
        .map_err(map_sqlite_err)?;

        conn.execute(
            "DELETE FROM timeline
             WHERE tenant_id = ?1
               AND event_id NOT IN (
                 SELECT event_id FROM timeline
                 WHERE tenant_id = ?1
                 ORDER BY timestamp DESC
                 LIMIT ?2
               )",
            params![tenant_id, TIMELINE_RETENTION],
        )
        .map_err(map_sqlite_err)?;

        Ok(())
    }

    /// List events for a tenant, newest first, optionally scoped to a load.
    pub fn list(&self, tenant_id: &str, load_id: Option<&str>) -> OpsResult<Vec<TimelineEvent>> {
        self.db.with_conn(|conn| {
            let mut events = Vec::new();
            let mut push = |row: &rusqlite::Row<'_>| -> OpsResult<()> {
                let timestamp_text: String = row.get(4).map_err(map_sqlite_err)?;
                let details_text: String = row.get(5).map_err(map_sqlite_err)?;
                events.push(TimelineEvent {
                    event_id: row.get(0).map_err(map_sqlite_err)?,
                    load_id: row.get(1).map_err(map_sqlite_err)?,
                    event_type: row.get(2).map_err(map_sqlite_err)?,
                    actor: row.get(3).map_err(map_sqlite_err)?,
                    timestamp: parse_ts(&timestamp_text)?,
                    details: serde_json::from_str(&details_text)
                        .unwrap_or(serde_json::Value::Null),
                });
                Ok(())
            };

            let sql_base = "SELECT event_id, load_id, event_type, actor, timestamp, details_json
                 FROM timeline WHERE tenant_id = ?";
            match load_id {
                Some(load_id) => {
                    let sql = format!(
                        "{sql_base} AND load_id = ? ORDER BY timestamp DESC LIMIT {TIMELINE_QUERY_LIMIT}"
                    );
                    let mut stmt = conn.prepare(&sql).map_err(map_sqlite_err)?;
                    let mut rows = stmt
                        .query(params![tenant_id, load_id])
                        .map_err(map_sqlite_err)?;
                    while let Some(row) = rows.next().map_err(map_sqlite_err)? {
                        push(row)?;
                    }
                }
                None => {
                    let sql =
                        format!("{sql_base} ORDER BY timestamp DESC LIMIT {TIMELINE_QUERY_LIMIT}");
                    let mut stmt = conn.prepare(&sql).map_err(map_sqlite_err)?;
                    let mut rows = stmt.query(params![tenant_id]).map_err(map_sqlite_err)?;
                    while let Some(row) = rows.next().map_err(map_sqlite_err)? {
                        push(row)?;
                    }
                }
            }
            Ok(events)
        })
    }
}
