use chrono::{Duration, Utc};
use rusqlite::params;

use crate::config::TelemetryConfig;
use crate::error::OpsResult;
use crate::ledger::normalize_load_id;
use crate::metrics::{TELEMETRY_EVENTS_INGESTED, TELEMETRY_EVENTS_SKIPPED};
use crate::store::{format_ts, map_sqlite_err, parse_ts, OpsDb};

use super::types::{IngestOutcome, RawTelemetryEvent, TelemetryEvent};

/// Hard cap on rows returned by a single query.
const TELEMETRY_QUERY_LIMIT: i64 = 2_000;

/// Append-only intake for vehicle telemetry.
///
/// Events are deduplicated on an identity key derived from their content, so
/// replaying the same gateway batch is harmless. Per tenant, only the most
/// recent `max_events_per_tenant` rows are retained.
#[derive(Clone)]
pub struct TelemetryIngestor {
    db: OpsDb,
    default_hours_back: i64,
    max_events_per_tenant: i64,
}

impl TelemetryIngestor {
    pub fn new(db: OpsDb, config: &TelemetryConfig) -> Self {
        Self {
            db,
            default_hours_back: config.default_hours_back,
            max_events_per_tenant: config.max_events_per_tenant,
        }
    }

    pub fn default_hours_back(&self) -> i64 {
        self.default_hours_back
    }

    /// Ingest a batch of raw events atomically.
    ///
    /// Malformed events are skipped, never rejected as a batch error; an
    /// event already present (same identity key) counts as skipped. Either
    /// the whole batch outcome commits or none of it does.
    pub fn ingest(
        &self,
        tenant_id: &str,
        events: &[RawTelemetryEvent],
    ) -> OpsResult<IngestOutcome> {
        let normalized: Vec<Option<TelemetryEvent>> =
            events.iter().map(normalize_event).collect();

        let outcome = self.db.with_tx(|tx| {
            let mut outcome = IngestOutcome::default();
            for event in &normalized {
                let Some(event) = event else {
                    outcome.skipped += 1;
                    continue;
                };
                let inserted = tx
                    .execute(
                        "INSERT INTO telemetry_events
                             (tenant_id, event_key, load_id, vehicle_id, gps_miles, stop_events, observed_at)
                         VALUES (?, ?, ?, ?, ?, ?, ?)
                         ON CONFLICT (tenant_id, event_key) DO NOTHING",
                        params![
                            tenant_id,
                            event.event_key,
                            event.load_id,
                            event.vehicle_id,
                            event.gps_miles,
                            event.stop_events,
                            format_ts(event.observed_at),
                        ],
                    )
                    .map_err(map_sqlite_err)?;
                if inserted > 0 {
                    outcome.ingested += 1;
                } else {
                    outcome.skipped += 1;
                }
            }

            tx.execute(
                "DELETE FROM telemetry_events
                 WHERE tenant_id = ?1
                   AND event_key NOT IN (
                     SELECT event_key FROM telemetry_events
                     WHERE tenant_id = ?1
                     ORDER BY observed_at DESC
                     LIMIT ?2
                   )",
                params![tenant_id, self.max_events_per_tenant],
            )
            .map_err(map_sqlite_err)?;

            Ok(outcome)
        })?;

        TELEMETRY_EVENTS_INGESTED.inc_by(outcome.ingested as u64);
        TELEMETRY_EVENTS_SKIPPED.inc_by(outcome.skipped as u64);
        tracing::debug!(
            tenant_id,
            ingested = outcome.ingested,
            skipped = outcome.skipped,
            "telemetry batch ingested"
        );
        Ok(outcome)
    }

    /// Query stored events for the given loads within a lookback window.
    ///
    /// Results come back ordered by load then observation time, capped at
    /// [`TELEMETRY_QUERY_LIMIT`] rows.
    pub fn query(
        &self,
        tenant_id: &str,
        load_ids: &[String],
        hours_back: Option<i64>,
    ) -> OpsResult<Vec<TelemetryEvent>> {
        if load_ids.is_empty() {
            return Ok(Vec::new());
        }
        let cutoff = self.cutoff(hours_back);
        let normalized: Vec<String> =
            load_ids.iter().map(|id| normalize_load_id(id)).collect();

        self.db.with_conn(|conn| {
            let placeholders = vec!["?"; normalized.len()].join(", ");
            let sql = format!(
                "SELECT event_key, load_id, vehicle_id, gps_miles, stop_events, observed_at
                 FROM telemetry_events
                 WHERE tenant_id = ? AND observed_at >= ? AND load_id IN ({placeholders})
                 ORDER BY load_id ASC, observed_at ASC
                 LIMIT {TELEMETRY_QUERY_LIMIT}"
            );
            let mut stmt = conn.prepare(&sql).map_err(map_sqlite_err)?;

            let mut args: Vec<&dyn rusqlite::ToSql> = vec![&tenant_id, &cutoff];
            for id in &normalized {
                args.push(id);
            }

            let mut events = Vec::new();
            let mut rows = stmt.query(args.as_slice()).map_err(map_sqlite_err)?;
            while let Some(row) = rows.next().map_err(map_sqlite_err)? {
                let observed_text: String = row.get(5).map_err(map_sqlite_err)?;
                events.push(TelemetryEvent {
                    event_key: row.get(0).map_err(map_sqlite_err)?,
                    load_id: row.get(1).map_err(map_sqlite_err)?,
                    vehicle_id: row.get(2).map_err(map_sqlite_err)?,
                    gps_miles: row.get(3).map_err(map_sqlite_err)?,
                    stop_events: row.get(4).map_err(map_sqlite_err)?,
                    observed_at: parse_ts(&observed_text)?,
                });
            }
            Ok(events)
        })
    }

    /// Highest GPS miles reading observed for a load within the window, or
    /// `None` when the load has no telemetry there.
    pub fn latest_miles(
        &self,
        tenant_id: &str,
        load_id: &str,
        hours_back: Option<i64>,
    ) -> OpsResult<Option<f64>> {
        let cutoff = self.cutoff(hours_back);
        let load_id = normalize_load_id(load_id);
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT MAX(gps_miles) FROM telemetry_events
                 WHERE tenant_id = ? AND load_id = ? AND observed_at >= ?",
                params![tenant_id, load_id, cutoff],
                |row| row.get::<_, Option<f64>>(0),
            )
            .map_err(map_sqlite_err)
        })
    }

    fn cutoff(&self, hours_back: Option<i64>) -> String {
        let hours = hours_back.unwrap_or(self.default_hours_back).max(1);
        format_ts(Utc::now() - Duration::hours(hours))
    }
}

/// Validate and normalize a raw event, deriving its dedup identity.
///
/// Returns `None` for events missing a load id or miles reading, or carrying
/// a non-finite/negative miles value. A missing observation timestamp
/// defaults to the ingest time.
fn normalize_event(raw: &RawTelemetryEvent) -> Option<TelemetryEvent> {
    let load_id = normalize_load_id(raw.load_id.as_deref()?);
    if load_id.is_empty() {
        return None;
    }
    let gps_miles = raw.gps_miles?;
    if !gps_miles.is_finite() || gps_miles < 0.0 {
        return None;
    }
    let observed_at = raw.observed_at.unwrap_or_else(Utc::now);
    let vehicle_id = raw
        .vehicle_id
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let stop_events = raw.stop_events.unwrap_or(0).max(0);

    let event_key = format!(
        "{load_id}|{vehicle}|{ts}|{gps_miles:.3}",
        vehicle = vehicle_id.as_deref().unwrap_or("-"),
        ts = format_ts(observed_at),
    );

    Some(TelemetryEvent {
        event_key,
        load_id,
        vehicle_id,
        gps_miles,
        stop_events,
        observed_at,
    })
}
