use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusqlite::{params, Connection};
use serde_json::json;

use crate::error::{not_found, OpsError, OpsResult};
use crate::sequence::{SequenceAllocator, SequenceKind};
use crate::store::{format_ts, map_sqlite_err, OpsDb};
use crate::telemetry::{RawTelemetryEvent, TelemetryIngestor};
use crate::timeline::{Timeline, TimelineEvent};

use super::normalize_load_id;
use super::types::{LoadRecord, LoadStatus, LoadUpsert, SeedScenario, SeedSummary};

/// Default page size for load listings.
const LOAD_LIST_LIMIT: i64 = 500;

/// Upper bound on loads created by a single seed run.
const SEED_MAX_LOADS: u32 = 200;

const SEED_CUSTOMERS: &[&str] = &[
    "Prairie Agra",
    "Bluestem Grain",
    "RedRiver Co-op",
    "Heartland Mills",
    "Ozark Feed & Seed",
    "Flint Hills Cattle Co",
];

const SEED_BROKERS: &[&str] = &[
    "TQL",
    "CH Robinson",
    "Landstar",
    "Echo Global",
    "Arrive Logistics",
];

const SEED_SITES: &[&str] = &[
    "Dodge City, KS",
    "Garden City, KS",
    "Amarillo, TX",
    "Lubbock, TX",
    "Enid, OK",
    "Liberal, KS",
    "Hays, KS",
    "Woodward, OK",
];

/// Durable registry of loads and their lifecycle state.
#[derive(Clone)]
pub struct LoadLedger {
    db: OpsDb,
    sequences: SequenceAllocator,
    timeline: Timeline,
}

impl LoadLedger {
    pub fn new(db: OpsDb, sequences: SequenceAllocator, timeline: Timeline) -> Self {
        Self {
            db,
            sequences,
            timeline,
        }
    }

    /// Allocate the next load identifier for a tenant.
    pub fn generate_load_id(&self, tenant_id: &str) -> OpsResult<String> {
        self.sequences.next_id(tenant_id, SequenceKind::Load)
    }

    /// Create a load, or merge the populated fields into an existing one.
    ///
    /// Creation requires customer, pickup and delivery locations; merges
    /// leave absent fields untouched and never change status. The merged
    /// record and its timeline event commit in one transaction.
    pub fn upsert_load(&self, tenant_id: &str, upsert: &LoadUpsert) -> OpsResult<LoadRecord> {
        let load_id = normalize_load_id(&upsert.load_id);
        if load_id.is_empty() {
            return Err(OpsError::Validation("load_id must not be empty".into()));
        }
        validate_upsert(upsert)?;

        let event_id = self.timeline.next_event_id(tenant_id)?;
        let (record, created) = self.db.with_tx(|tx| {
            let now = Utc::now();
            let existing = read_load(tx, tenant_id, &load_id)?;
            let created = existing.is_none();

            let record = match existing {
                None => {
                    let customer = require_field(&upsert.customer, "customer")?;
                    let pickup = require_field(&upsert.pickup_location, "pickup_location")?;
                    let delivery = require_field(&upsert.delivery_location, "delivery_location")?;
                    LoadRecord {
                        load_id: load_id.clone(),
                        customer,
                        broker: upsert.broker.clone(),
                        pickup_location: pickup,
                        delivery_location: delivery,
                        equipment_type: upsert
                            .equipment_type
                            .clone()
                            .unwrap_or_else(|| "flatbed".to_string()),
                        planned_miles: upsert.planned_miles.unwrap_or(0.0),
                        rate_total: upsert.rate_total.unwrap_or(0.0),
                        priority: upsert
                            .priority
                            .clone()
                            .unwrap_or_else(|| "normal".to_string()),
                        notes: upsert.notes.clone(),
                        source: upsert
                            .source
                            .clone()
                            .unwrap_or_else(|| "manual".to_string()),
                        status: LoadStatus::Created,
                        version: 1,
                        created_at: now,
                        updated_at: now,
                    }
                }
                Some(mut current) => {
                    merge_required(&mut current.customer, &upsert.customer, "customer")?;
                    merge_option(&mut current.broker, &upsert.broker);
                    merge_required(
                        &mut current.pickup_location,
                        &upsert.pickup_location,
                        "pickup_location",
                    )?;
                    merge_required(
                        &mut current.delivery_location,
                        &upsert.delivery_location,
                        "delivery_location",
                    )?;
                    merge_field(&mut current.equipment_type, &upsert.equipment_type);
                    if let Some(miles) = upsert.planned_miles {
                        current.planned_miles = miles;
                    }
                    if let Some(rate) = upsert.rate_total {
                        current.rate_total = rate;
                    }
                    merge_field(&mut current.priority, &upsert.priority);
                    merge_option(&mut current.notes, &upsert.notes);
                    merge_field(&mut current.source, &upsert.source);
                    current.version += 1;
                    current.updated_at = now;
                    current
                }
            };

            write_load(tx, tenant_id, &record)?;
            self.timeline.append(
                tx,
                tenant_id,
                &TimelineEvent {
                    event_id: event_id.clone(),
                    load_id: record.load_id.clone(),
                    event_type: (if created { "load_created" } else { "load_updated" })
                        .to_string(),
                    actor: "system".to_string(),
                    timestamp: record.updated_at,
                    details: json!({ "version": record.version, "source": record.source }),
                },
            )?;
            Ok((record, created))
        })?;

        tracing::info!(tenant_id, load_id = %record.load_id, created, "load upserted");
        Ok(record)
    }

    pub fn get_load(&self, tenant_id: &str, load_id: &str) -> OpsResult<LoadRecord> {
        let load_id = normalize_load_id(load_id);
        self.db
            .with_conn(|conn| read_load(conn, tenant_id, &load_id))?
            .ok_or_else(|| not_found("load", &load_id))
    }

    /// List a tenant's loads, most recently updated first.
    pub fn list_loads(
        &self,
        tenant_id: &str,
        status: Option<LoadStatus>,
    ) -> OpsResult<Vec<LoadRecord>> {
        self.db.with_conn(|conn| {
            let mut loads = Vec::new();
            let mut push = |row: &rusqlite::Row<'_>| -> OpsResult<()> {
                let data: String = row.get(0).map_err(map_sqlite_err)?;
                loads.push(parse_record(&data)?);
                Ok(())
            };

            match status {
                Some(status) => {
                    let mut stmt = conn
                        .prepare(
                            "SELECT data_json FROM loads
                             WHERE tenant_id = ? AND status = ?
                             ORDER BY updated_at DESC LIMIT ?",
                        )
                        .map_err(map_sqlite_err)?;
                    let mut rows = stmt
                        .query(params![tenant_id, status.as_str(), LOAD_LIST_LIMIT])
                        .map_err(map_sqlite_err)?;
                    while let Some(row) = rows.next().map_err(map_sqlite_err)? {
                        push(row)?;
                    }
                }
                None => {
                    let mut stmt = conn
                        .prepare(
                            "SELECT data_json FROM loads
                             WHERE tenant_id = ?
                             ORDER BY updated_at DESC LIMIT ?",
                        )
                        .map_err(map_sqlite_err)?;
                    let mut rows = stmt
                        .query(params![tenant_id, LOAD_LIST_LIMIT])
                        .map_err(map_sqlite_err)?;
                    while let Some(row) = rows.next().map_err(map_sqlite_err)? {
                        push(row)?;
                    }
                }
            }
            Ok(loads)
        })
    }

    /// Move a load forward in its lifecycle.
    ///
    /// Advancing to the current status is a no-op; moving backwards is a
    /// validation error. The status write, version bump and timeline event
    /// are atomic.
    pub fn advance_status(
        &self,
        tenant_id: &str,
        load_id: &str,
        target: LoadStatus,
        actor: &str,
    ) -> OpsResult<LoadRecord> {
        let load_id = normalize_load_id(load_id);
        let event_id = self.timeline.next_event_id(tenant_id)?;
        let (record, _changed) = self.db.with_tx(|tx| {
            let mut record =
                read_load(tx, tenant_id, &load_id)?.ok_or_else(|| not_found("load", &load_id))?;
            if target.rank() < record.status.rank() {
                return Err(OpsError::Validation(format!(
                    "cannot move load {} from {} back to {}",
                    record.load_id,
                    record.status.as_str(),
                    target.as_str()
                )));
            }
            if target == record.status {
                return Ok((record, false));
            }
            record.status = target;
            record.version += 1;
            record.updated_at = Utc::now();
            write_load(tx, tenant_id, &record)?;
            self.timeline.append(
                tx,
                tenant_id,
                &TimelineEvent {
                    event_id: event_id.clone(),
                    load_id: record.load_id.clone(),
                    event_type: "status_advanced".to_string(),
                    actor: actor.to_string(),
                    timestamp: record.updated_at,
                    details: json!({ "status": record.status.as_str() }),
                },
            )?;
            Ok((record, true))
        })?;
        Ok(record)
    }

    /// Populate a tenant with a reproducible synthetic scenario.
    ///
    /// The same seed always produces the same customers, routes, rates and
    /// telemetry profile against a fresh tenant. A slice of loads get GPS
    /// readings far above plan, so downstream review flags them.
    pub fn seed_synthetic_scenario(
        &self,
        tenant_id: &str,
        scenario: &SeedScenario,
        telemetry: &TelemetryIngestor,
    ) -> OpsResult<SeedSummary> {
        if !(0.0..=1.0).contains(&scenario.exception_ratio) {
            return Err(OpsError::Validation(
                "exception_ratio must be within [0, 1]".into(),
            ));
        }
        if scenario.loads > SEED_MAX_LOADS {
            return Err(OpsError::Validation(format!(
                "loads must be at most {SEED_MAX_LOADS}"
            )));
        }

        let mut rng = StdRng::seed_from_u64(scenario.seed);
        let mut summary = SeedSummary {
            loads_created: 0,
            exceptions: 0,
            load_ids: Vec::new(),
        };
        let now = Utc::now();

        for i in 0..scenario.loads {
            let customer = SEED_CUSTOMERS[rng.gen_range(0..SEED_CUSTOMERS.len())];
            let broker = SEED_BROKERS[rng.gen_range(0..SEED_BROKERS.len())];
            let pickup_idx = rng.gen_range(0..SEED_SITES.len());
            let delivery_idx =
                (pickup_idx + 1 + rng.gen_range(0..SEED_SITES.len() - 1)) % SEED_SITES.len();
            let planned_miles = round1(rng.gen_range(18.0..240.0));
            let rate_total = round2(planned_miles * rng.gen_range(2.6..4.3));
            let high_priority = rng.gen_bool(0.15);
            let is_exception = rng.gen_bool(scenario.exception_ratio);
            let gps_factor = if is_exception {
                rng.gen_range(1.25..1.6)
            } else {
                rng.gen_range(0.96..1.04)
            };
            let stop_events = rng.gen_range(0..4i64);
            let vehicle = format!("TRK-{}", rng.gen_range(100..1000));

            let load_id = self.generate_load_id(tenant_id)?;
            self.upsert_load(
                tenant_id,
                &LoadUpsert {
                    load_id: load_id.clone(),
                    customer: Some(customer.to_string()),
                    broker: Some(broker.to_string()),
                    pickup_location: Some(SEED_SITES[pickup_idx].to_string()),
                    delivery_location: Some(SEED_SITES[delivery_idx].to_string()),
                    equipment_type: Some("bulk".to_string()),
                    planned_miles: Some(planned_miles),
                    rate_total: Some(rate_total),
                    priority: Some((if high_priority { "high" } else { "normal" }).to_string()),
                    notes: None,
                    source: Some("synthetic".to_string()),
                },
            )?;

            let final_miles = round1(planned_miles * gps_factor);
            let events = [
                RawTelemetryEvent {
                    load_id: Some(load_id.clone()),
                    vehicle_id: Some(vehicle.clone()),
                    gps_miles: Some(round1(final_miles * 0.55)),
                    stop_events: Some(stop_events),
                    observed_at: Some(now - Duration::minutes(2 * i as i64 + 1)),
                },
                RawTelemetryEvent {
                    load_id: Some(load_id.clone()),
                    vehicle_id: Some(vehicle),
                    gps_miles: Some(final_miles),
                    stop_events: Some(stop_events),
                    observed_at: Some(now - Duration::minutes(2 * i as i64)),
                },
            ];
            telemetry.ingest(tenant_id, &events)?;

            summary.loads_created += 1;
            if is_exception {
                summary.exceptions += 1;
            }
            summary.load_ids.push(load_id);
        }

        tracing::info!(
            tenant_id,
            loads = summary.loads_created,
            exceptions = summary.exceptions,
            "synthetic scenario seeded"
        );
        Ok(summary)
    }
}

fn validate_upsert(upsert: &LoadUpsert) -> OpsResult<()> {
    if let Some(miles) = upsert.planned_miles {
        if !miles.is_finite() || miles < 0.0 {
            return Err(OpsError::Validation(
                "planned_miles must be a non-negative number".into(),
            ));
        }
    }
    if let Some(rate) = upsert.rate_total {
        if !rate.is_finite() || rate < 0.0 {
            return Err(OpsError::Validation(
                "rate_total must be a non-negative number".into(),
            ));
        }
    }
    if let Some(priority) = upsert.priority.as_deref() {
        if priority != "normal" && priority != "high" {
            return Err(OpsError::Validation(format!(
                "priority must be \"normal\" or \"high\", got {priority:?}"
            )));
        }
    }
    Ok(())
}

fn require_field(value: &Option<String>, name: &str) -> OpsResult<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| OpsError::Validation(format!("{name} is required to create a load")))
}

fn merge_field(target: &mut String, update: &Option<String>) {
    if let Some(value) = update {
        *target = value.clone();
    }
}

/// Merge a field that creation required non-empty; an explicit blank can
/// never sneak past the creation rule through an update.
fn merge_required(
    target: &mut String,
    update: &Option<String>,
    name: &str,
) -> OpsResult<()> {
    if let Some(value) = update {
        let value = value.trim();
        if value.is_empty() {
            return Err(OpsError::Validation(format!("{name} must not be blank")));
        }
        *target = value.to_string();
    }
    Ok(())
}

fn merge_option(target: &mut Option<String>, update: &Option<String>) {
    if update.is_some() {
        *target = update.clone();
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn parse_record(data: &str) -> OpsResult<LoadRecord> {
    serde_json::from_str(data).map_err(|e| OpsError::Storage(format!("corrupt load record: {e}")))
}

pub(crate) fn read_load(
    conn: &Connection,
    tenant_id: &str,
    load_id: &str,
) -> OpsResult<Option<LoadRecord>> {
    conn.query_row(
        "SELECT data_json FROM loads WHERE tenant_id = ? AND load_id = ?",
        params![tenant_id, load_id],
        |row| row.get::<_, String>(0),
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(map_sqlite_err(other)),
    })?
    .map(|data| parse_record(&data))
    .transpose()
}

pub(crate) fn write_load(
    conn: &Connection,
    tenant_id: &str,
    record: &LoadRecord,
) -> OpsResult<()> {
    let data = serde_json::to_string(record)
        .map_err(|e| OpsError::Storage(format!("serialize load record: {e}")))?;
    conn.execute(
        "INSERT INTO loads (tenant_id, load_id, status, data_json, updated_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (tenant_id, load_id) DO UPDATE SET
             status = excluded.status,
             data_json = excluded.data_json,
             updated_at = excluded.updated_at",
        params![
            tenant_id,
            record.load_id,
            record.status.as_str(),
            data,
            format_ts(record.updated_at),
        ],
    )
    .map_err(map_sqlite_err)?;
    Ok(())
}
