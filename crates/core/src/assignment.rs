//! Automated dispatch decisions for newly created loads.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{OpsError, OpsResult};
use crate::ledger::{normalize_load_id, LoadRecord, LoadStatus};
use crate::metrics::ASSIGNMENT_DECISIONS;
use crate::sequence::{SequenceAllocator, SequenceKind};
use crate::store::{format_ts, map_sqlite_err, OpsDb};
use crate::timeline::{Timeline, TimelineEvent};

/// How a load was routed to a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMode {
    /// Dispatched without human involvement.
    Autonomous,
    /// Queued for a dispatcher to place by hand.
    Manual,
}

impl AssignmentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentMode::Autonomous => "autonomous",
            AssignmentMode::Manual => "manual",
        }
    }
}

/// A persisted dispatch decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub assignment_id: String,
    pub load_id: String,
    pub mode: AssignmentMode,
    /// Machine-readable reason for the chosen mode.
    pub rationale_code: String,
    pub decided_at: DateTime<Utc>,
}

/// Decides, for each created load, whether dispatch can be autonomous.
#[derive(Clone)]
pub struct AssignmentEngine {
    db: OpsDb,
    sequences: SequenceAllocator,
    timeline: Timeline,
}

impl AssignmentEngine {
    pub fn new(db: OpsDb, sequences: SequenceAllocator, timeline: Timeline) -> Self {
        Self {
            db,
            sequences,
            timeline,
        }
    }

    /// Produce and persist a dispatch decision for a load.
    ///
    /// Every call appends a new record; re-assigning a load never overwrites
    /// an earlier decision. The record, the timeline event and the load's
    /// move from `created` to `assigned` commit in one transaction; a load
    /// already past `created` keeps its current status.
    pub fn auto_assign(&self, tenant_id: &str, load_id: &str) -> OpsResult<AssignmentRecord> {
        let load_id = normalize_load_id(load_id);
        let assignment_id = self.sequences.next_id(tenant_id, SequenceKind::Assignment)?;
        let event_id = self.timeline.next_event_id(tenant_id)?;

        let record = self.db.with_tx(|tx| {
            let mut load = crate::ledger::read_load(tx, tenant_id, &load_id)?
                .ok_or_else(|| crate::error::not_found("load", &load_id))?;

            let (mode, rationale_code) = decide_mode(&load);
            let record = AssignmentRecord {
                assignment_id: assignment_id.clone(),
                load_id: load.load_id.clone(),
                mode,
                rationale_code: rationale_code.to_string(),
                decided_at: Utc::now(),
            };

            let data = serde_json::to_string(&record)
                .map_err(|e| OpsError::Storage(format!("serialize assignment: {e}")))?;
            tx.execute(
                "INSERT INTO assignments
                     (tenant_id, assignment_id, load_id, mode, decided_at, data_json)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    tenant_id,
                    record.assignment_id,
                    record.load_id,
                    record.mode.as_str(),
                    format_ts(record.decided_at),
                    data,
                ],
            )
            .map_err(map_sqlite_err)?;

            if load.status == LoadStatus::Created {
                load.status = LoadStatus::Assigned;
                load.version += 1;
                load.updated_at = record.decided_at;
                crate::ledger::write_load(tx, tenant_id, &load)?;
            }

            self.timeline.append(
                tx,
                tenant_id,
                &TimelineEvent {
                    event_id: event_id.clone(),
                    load_id: record.load_id.clone(),
                    event_type: "load_assigned".to_string(),
                    actor: "assignment_engine".to_string(),
                    timestamp: record.decided_at,
                    details: json!({
                        "assignment_id": record.assignment_id,
                        "mode": record.mode.as_str(),
                        "rationale_code": record.rationale_code,
                    }),
                },
            )?;

            Ok(record)
        })?;

        ASSIGNMENT_DECISIONS
            .with_label_values(&[record.mode.as_str()])
            .inc();
        tracing::info!(
            tenant_id,
            load_id = %record.load_id,
            mode = record.mode.as_str(),
            rationale = %record.rationale_code,
            "load assigned"
        );
        Ok(record)
    }

    /// List a tenant's assignment decisions, optionally scoped to one load.
    pub fn list_assignments(
        &self,
        tenant_id: &str,
        load_id: Option<&str>,
    ) -> OpsResult<Vec<AssignmentRecord>> {
        let load_id = load_id.map(normalize_load_id);
        self.db.with_conn(|conn| {
            let mut records = Vec::new();
            let mut push = |row: &rusqlite::Row<'_>| -> OpsResult<()> {
                let data: String = row.get(0).map_err(map_sqlite_err)?;
                records.push(
                    serde_json::from_str(&data)
                        .map_err(|e| OpsError::Storage(format!("corrupt assignment: {e}")))?,
                );
                Ok(())
            };

            match load_id.as_deref() {
                Some(load_id) => {
                    let mut stmt = conn
                        .prepare(
                            "SELECT data_json FROM assignments
                             WHERE tenant_id = ? AND load_id = ?
                             ORDER BY decided_at DESC",
                        )
                        .map_err(map_sqlite_err)?;
                    let mut rows = stmt
                        .query(params![tenant_id, load_id])
                        .map_err(map_sqlite_err)?;
                    while let Some(row) = rows.next().map_err(map_sqlite_err)? {
                        push(row)?;
                    }
                }
                None => {
                    let mut stmt = conn
                        .prepare(
                            "SELECT data_json FROM assignments
                             WHERE tenant_id = ?
                             ORDER BY decided_at DESC",
                        )
                        .map_err(map_sqlite_err)?;
                    let mut rows = stmt.query(params![tenant_id]).map_err(map_sqlite_err)?;
                    while let Some(row) = rows.next().map_err(map_sqlite_err)? {
                        push(row)?;
                    }
                }
            }
            Ok(records)
        })
    }
}

/// The dispatch heuristic. Pure; decisions depend only on the load record.
fn decide_mode(load: &LoadRecord) -> (AssignmentMode, &'static str) {
    if load.planned_miles <= 0.0 || load.rate_total <= 0.0 {
        (AssignmentMode::Manual, "incomplete_route_profile")
    } else if load.priority == "high" {
        (AssignmentMode::Manual, "high_priority_requires_dispatcher")
    } else {
        (AssignmentMode::Autonomous, "complete_profile_no_risk_flags")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LoadLedger, LoadUpsert};

    fn engine() -> (AssignmentEngine, LoadLedger) {
        let db = OpsDb::in_memory().unwrap();
        let sequences = SequenceAllocator::new(db.clone());
        let timeline = Timeline::new(db.clone(), sequences.clone());
        let ledger = LoadLedger::new(db.clone(), sequences.clone(), timeline.clone());
        (AssignmentEngine::new(db, sequences, timeline), ledger)
    }

    fn upsert(load_id: &str) -> LoadUpsert {
        LoadUpsert {
            load_id: load_id.to_string(),
            customer: Some("Prairie Agra".to_string()),
            pickup_location: Some("Dodge City, KS".to_string()),
            delivery_location: Some("Amarillo, TX".to_string()),
            planned_miles: Some(120.0),
            rate_total: Some(410.50),
            ..Default::default()
        }
    }

    #[test]
    fn test_complete_profile_goes_autonomous() {
        let (engine, ledger) = engine();
        ledger.upsert_load("t1", &upsert("LOAD01000")).unwrap();
        let record = engine.auto_assign("t1", "load01000").unwrap();
        assert_eq!(record.mode, AssignmentMode::Autonomous);
        assert_eq!(record.rationale_code, "complete_profile_no_risk_flags");
        assert_eq!(record.assignment_id, "ASG-000001");

        let load = ledger.get_load("t1", "LOAD01000").unwrap();
        assert_eq!(load.status, LoadStatus::Assigned);
    }

    #[test]
    fn test_missing_miles_requires_dispatcher() {
        let (engine, ledger) = engine();
        let mut up = upsert("LOAD01000");
        up.planned_miles = None;
        ledger.upsert_load("t1", &up).unwrap();
        let record = engine.auto_assign("t1", "LOAD01000").unwrap();
        assert_eq!(record.mode, AssignmentMode::Manual);
        assert_eq!(record.rationale_code, "incomplete_route_profile");
    }

    #[test]
    fn test_high_priority_requires_dispatcher() {
        let (engine, ledger) = engine();
        let mut up = upsert("LOAD01000");
        up.priority = Some("high".to_string());
        ledger.upsert_load("t1", &up).unwrap();
        let record = engine.auto_assign("t1", "LOAD01000").unwrap();
        assert_eq!(record.mode, AssignmentMode::Manual);
        assert_eq!(record.rationale_code, "high_priority_requires_dispatcher");
    }

    #[test]
    fn test_reassignment_appends_a_new_record() {
        let (engine, ledger) = engine();
        ledger.upsert_load("t1", &upsert("LOAD01000")).unwrap();
        let first = engine.auto_assign("t1", "LOAD01000").unwrap();
        let second = engine.auto_assign("t1", "LOAD01000").unwrap();

        assert_eq!(first.assignment_id, "ASG-000001");
        assert_eq!(second.assignment_id, "ASG-000002");

        let records = engine.list_assignments("t1", Some("LOAD01000")).unwrap();
        assert_eq!(records.len(), 2);
        // The load stays assigned; the earlier decision is not overwritten.
        let load = ledger.get_load("t1", "LOAD01000").unwrap();
        assert_eq!(load.status, LoadStatus::Assigned);
        assert_eq!(load.version, 2);
    }

    #[test]
    fn test_assigning_a_delivered_load_keeps_its_status() {
        let (engine, ledger) = engine();
        ledger.upsert_load("t1", &upsert("LOAD01000")).unwrap();
        ledger
            .advance_status("t1", "LOAD01000", LoadStatus::Delivered, "driver_app")
            .unwrap();

        let record = engine.auto_assign("t1", "LOAD01000").unwrap();
        assert_eq!(record.mode, AssignmentMode::Autonomous);
        assert_eq!(
            ledger.get_load("t1", "LOAD01000").unwrap().status,
            LoadStatus::Delivered
        );
    }

    #[test]
    fn test_unknown_load_is_not_found() {
        let (engine, _ledger) = engine();
        assert!(matches!(
            engine.auto_assign("t1", "LOAD09999"),
            Err(OpsError::NotFound { .. })
        ));
    }

    #[test]
    fn test_list_assignments_scoped_to_load() {
        let (engine, ledger) = engine();
        ledger.upsert_load("t1", &upsert("LOAD01000")).unwrap();
        ledger.upsert_load("t1", &upsert("LOAD01001")).unwrap();
        engine.auto_assign("t1", "LOAD01000").unwrap();
        engine.auto_assign("t1", "LOAD01001").unwrap();

        let all = engine.list_assignments("t1", None).unwrap();
        assert_eq!(all.len(), 2);
        let scoped = engine.list_assignments("t1", Some("load01000")).unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].load_id, "LOAD01000");
    }
}
