//! Ticket review: reconcile extracted ticket data against telemetry and
//! decide whether a human needs to look.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::DecisionConfig;
use crate::error::{not_found, OpsError, OpsResult};
use crate::ledger::{normalize_load_id, read_load, write_load, LoadStatus};
use crate::metrics::{MILES_VARIANCE, TICKET_VERDICTS};
use crate::sequence::{SequenceAllocator, SequenceKind};
use crate::store::{format_ts, map_sqlite_err, OpsDb};
use crate::telemetry::TelemetryIngestor;
use crate::timeline::{Timeline, TimelineEvent};

/// Outcome of a ticket review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketDecision {
    AutoApproved,
    NeedsReview,
}

impl TicketDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketDecision::AutoApproved => "auto_approved",
            TicketDecision::NeedsReview => "needs_review",
        }
    }
}

/// A persisted review decision for one load's ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketVerdict {
    pub verdict_id: String,
    pub load_id: String,
    /// Extraction confidence reported by the upstream document pipeline.
    pub confidence: f64,
    /// Fractional deviation between planned and observed miles; `None` when
    /// the load had no telemetry in the review window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miles_variance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_miles: Option<f64>,
    pub planned_miles: f64,
    pub decision: TicketDecision,
    /// Whether the ticket is settled. Auto-approved verdicts are settled
    /// immediately; needs-review verdicts await a human.
    pub reviewed: bool,
    pub created_at: DateTime<Utc>,
}

/// Inputs to a review.
#[derive(Debug, Clone, Deserialize)]
pub struct TicketReviewRequest {
    pub load_id: String,
    pub extraction_confidence: f64,
    /// Telemetry lookback override in hours; defaults to the configured window.
    pub hours_back: Option<i64>,
}

/// Thresholds an auto-approval must clear.
#[derive(Debug, Clone, Copy)]
pub struct DecisionThresholds {
    pub confidence: f64,
    pub miles_variance: f64,
}

impl From<&DecisionConfig> for DecisionThresholds {
    fn from(config: &DecisionConfig) -> Self {
        Self {
            confidence: config.confidence_threshold,
            miles_variance: config.miles_variance_threshold,
        }
    }
}

/// The approval rule. Auto-approval needs both a confident extraction and a
/// telemetry reading close to plan; a load with no telemetry in the window
/// always goes to a human.
pub fn decide(
    confidence: f64,
    miles_variance: Option<f64>,
    thresholds: &DecisionThresholds,
) -> TicketDecision {
    match miles_variance {
        Some(variance)
            if confidence >= thresholds.confidence && variance <= thresholds.miles_variance =>
        {
            TicketDecision::AutoApproved
        }
        _ => TicketDecision::NeedsReview,
    }
}

/// Reviews tickets and persists the resulting verdicts.
#[derive(Clone)]
pub struct TicketDecisionEngine {
    db: OpsDb,
    sequences: SequenceAllocator,
    timeline: Timeline,
    telemetry: TelemetryIngestor,
    thresholds: DecisionThresholds,
}

impl TicketDecisionEngine {
    pub fn new(
        db: OpsDb,
        sequences: SequenceAllocator,
        timeline: Timeline,
        telemetry: TelemetryIngestor,
        config: &DecisionConfig,
    ) -> Self {
        Self {
            db,
            sequences,
            timeline,
            telemetry,
            thresholds: DecisionThresholds::from(config),
        }
    }

    /// Review one load's ticket and persist the verdict.
    ///
    /// The verdict insert, the load's move to `ticketed` and the timeline
    /// event commit together.
    pub fn review(
        &self,
        tenant_id: &str,
        request: &TicketReviewRequest,
    ) -> OpsResult<TicketVerdict> {
        if !request.extraction_confidence.is_finite()
            || !(0.0..=1.0).contains(&request.extraction_confidence)
        {
            return Err(OpsError::Validation(
                "extraction_confidence must be within [0, 1]".into(),
            ));
        }

        let load_id = normalize_load_id(&request.load_id);
        // Read state before entering the write transaction so the
        // connection lock is never held across component calls.
        let telemetry_miles = self
            .telemetry
            .latest_miles(tenant_id, &load_id, request.hours_back)?;
        let verdict_id = self.sequences.next_id(tenant_id, SequenceKind::Verdict)?;
        let event_id = self.timeline.next_event_id(tenant_id)?;

        let verdict = self.db.with_tx(|tx| {
            let mut load =
                read_load(tx, tenant_id, &load_id)?.ok_or_else(|| not_found("load", &load_id))?;

            let miles_variance = telemetry_miles
                .map(|miles| (load.planned_miles - miles).abs() / load.planned_miles.max(1.0));
            let decision = decide(request.extraction_confidence, miles_variance, &self.thresholds);

            let verdict = TicketVerdict {
                verdict_id: verdict_id.clone(),
                load_id: load.load_id.clone(),
                confidence: request.extraction_confidence,
                miles_variance,
                telemetry_miles,
                planned_miles: load.planned_miles,
                decision,
                reviewed: decision == TicketDecision::AutoApproved,
                created_at: Utc::now(),
            };

            let data = serde_json::to_string(&verdict)
                .map_err(|e| OpsError::Storage(format!("serialize verdict: {e}")))?;
            tx.execute(
                "INSERT INTO verdicts
                     (tenant_id, verdict_id, load_id, decision, created_at, data_json)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    tenant_id,
                    verdict.verdict_id,
                    verdict.load_id,
                    verdict.decision.as_str(),
                    format_ts(verdict.created_at),
                    data,
                ],
            )
            .map_err(map_sqlite_err)?;

            if load.status.rank() < LoadStatus::Ticketed.rank() {
                load.status = LoadStatus::Ticketed;
                load.version += 1;
                load.updated_at = verdict.created_at;
                write_load(tx, tenant_id, &load)?;
            }

            self.timeline.append(
                tx,
                tenant_id,
                &TimelineEvent {
                    event_id: event_id.clone(),
                    load_id: verdict.load_id.clone(),
                    event_type: "ticket_reviewed".to_string(),
                    actor: "decision_engine".to_string(),
                    timestamp: verdict.created_at,
                    details: json!({
                        "verdict_id": verdict.verdict_id,
                        "decision": verdict.decision.as_str(),
                        "miles_variance": verdict.miles_variance,
                    }),
                },
            )?;

            Ok(verdict)
        })?;

        TICKET_VERDICTS
            .with_label_values(&[verdict.decision.as_str()])
            .inc();
        if let Some(variance) = verdict.miles_variance {
            MILES_VARIANCE.observe(variance);
        }
        tracing::info!(
            tenant_id,
            load_id = %verdict.load_id,
            decision = verdict.decision.as_str(),
            "ticket reviewed"
        );
        Ok(verdict)
    }

    /// List a tenant's verdicts, newest first, optionally scoped to one load.
    pub fn list_verdicts(
        &self,
        tenant_id: &str,
        load_id: Option<&str>,
    ) -> OpsResult<Vec<TicketVerdict>> {
        let load_id = load_id.map(normalize_load_id);
        self.db.with_conn(|conn| {
            let mut verdicts = Vec::new();
            let mut push = |row: &rusqlite::Row<'_>| -> OpsResult<()> {
                let data: String = row.get(0).map_err(map_sqlite_err)?;
                verdicts.push(
                    serde_json::from_str(&data)
                        .map_err(|e| OpsError::Storage(format!("corrupt verdict: {e}")))?,
                );
                Ok(())
            };

            match load_id.as_deref() {
                Some(load_id) => {
                    let mut stmt = conn
                        .prepare(
                            "SELECT data_json FROM verdicts
                             WHERE tenant_id = ? AND load_id = ?
                             ORDER BY created_at DESC",
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
                            "SELECT data_json FROM verdicts
                             WHERE tenant_id = ?
                             ORDER BY created_at DESC",
                        )
                        .map_err(map_sqlite_err)?;
                    let mut rows = stmt.query(params![tenant_id]).map_err(map_sqlite_err)?;
                    while let Some(row) = rows.next().map_err(map_sqlite_err)? {
                        push(row)?;
                    }
                }
            }
            Ok(verdicts)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::ledger::{LoadLedger, LoadUpsert};
    use crate::telemetry::RawTelemetryEvent;

    struct Harness {
        timeline: Timeline,
        ledger: LoadLedger,
        telemetry: TelemetryIngestor,
        engine: TicketDecisionEngine,
    }

    fn harness() -> Harness {
        let db = OpsDb::in_memory().unwrap();
        let sequences = SequenceAllocator::new(db.clone());
        let timeline = Timeline::new(db.clone(), sequences.clone());
        let ledger = LoadLedger::new(db.clone(), sequences.clone(), timeline.clone());
        let telemetry = TelemetryIngestor::new(db.clone(), &TelemetryConfig::default());
        let engine = TicketDecisionEngine::new(
            db,
            sequences,
            timeline.clone(),
            telemetry.clone(),
            &DecisionConfig::default(),
        );
        Harness {
            timeline,
            ledger,
            telemetry,
            engine,
        }
    }

    fn seed_load(h: &Harness, load_id: &str, planned_miles: f64) {
        h.ledger
            .upsert_load(
                "t1",
                &LoadUpsert {
                    load_id: load_id.to_string(),
                    customer: Some("Prairie Agra".to_string()),
                    pickup_location: Some("Dodge City, KS".to_string()),
                    delivery_location: Some("Amarillo, TX".to_string()),
                    planned_miles: Some(planned_miles),
                    rate_total: Some(400.0),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    fn seed_telemetry(h: &Harness, load_id: &str, miles: f64) {
        h.telemetry
            .ingest(
                "t1",
                &[RawTelemetryEvent {
                    load_id: Some(load_id.to_string()),
                    gps_miles: Some(miles),
                    observed_at: Some(Utc::now()),
                    ..Default::default()
                }],
            )
            .unwrap();
    }

    fn request(load_id: &str, confidence: f64) -> TicketReviewRequest {
        TicketReviewRequest {
            load_id: load_id.to_string(),
            extraction_confidence: confidence,
            hours_back: None,
        }
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        let thresholds = DecisionThresholds::from(&DecisionConfig::default());
        assert_eq!(
            decide(0.985, Some(0.07), &thresholds),
            TicketDecision::AutoApproved
        );
        assert_eq!(
            decide(0.9849, Some(0.07), &thresholds),
            TicketDecision::NeedsReview
        );
        assert_eq!(
            decide(0.985, Some(0.0701), &thresholds),
            TicketDecision::NeedsReview
        );
    }

    #[test]
    fn test_missing_telemetry_needs_review() {
        let thresholds = DecisionThresholds::from(&DecisionConfig::default());
        assert_eq!(decide(0.999, None, &thresholds), TicketDecision::NeedsReview);
    }

    #[test]
    fn test_review_auto_approves_within_variance() {
        let h = harness();
        seed_load(&h, "LOAD01000", 100.0);
        // Exactly at the variance threshold.
        seed_telemetry(&h, "LOAD01000", 93.0);

        let verdict = h.engine.review("t1", &request("load01000", 0.99)).unwrap();
        assert_eq!(verdict.decision, TicketDecision::AutoApproved);
        assert!(verdict.reviewed);
        assert_eq!(verdict.telemetry_miles, Some(93.0));
        assert_eq!(verdict.verdict_id, "VRD-000001");

        let load = h.ledger.get_load("t1", "LOAD01000").unwrap();
        assert_eq!(load.status, LoadStatus::Ticketed);
    }

    #[test]
    fn test_review_flags_high_variance() {
        let h = harness();
        seed_load(&h, "LOAD01000", 100.0);
        seed_telemetry(&h, "LOAD01000", 130.0);

        let verdict = h.engine.review("t1", &request("LOAD01000", 0.99)).unwrap();
        assert_eq!(verdict.decision, TicketDecision::NeedsReview);
        assert!(!verdict.reviewed);
        let variance = verdict.miles_variance.unwrap();
        assert!((variance - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_review_without_telemetry_needs_review() {
        let h = harness();
        seed_load(&h, "LOAD01000", 100.0);
        let verdict = h.engine.review("t1", &request("LOAD01000", 0.999)).unwrap();
        assert_eq!(verdict.decision, TicketDecision::NeedsReview);
        assert_eq!(verdict.miles_variance, None);
    }

    #[test]
    fn test_review_rejects_bad_confidence() {
        let h = harness();
        seed_load(&h, "LOAD01000", 100.0);
        assert!(h.engine.review("t1", &request("LOAD01000", 1.2)).is_err());
        assert!(h
            .engine
            .review("t1", &request("LOAD01000", f64::NAN))
            .is_err());
    }

    #[test]
    fn test_review_unknown_load_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.engine.review("t1", &request("LOAD09999", 0.99)),
            Err(OpsError::NotFound { .. })
        ));
        // A failed review commits nothing, not even its timeline event.
        assert!(h.engine.list_verdicts("t1", None).unwrap().is_empty());
        assert!(h.timeline.list("t1", None).unwrap().is_empty());
    }

    #[test]
    fn test_review_and_timeline_commit_together() {
        let h = harness();
        seed_load(&h, "LOAD01000", 100.0);
        let verdict = h.engine.review("t1", &request("LOAD01000", 0.5)).unwrap();

        let events = h.timeline.list("t1", Some("LOAD01000")).unwrap();
        let reviewed: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == "ticket_reviewed")
            .collect();
        assert_eq!(reviewed.len(), 1);
        assert_eq!(reviewed[0].details["verdict_id"], verdict.verdict_id);
    }

    #[test]
    fn test_list_verdicts() {
        let h = harness();
        seed_load(&h, "LOAD01000", 100.0);
        h.engine.review("t1", &request("LOAD01000", 0.5)).unwrap();
        h.engine.review("t1", &request("LOAD01000", 0.6)).unwrap();

        let all = h.engine.list_verdicts("t1", None).unwrap();
        assert_eq!(all.len(), 2);
        let scoped = h.engine.list_verdicts("t1", Some("load01000")).unwrap();
        assert_eq!(scoped.len(), 2);
        assert!(h.engine.list_verdicts("t2", None).unwrap().is_empty());
    }
}
