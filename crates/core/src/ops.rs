//! Wires every component onto one shared store.

use crate::assignment::AssignmentEngine;
use crate::config::OpsConfig;
use crate::error::OpsResult;
use crate::export::ExportArtifactStore;
use crate::ledger::LoadLedger;
use crate::reporting::MetricsAggregator;
use crate::sequence::SequenceAllocator;
use crate::store::OpsDb;
use crate::telemetry::TelemetryIngestor;
use crate::timeline::Timeline;
use crate::verdict::TicketDecisionEngine;

/// The assembled operations engine.
///
/// All components share one [`OpsDb`]; the struct is cheap to clone and safe
/// to use from multiple threads.
#[derive(Clone)]
pub struct OpsCore {
    pub db: OpsDb,
    pub sequences: SequenceAllocator,
    pub timeline: Timeline,
    pub ledger: LoadLedger,
    pub telemetry: TelemetryIngestor,
    pub assignments: AssignmentEngine,
    pub decisions: TicketDecisionEngine,
    pub exports: ExportArtifactStore,
    pub reporting: MetricsAggregator,
}

impl OpsCore {
    /// Open (or create) the engine described by `config`.
    pub fn open(config: &OpsConfig) -> OpsResult<Self> {
        let db = OpsDb::open(&config.database.path)?;
        Ok(Self::assemble(db, config))
    }

    /// Assemble the engine on an in-memory store (useful for testing).
    pub fn in_memory(config: &OpsConfig) -> OpsResult<Self> {
        Ok(Self::assemble(OpsDb::in_memory()?, config))
    }

    fn assemble(db: OpsDb, config: &OpsConfig) -> Self {
        let sequences = SequenceAllocator::new(db.clone());
        let timeline = Timeline::new(db.clone(), sequences.clone());
        let ledger = LoadLedger::new(db.clone(), sequences.clone(), timeline.clone());
        let telemetry = TelemetryIngestor::new(db.clone(), &config.telemetry);
        let assignments = AssignmentEngine::new(db.clone(), sequences.clone(), timeline.clone());
        let decisions = TicketDecisionEngine::new(
            db.clone(),
            sequences.clone(),
            timeline.clone(),
            telemetry.clone(),
            &config.decision,
        );
        let exports = ExportArtifactStore::new(
            db.clone(),
            sequences.clone(),
            timeline.clone(),
            config.exports.dir.clone(),
        );
        let reporting = MetricsAggregator::new(db.clone());

        Self {
            db,
            sequences,
            timeline,
            ledger,
            telemetry,
            assignments,
            decisions,
            exports,
            reporting,
        }
    }

    /// Drop all of a tenant's state, including its counters.
    pub fn reset_tenant(&self, tenant_id: &str) -> OpsResult<()> {
        self.db.reset_tenant(tenant_id)?;
        tracing::info!(tenant_id, "tenant state reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LoadUpsert;

    #[test]
    fn test_open_creates_database_and_wires_components() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OpsConfig::default();
        config.database.path = dir.path().join("ops.db");
        config.exports.dir = dir.path().join("exports");

        let core = OpsCore::open(&config).unwrap();
        let load_id = core.ledger.generate_load_id("t1").unwrap();
        assert_eq!(load_id, "LOAD01000");
    }

    #[test]
    fn test_reset_tenant_rebases_counters() {
        let core = OpsCore::in_memory(&OpsConfig::default()).unwrap();
        core.ledger
            .upsert_load(
                "t1",
                &LoadUpsert {
                    load_id: core.ledger.generate_load_id("t1").unwrap(),
                    customer: Some("Prairie Agra".to_string()),
                    pickup_location: Some("Dodge City, KS".to_string()),
                    delivery_location: Some("Amarillo, TX".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        core.reset_tenant("t1").unwrap();
        assert!(core.ledger.list_loads("t1", None).unwrap().is_empty());
        assert_eq!(core.ledger.generate_load_id("t1").unwrap(), "LOAD01000");
    }
}
