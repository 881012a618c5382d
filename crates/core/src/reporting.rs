//! Per-tenant KPI snapshots computed from durable state.
//!
//! Unlike the process counters in [`crate::metrics`], these numbers survive
//! restarts because they are derived from the store on every call.

use std::collections::BTreeMap;

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::OpsResult;
use crate::store::{map_sqlite_err, OpsDb};

/// Point-in-time operational KPIs for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpsMetricsSnapshot {
    /// Loads not yet closed.
    pub active_loads: i64,
    /// Loads at or past delivery.
    pub delivered_loads: i64,
    pub tickets_reviewed: i64,
    /// Share of verdicts that auto-approved, rounded to 4 decimals.
    pub auto_approval_rate: f64,
    /// Share of assignments dispatched autonomously, rounded to 4 decimals.
    pub auto_assignment_rate: f64,
    pub exports_generated: i64,
    pub counts_by_status: BTreeMap<String, i64>,
}

/// Computes KPI snapshots from stored state.
#[derive(Clone)]
pub struct MetricsAggregator {
    db: OpsDb,
}

impl MetricsAggregator {
    pub fn new(db: OpsDb) -> Self {
        Self { db }
    }

    pub fn snapshot(&self, tenant_id: &str) -> OpsResult<OpsMetricsSnapshot> {
        self.db.with_conn(|conn| {
            let counts_by_status = status_counts(conn, tenant_id)?;
            let total_loads: i64 = counts_by_status.values().sum();
            let closed = *counts_by_status.get("closed").unwrap_or(&0);
            let delivered_loads = ["delivered", "ticketed", "closed"]
                .iter()
                .map(|s| counts_by_status.get(*s).unwrap_or(&0))
                .sum();

            let tickets_reviewed = count(
                conn,
                "SELECT COUNT(*) FROM verdicts WHERE tenant_id = ?",
                tenant_id,
            )?;
            let auto_approved = count(
                conn,
                "SELECT COUNT(*) FROM verdicts WHERE tenant_id = ? AND decision = 'auto_approved'",
                tenant_id,
            )?;
            let assignments = count(
                conn,
                "SELECT COUNT(*) FROM assignments WHERE tenant_id = ?",
                tenant_id,
            )?;
            let autonomous = count(
                conn,
                "SELECT COUNT(*) FROM assignments WHERE tenant_id = ? AND mode = 'autonomous'",
                tenant_id,
            )?;
            let exports_generated = count(
                conn,
                "SELECT COUNT(*) FROM exports WHERE tenant_id = ?",
                tenant_id,
            )?;

            Ok(OpsMetricsSnapshot {
                active_loads: total_loads - closed,
                delivered_loads,
                tickets_reviewed,
                auto_approval_rate: rate(auto_approved, tickets_reviewed),
                auto_assignment_rate: rate(autonomous, assignments),
                exports_generated,
                counts_by_status,
            })
        })
    }
}

fn status_counts(conn: &Connection, tenant_id: &str) -> OpsResult<BTreeMap<String, i64>> {
    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM loads WHERE tenant_id = ? GROUP BY status")
        .map_err(map_sqlite_err)?;
    let mut counts = BTreeMap::new();
    let mut rows = stmt.query(params![tenant_id]).map_err(map_sqlite_err)?;
    while let Some(row) = rows.next().map_err(map_sqlite_err)? {
        let status: String = row.get(0).map_err(map_sqlite_err)?;
        let n: i64 = row.get(1).map_err(map_sqlite_err)?;
        counts.insert(status, n);
    }
    Ok(counts)
}

fn count(conn: &Connection, sql: &str, tenant_id: &str) -> OpsResult<i64> {
    conn.query_row(sql, params![tenant_id], |row| row.get(0))
        .map_err(map_sqlite_err)
}

/// Ratio rounded to 4 decimals; zero denominators yield 0.0.
fn rate(numerator: i64, denominator: i64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    (numerator as f64 / denominator as f64 * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_rounding() {
        assert_eq!(rate(1, 3), 0.3333);
        assert_eq!(rate(2, 3), 0.6667);
        assert_eq!(rate(0, 0), 0.0);
        assert_eq!(rate(3, 3), 1.0);
    }

    #[test]
    fn test_snapshot_on_empty_tenant() {
        let aggregator = MetricsAggregator::new(OpsDb::in_memory().unwrap());
        let snapshot = aggregator.snapshot("t1").unwrap();
        assert_eq!(snapshot.active_loads, 0);
        assert_eq!(snapshot.tickets_reviewed, 0);
        assert_eq!(snapshot.auto_approval_rate, 0.0);
        assert!(snapshot.counts_by_status.is_empty());
    }
}
