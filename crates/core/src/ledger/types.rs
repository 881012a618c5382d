//! Load lifecycle data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operational lifecycle status for a load.
///
/// Statuses only advance; a load is never deleted and never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Created,
    Assigned,
    InTransit,
    Delivered,
    Ticketed,
    Closed,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStatus::Created => "created",
            LoadStatus::Assigned => "assigned",
            LoadStatus::InTransit => "in_transit",
            LoadStatus::Delivered => "delivered",
            LoadStatus::Ticketed => "ticketed",
            LoadStatus::Closed => "closed",
        }
    }

    /// Position in the lifecycle, used to enforce forward-only transitions.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            LoadStatus::Created => 0,
            LoadStatus::Assigned => 1,
            LoadStatus::InTransit => 2,
            LoadStatus::Delivered => 3,
            LoadStatus::Ticketed => 4,
            LoadStatus::Closed => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadStatus::Closed)
    }
}

/// Persisted load record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadRecord {
    pub load_id: String,
    pub customer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker: Option<String>,
    pub pickup_location: String,
    pub delivery_location: String,
    pub equipment_type: String,
    pub planned_miles: f64,
    pub rate_total: f64,
    /// "normal" or "high"; high-priority loads are a dispatch risk flag.
    pub priority: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Where the record came from ("manual", "rate_confirmation", "synthetic").
    pub source: String,
    pub status: LoadStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied to `upsert_load`.
///
/// On create, `customer`, `pickup_location` and `delivery_location` are
/// required; on update, only the populated fields are merged into the stored
/// record. Status is never set through an upsert.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoadUpsert {
    pub load_id: String,
    pub customer: Option<String>,
    pub broker: Option<String>,
    pub pickup_location: Option<String>,
    pub delivery_location: Option<String>,
    pub equipment_type: Option<String>,
    pub planned_miles: Option<f64>,
    pub rate_total: Option<f64>,
    pub priority: Option<String>,
    pub notes: Option<String>,
    pub source: Option<String>,
}

/// Parameters for deterministic demo/test seeding.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedScenario {
    pub seed: u64,
    pub loads: u32,
    /// Fraction of loads constructed with a telemetry profile that should
    /// fail the variance check downstream.
    pub exception_ratio: f64,
}

/// Result of a seeding run.
#[derive(Debug, Clone, Serialize)]
pub struct SeedSummary {
    pub loads_created: u32,
    pub exceptions: u32,
    pub load_ids: Vec<String>,
}
