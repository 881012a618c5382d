use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for the operations core.
///
/// Every section has serde defaults so a minimal (or empty) TOML file is a
/// valid configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OpsConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub exports: ExportConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Durable store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("freightops.db")
}

/// Export artifact storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExportConfig {
    /// Directory that receives per-tenant artifact files.
    #[serde(default = "default_export_dir")]
    pub dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
        }
    }
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("exports")
}

/// Thresholds for the autonomous ticket decision policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DecisionConfig {
    /// Minimum extraction confidence required for auto-approval.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Maximum fractional deviation between planned and GPS miles.
    #[serde(default = "default_miles_variance_threshold")]
    pub miles_variance_threshold: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            miles_variance_threshold: default_miles_variance_threshold(),
        }
    }
}

fn default_confidence_threshold() -> f64 {
    0.985
}

fn default_miles_variance_threshold() -> f64 {
    0.07
}

/// Telemetry ingestion configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Lookback window applied when a query does not supply one.
    #[serde(default = "default_hours_back")]
    pub default_hours_back: i64,

    /// Per-tenant cap on retained telemetry events; oldest rows are pruned
    /// after each ingest batch.
    #[serde(default = "default_max_events")]
    pub max_events_per_tenant: i64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_hours_back: default_hours_back(),
            max_events_per_tenant: default_max_events(),
        }
    }
}

fn default_hours_back() -> i64 {
    72
}

fn default_max_events() -> i64 {
    50_000
}
