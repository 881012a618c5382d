use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A telemetry event as received from the vehicle gateway, before
/// validation. Any field may be missing or junk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTelemetryEvent {
    pub load_id: Option<String>,
    pub vehicle_id: Option<String>,
    pub gps_miles: Option<f64>,
    pub stop_events: Option<i64>,
    pub observed_at: Option<DateTime<Utc>>,
}

/// A validated, normalized telemetry event as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_key: String,
    pub load_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<String>,
    pub gps_miles: f64,
    pub stop_events: i64,
    pub observed_at: DateTime<Utc>,
}

/// Counts returned by a batch ingest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    /// Events newly written to the log.
    pub ingested: u32,
    /// Events dropped as malformed or already present.
    pub skipped: u32,
}
