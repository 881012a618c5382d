//! Vehicle telemetry intake and query.

mod ingestor;
mod types;

pub use ingestor::TelemetryIngestor;
pub use types::{IngestOutcome, RawTelemetryEvent, TelemetryEvent};
