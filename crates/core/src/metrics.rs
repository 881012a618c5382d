//! Prometheus metrics for core components.
//!
//! These are ambient process counters; the durable per-tenant KPI snapshot
//! lives in [`crate::reporting`] and is computed from stored state instead.

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

/// Telemetry events accepted into the append log.
pub static TELEMETRY_EVENTS_INGESTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "freightops_telemetry_events_ingested_total",
        "Telemetry events accepted into the append log",
    )
    .unwrap()
});

/// Telemetry events skipped as malformed or duplicate.
pub static TELEMETRY_EVENTS_SKIPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "freightops_telemetry_events_skipped_total",
        "Telemetry events skipped as malformed or duplicate",
    )
    .unwrap()
});

/// Ticket verdicts by decision.
pub static TICKET_VERDICTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("freightops_ticket_verdicts_total", "Ticket verdicts produced"),
        &["decision"], // "auto_approved", "needs_review"
    )
    .unwrap()
});

/// Distribution of observed miles variance at review time.
pub static MILES_VARIANCE: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "freightops_miles_variance",
            "Fractional deviation between planned and GPS miles",
        )
        .buckets(vec![0.01, 0.02, 0.05, 0.07, 0.1, 0.2, 0.5, 1.0]),
    )
    .unwrap()
});

/// Assignment decisions by mode.
pub static ASSIGNMENT_DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "freightops_assignment_decisions_total",
            "Assignment decisions produced",
        ),
        &["mode"], // "autonomous", "manual"
    )
    .unwrap()
});

/// Export artifacts by lifecycle event.
pub static EXPORT_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("freightops_export_events_total", "Export artifact lifecycle events"),
        &["event"], // "generated", "replayed", "failed"
    )
    .unwrap()
});

/// Write transactions retried after a busy/locked conflict.
pub static WRITE_CONFLICT_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "freightops_write_conflict_retries_total",
        "Write transactions retried after a busy/locked conflict",
    )
    .unwrap()
});

/// Register all core metrics with the given registry.
pub fn register_core_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(TELEMETRY_EVENTS_INGESTED.clone()))?;
    registry.register(Box::new(TELEMETRY_EVENTS_SKIPPED.clone()))?;
    registry.register(Box::new(TICKET_VERDICTS.clone()))?;
    registry.register(Box::new(MILES_VARIANCE.clone()))?;
    registry.register(Box::new(ASSIGNMENT_DECISIONS.clone()))?;
    registry.register(Box::new(EXPORT_EVENTS.clone()))?;
    registry.register(Box::new(WRITE_CONFLICT_RETRIES.clone()))?;
    Ok(())
}
