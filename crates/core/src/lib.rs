//! Multi-tenant operations engine for agricultural trucking.
//!
//! Tracks loads through their lifecycle, ingests vehicle telemetry, makes
//! dispatch and ticket-review decisions, generates billing export artifacts
//! and reports per-tenant KPIs, all on one durable SQLite store.
//!
//! [`OpsCore`] assembles the components; each is also usable on its own
//! against a shared [`store::OpsDb`].

pub mod assignment;
pub mod config;
pub mod error;
pub mod export;
pub mod ledger;
pub mod metrics;
pub mod ops;
pub mod reporting;
pub mod sequence;
pub mod store;
pub mod telemetry;
pub mod timeline;
pub mod verdict;

pub use config::{load_config, OpsConfig};
pub use error::{OpsError, OpsResult};
pub use ops::OpsCore;
