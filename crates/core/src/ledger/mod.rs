//! The load ledger: durable lifecycle state for every load a tenant runs.

mod store;
mod types;

pub use store::LoadLedger;
pub(crate) use store::{read_load, write_load};
pub use types::{LoadRecord, LoadStatus, LoadUpsert, SeedScenario, SeedSummary};

/// Canonical form of a load identifier: trimmed, uppercase.
///
/// Every path that touches a load id goes through this, so "load01000" and
/// "LOAD01000" always address the same record.
pub(crate) fn normalize_load_id(raw: &str) -> String {
    raw.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_load_id() {
        assert_eq!(normalize_load_id("  load01000 "), "LOAD01000");
        assert_eq!(normalize_load_id("LOAD01000"), "LOAD01000");
    }
}
