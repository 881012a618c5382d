//! Durable, tenant-partitioned storage underlying all components.

mod sqlite;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{OpsError, OpsResult};

pub use sqlite::OpsDb;
pub(crate) use sqlite::map_sqlite_err;

/// Format a timestamp for storage.
///
/// Fixed-width RFC 3339 with microsecond precision, so lexicographic
/// ordering of the stored text matches chronological ordering.
pub(crate) fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp previously written by [`format_ts`].
pub(crate) fn parse_ts(text: &str) -> OpsResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| OpsError::Storage(format!("corrupt timestamp {text:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_round_trip() {
        let dt = Utc.with_ymd_and_hms(2026, 2, 14, 9, 30, 5).unwrap();
        let text = format_ts(dt);
        assert_eq!(parse_ts(&text).unwrap(), dt);
    }

    #[test]
    fn test_timestamp_text_orders_chronologically() {
        let earlier = Utc.with_ymd_and_hms(2026, 2, 14, 9, 30, 5).unwrap();
        let later = earlier + chrono::Duration::microseconds(1);
        assert!(format_ts(earlier) < format_ts(later));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_ts("not-a-timestamp").is_err());
    }
}
