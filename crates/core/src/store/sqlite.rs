//! SQLite-backed persistence layer shared by every component.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::{OpsError, OpsResult};
use crate::metrics::WRITE_CONFLICT_RETRIES;

/// Bounded retries for SQLITE_BUSY before surfacing a `Conflict`.
const MAX_WRITE_RETRIES: u32 = 3;

/// Handle to the durable, tenant-partitioned operations store.
///
/// All mutating operations run inside an immediate transaction while holding
/// the connection lock, so the critical section covers both the in-memory
/// update and the durable write. Clones share the same connection.
#[derive(Clone)]
pub struct OpsDb {
    conn: Arc<Mutex<Connection>>,
}

impl OpsDb {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> OpsResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| OpsError::Storage(format!("create db directory: {e}")))?;
            }
        }
        let conn = Connection::open(path).map_err(map_sqlite_err)?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory store (useful for testing).
    pub fn in_memory() -> OpsResult<Self> {
        let conn = Connection::open_in_memory().map_err(map_sqlite_err)?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn initialize(conn: &Connection) -> OpsResult<()> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(map_sqlite_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(map_sqlite_err)?;
        conn.pragma_update(None, "busy_timeout", 30_000)
            .map_err(map_sqlite_err)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(map_sqlite_err)?;
        Self::initialize_schema(conn)
    }

    fn initialize_schema(conn: &Connection) -> OpsResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sequences (
                tenant_id  TEXT NOT NULL,
                kind       TEXT NOT NULL,
                next_value INTEGER NOT NULL,
                PRIMARY KEY (tenant_id, kind)
            );

            CREATE TABLE IF NOT EXISTS loads (
                tenant_id  TEXT NOT NULL,
                load_id    TEXT NOT NULL,
                status     TEXT NOT NULL,
                data_json  TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (tenant_id, load_id)
            );

            CREATE INDEX IF NOT EXISTS idx_loads_tenant_status
                ON loads (tenant_id, status);

            CREATE TABLE IF NOT EXISTS assignments (
                tenant_id     TEXT NOT NULL,
                assignment_id TEXT NOT NULL,
                load_id       TEXT NOT NULL,
                mode          TEXT NOT NULL,
                decided_at    TEXT NOT NULL,
                data_json     TEXT NOT NULL,
                PRIMARY KEY (tenant_id, assignment_id)
            );

            CREATE INDEX IF NOT EXISTS idx_assignments_tenant_load
                ON assignments (tenant_id, load_id);

            CREATE TABLE IF NOT EXISTS telemetry_events (
                tenant_id   TEXT NOT NULL,
                event_key   TEXT NOT NULL,
                load_id     TEXT NOT NULL,
                vehicle_id  TEXT,
                gps_miles   REAL NOT NULL,
                stop_events INTEGER NOT NULL,
                observed_at TEXT NOT NULL,
                PRIMARY KEY (tenant_id, event_key)
            );

            CREATE INDEX IF NOT EXISTS idx_telemetry_tenant_load_time
                ON telemetry_events (tenant_id, load_id, observed_at);

            CREATE TABLE IF NOT EXISTS verdicts (
                tenant_id  TEXT NOT NULL,
                verdict_id TEXT NOT NULL,
                load_id    TEXT NOT NULL,
                decision   TEXT NOT NULL,
                created_at TEXT NOT NULL,
                data_json  TEXT NOT NULL,
                PRIMARY KEY (tenant_id, verdict_id)
            );

            CREATE INDEX IF NOT EXISTS idx_verdicts_tenant_load
                ON verdicts (tenant_id, load_id);

            CREATE TABLE IF NOT EXISTS exports (
                tenant_id  TEXT NOT NULL,
                export_id  TEXT NOT NULL,
                load_id    TEXT NOT NULL,
                status     TEXT NOT NULL,
                created_at TEXT NOT NULL,
                data_json  TEXT NOT NULL,
                PRIMARY KEY (tenant_id, export_id)
            );

            CREATE INDEX IF NOT EXISTS idx_exports_tenant_load
                ON exports (tenant_id, load_id);

            CREATE TABLE IF NOT EXISTS timeline (
                tenant_id    TEXT NOT NULL,
                event_id     TEXT NOT NULL,
                load_id      TEXT NOT NULL,
                event_type   TEXT NOT NULL,
                actor        TEXT NOT NULL,
                timestamp    TEXT NOT NULL,
                details_json TEXT NOT NULL,
                PRIMARY KEY (tenant_id, event_id)
            );

            CREATE INDEX IF NOT EXISTS idx_timeline_tenant_load
                ON timeline (tenant_id, load_id);
            CREATE INDEX IF NOT EXISTS idx_timeline_tenant_ts
                ON timeline (tenant_id, timestamp DESC);
            "#,
        )
        .map_err(map_sqlite_err)
    }

    /// Run a read-only closure against the shared connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> OpsResult<T>,
    ) -> OpsResult<T> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    /// Run a mutating closure inside an immediate transaction.
    ///
    /// The transaction is retried up to [`MAX_WRITE_RETRIES`] times when the
    /// database reports a busy/locked conflict; rollback on closure error
    /// leaves no partial state committed.
    pub(crate) fn with_tx<T>(
        &self,
        mut f: impl FnMut(&Transaction<'_>) -> OpsResult<T>,
    ) -> OpsResult<T> {
        let mut conn = self.conn.lock().unwrap();
        let mut attempt = 0;
        loop {
            let result = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(map_sqlite_err)
                .and_then(|tx| {
                    let value = f(&tx)?;
                    tx.commit().map_err(map_sqlite_err)?;
                    Ok(value)
                });

            match result {
                Ok(value) => return Ok(value),
                Err(err @ OpsError::Conflict(_)) if attempt < MAX_WRITE_RETRIES => {
                    attempt += 1;
                    WRITE_CONFLICT_RETRIES.inc();
                    tracing::warn!(attempt, "retrying write after conflict: {err}");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Remove every record belonging to a tenant and re-base its sequence
    /// counters, so the next seed run starts from a clean scenario.
    pub fn reset_tenant(&self, tenant_id: &str) -> OpsResult<()> {
        self.with_tx(|tx| {
            for table in [
                "loads",
                "assignments",
                "telemetry_events",
                "verdicts",
                "exports",
                "timeline",
                "sequences",
            ] {
                tx.execute(
                    &format!("DELETE FROM {table} WHERE tenant_id = ?"),
                    [tenant_id],
                )
                .map_err(map_sqlite_err)?;
            }
            Ok(())
        })
    }
}

/// Map a rusqlite error onto the shared taxonomy: busy/locked becomes a
/// retryable `Conflict`, everything else is a `Storage` failure.
pub(crate) fn map_sqlite_err(e: rusqlite::Error) -> OpsError {
    use rusqlite::ErrorCode::{DatabaseBusy, DatabaseLocked};
    match e.sqlite_error_code() {
        Some(DatabaseBusy) | Some(DatabaseLocked) => OpsError::Conflict(e.to_string()),
        _ => OpsError::Storage(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_store_initializes() {
        let db = OpsDb::in_memory().unwrap();
        let count: i64 = db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                    [],
                    |row| row.get(0),
                )
                .map_err(map_sqlite_err)
            })
            .unwrap();
        assert!(count >= 7);
    }

    #[test]
    fn test_file_store_creates_parent_dirs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("ops.db");
        let _db = OpsDb::open(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_tx_rolls_back_on_error() {
        let db = OpsDb::in_memory().unwrap();
        let result: OpsResult<()> = db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO sequences (tenant_id, kind, next_value) VALUES ('t1', 'load', 1)",
                [],
            )
            .map_err(map_sqlite_err)?;
            Err(OpsError::Validation("abort".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM sequences", [], |row| row.get(0))
                    .map_err(map_sqlite_err)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_reset_tenant_is_scoped() {
        let db = OpsDb::in_memory().unwrap();
        db.with_tx(|tx| {
            for tenant in ["t1", "t2"] {
                tx.execute(
                    "INSERT INTO sequences (tenant_id, kind, next_value) VALUES (?, 'load', 5)",
                    [tenant],
                )
                .map_err(map_sqlite_err)?;
            }
            Ok(())
        })
        .unwrap();

        db.reset_tenant("t1").unwrap();

        let remaining: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM sequences", [], |row| row.get(0))
                    .map_err(map_sqlite_err)
            })
            .unwrap();
        assert_eq!(remaining, 1);
    }
}
