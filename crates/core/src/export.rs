//! Billing export artifacts: JSON files on disk plus durable metadata, with
//! support for replaying a past export from its stored bytes.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{not_found, OpsError, OpsResult};
use crate::ledger::{normalize_load_id, read_load};
use crate::metrics::EXPORT_EVENTS;
use crate::sequence::{SequenceAllocator, SequenceKind};
use crate::store::{format_ts, map_sqlite_err, OpsDb};
use crate::timeline::{Timeline, TimelineEvent};

/// Lifecycle state of an export artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Generated,
    Replayed,
    /// The artifact file could not be read back during a replay.
    Failed,
}

impl ExportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStatus::Generated => "generated",
            ExportStatus::Replayed => "replayed",
            ExportStatus::Failed => "failed",
        }
    }
}

/// Metadata for one export artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportArtifact {
    pub export_id: String,
    pub load_id: String,
    pub status: ExportStatus,
    /// Absolute path of the JSON file written for this export.
    pub artifact_path: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replayed_at: Option<DateTime<Utc>>,
}

/// Writes export files and tracks them durably.
///
/// The file is written before the metadata commits; a metadata failure
/// removes the file again, so no committed artifact points at nothing.
#[derive(Clone)]
pub struct ExportArtifactStore {
    db: OpsDb,
    sequences: SequenceAllocator,
    timeline: Timeline,
    export_dir: PathBuf,
}

impl ExportArtifactStore {
    pub fn new(
        db: OpsDb,
        sequences: SequenceAllocator,
        timeline: Timeline,
        export_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            db,
            sequences,
            timeline,
            export_dir: export_dir.into(),
        }
    }

    /// Generate an export artifact for a load.
    pub fn add_export(
        &self,
        tenant_id: &str,
        load_id: &str,
        payload: serde_json::Value,
    ) -> OpsResult<ExportArtifact> {
        let load_id = normalize_load_id(load_id);
        self.db
            .with_conn(|conn| read_load(conn, tenant_id, &load_id))?
            .ok_or_else(|| not_found("load", &load_id))?;

        let export_id = self.sequences.next_id(tenant_id, SequenceKind::Export)?;
        let tenant_dir = self.export_dir.join(tenant_id);
        std::fs::create_dir_all(&tenant_dir)
            .map_err(|e| OpsError::Storage(format!("create export directory: {e}")))?;
        let path = tenant_dir.join(format!("{export_id}_{load_id}.json"));

        let bytes = serde_json::to_vec_pretty(&payload)
            .map_err(|e| OpsError::Storage(format!("serialize export payload: {e}")))?;
        std::fs::write(&path, bytes)
            .map_err(|e| OpsError::Storage(format!("write export artifact: {e}")))?;

        let artifact = ExportArtifact {
            export_id,
            load_id,
            status: ExportStatus::Generated,
            artifact_path: path.to_string_lossy().into_owned(),
            payload,
            created_at: Utc::now(),
            replayed_at: None,
        };

        let event = self.prepare_event(
            tenant_id,
            &artifact,
            "export_generated",
            json!({ "export_id": artifact.export_id, "path": artifact.artifact_path }),
        )?;
        if let Err(err) = self.persist(tenant_id, &artifact, &event) {
            // Do not leave an orphaned file behind a failed commit.
            let _ = std::fs::remove_file(&path);
            return Err(err);
        }

        EXPORT_EVENTS.with_label_values(&["generated"]).inc();
        tracing::info!(
            tenant_id,
            export_id = %artifact.export_id,
            load_id = %artifact.load_id,
            "export artifact generated"
        );
        Ok(artifact)
    }

    /// Re-read a past export from its stored bytes.
    ///
    /// A readable artifact comes back with its payload refreshed from disk
    /// and status `replayed`; an unreadable one is marked `failed`. Both
    /// outcomes are persisted.
    pub fn replay_export(&self, tenant_id: &str, export_id: &str) -> OpsResult<ExportArtifact> {
        let mut artifact = self
            .get_export(tenant_id, export_id)?
            .ok_or_else(|| not_found("export", export_id))?;

        let now = Utc::now();
        let outcome = read_payload(Path::new(&artifact.artifact_path));
        let (event_type, label) = match outcome {
            Ok(payload) => {
                artifact.payload = payload;
                artifact.status = ExportStatus::Replayed;
                artifact.replayed_at = Some(now);
                ("export_replayed", "replayed")
            }
            Err(reason) => {
                tracing::warn!(
                    tenant_id,
                    export_id = %artifact.export_id,
                    "export replay failed: {reason}"
                );
                artifact.status = ExportStatus::Failed;
                ("export_failed", "failed")
            }
        };
        let event = self.prepare_event(
            tenant_id,
            &artifact,
            event_type,
            json!({ "export_id": artifact.export_id }),
        )?;
        self.persist(tenant_id, &artifact, &event)?;

        EXPORT_EVENTS.with_label_values(&[label]).inc();
        Ok(artifact)
    }

    pub fn get_export(
        &self,
        tenant_id: &str,
        export_id: &str,
    ) -> OpsResult<Option<ExportArtifact>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT data_json FROM exports WHERE tenant_id = ? AND export_id = ?",
                params![tenant_id, export_id],
                |row| row.get::<_, String>(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(map_sqlite_err(other)),
            })?
            .map(|data| parse_artifact(&data))
            .transpose()
        })
    }

    /// List a tenant's exports, newest first, optionally scoped to one load.
    pub fn list_exports(
        &self,
        tenant_id: &str,
        load_id: Option<&str>,
    ) -> OpsResult<Vec<ExportArtifact>> {
        let load_id = load_id.map(normalize_load_id);
        self.db.with_conn(|conn| {
            let mut artifacts = Vec::new();
            let mut push = |row: &rusqlite::Row<'_>| -> OpsResult<()> {
                let data: String = row.get(0).map_err(map_sqlite_err)?;
                artifacts.push(parse_artifact(&data)?);
                Ok(())
            };

            match load_id.as_deref() {
                Some(load_id) => {
                    let mut stmt = conn
                        .prepare(
                            "SELECT data_json FROM exports
                             WHERE tenant_id = ? AND load_id = ?
                             ORDER BY created_at DESC",
                        )
                        .map_err(map_sqlite_err)?;
                    let mut rows = stmt
                        .query(params![tenant_id, load_id])
                        .map_err(map_sqlite_err)?;
                    while let Some(row) = rows.next().map_err(map_sqlite_err)? {
                        push(row)?;
                    }
                }
                None => {
                    let mut stmt = conn
                        .prepare(
                            "SELECT data_json FROM exports
                             WHERE tenant_id = ?
                             ORDER BY created_at DESC",
                        )
                        .map_err(map_sqlite_err)?;
                    let mut rows = stmt.query(params![tenant_id]).map_err(map_sqlite_err)?;
                    while let Some(row) = rows.next().map_err(map_sqlite_err)? {
                        push(row)?;
                    }
                }
            }
            Ok(artifacts)
        })
    }

    fn prepare_event(
        &self,
        tenant_id: &str,
        artifact: &ExportArtifact,
        event_type: &str,
        details: serde_json::Value,
    ) -> OpsResult<TimelineEvent> {
        Ok(TimelineEvent {
            event_id: self.timeline.next_event_id(tenant_id)?,
            load_id: artifact.load_id.clone(),
            event_type: event_type.to_string(),
            actor: "export_store".to_string(),
            timestamp: Utc::now(),
            details,
        })
    }

    /// Commit metadata and timeline event atomically.
    fn persist(
        &self,
        tenant_id: &str,
        artifact: &ExportArtifact,
        event: &TimelineEvent,
    ) -> OpsResult<()> {
        let data = serde_json::to_string(artifact)
            .map_err(|e| OpsError::Storage(format!("serialize export: {e}")))?;
        self.db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO exports
                     (tenant_id, export_id, load_id, status, created_at, data_json)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT (tenant_id, export_id) DO UPDATE SET
                     status = excluded.status,
                     data_json = excluded.data_json",
                params![
                    tenant_id,
                    artifact.export_id,
                    artifact.load_id,
                    artifact.status.as_str(),
                    format_ts(artifact.created_at),
                    data,
                ],
            )
            .map_err(map_sqlite_err)?;
            self.timeline.append(tx, tenant_id, event)?;
            Ok(())
        })
    }
}

fn parse_artifact(data: &str) -> OpsResult<ExportArtifact> {
    serde_json::from_str(data).map_err(|e| OpsError::Storage(format!("corrupt export: {e}")))
}

fn read_payload(path: &Path) -> Result<serde_json::Value, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("read {}: {e}", path.display()))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("parse {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LoadLedger, LoadUpsert};

    struct Harness {
        _dir: tempfile::TempDir,
        timeline: Timeline,
        ledger: LoadLedger,
        exports: ExportArtifactStore,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = OpsDb::in_memory().unwrap();
        let sequences = SequenceAllocator::new(db.clone());
        let timeline = Timeline::new(db.clone(), sequences.clone());
        let ledger = LoadLedger::new(db.clone(), sequences.clone(), timeline.clone());
        let exports = ExportArtifactStore::new(db, sequences, timeline.clone(), dir.path());
        Harness {
            _dir: dir,
            timeline,
            ledger,
            exports,
        }
    }

    fn seed_load(h: &Harness, load_id: &str) {
        h.ledger
            .upsert_load(
                "t1",
                &LoadUpsert {
                    load_id: load_id.to_string(),
                    customer: Some("Prairie Agra".to_string()),
                    pickup_location: Some("Dodge City, KS".to_string()),
                    delivery_location: Some("Amarillo, TX".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn test_add_export_writes_file_and_metadata() {
        let h = harness();
        seed_load(&h, "LOAD01000");
        let artifact = h
            .exports
            .add_export("t1", "load01000", serde_json::json!({"total": 410.5}))
            .unwrap();

        assert_eq!(artifact.export_id, "EXP-000001");
        assert_eq!(artifact.load_id, "LOAD01000");
        assert_eq!(artifact.status, ExportStatus::Generated);
        assert!(artifact.artifact_path.ends_with("EXP-000001_LOAD01000.json"));
        assert!(Path::new(&artifact.artifact_path).exists());
    }

    #[test]
    fn test_export_requires_existing_load() {
        let h = harness();
        assert!(matches!(
            h.exports
                .add_export("t1", "LOAD09999", serde_json::json!({})),
            Err(OpsError::NotFound { .. })
        ));
    }

    #[test]
    fn test_replay_round_trip() {
        let h = harness();
        seed_load(&h, "LOAD01000");
        let payload = serde_json::json!({"total": 410.5, "line_items": [1, 2]});
        let artifact = h.exports.add_export("t1", "LOAD01000", payload.clone()).unwrap();

        let replayed = h.exports.replay_export("t1", &artifact.export_id).unwrap();
        assert_eq!(replayed.status, ExportStatus::Replayed);
        assert_eq!(replayed.payload, payload);
        assert!(replayed.replayed_at.is_some());
    }

    #[test]
    fn test_replay_missing_file_marks_failed() {
        let h = harness();
        seed_load(&h, "LOAD01000");
        let artifact = h
            .exports
            .add_export("t1", "LOAD01000", serde_json::json!({}))
            .unwrap();
        std::fs::remove_file(&artifact.artifact_path).unwrap();

        let replayed = h.exports.replay_export("t1", &artifact.export_id).unwrap();
        assert_eq!(replayed.status, ExportStatus::Failed);

        let stored = h
            .exports
            .get_export("t1", &artifact.export_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ExportStatus::Failed);
    }

    #[test]
    fn test_export_lifecycle_events_track_metadata() {
        let h = harness();
        seed_load(&h, "LOAD01000");
        let artifact = h
            .exports
            .add_export("t1", "LOAD01000", serde_json::json!({}))
            .unwrap();
        h.exports.replay_export("t1", &artifact.export_id).unwrap();

        let events = h.timeline.list("t1", Some("LOAD01000")).unwrap();
        let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert!(kinds.contains(&"export_generated"));
        assert!(kinds.contains(&"export_replayed"));
    }

    #[test]
    fn test_replay_unknown_export_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.exports.replay_export("t1", "EXP-000042"),
            Err(OpsError::NotFound { .. })
        ));
    }

    #[test]
    fn test_list_exports() {
        let h = harness();
        seed_load(&h, "LOAD01000");
        seed_load(&h, "LOAD01001");
        h.exports
            .add_export("t1", "LOAD01000", serde_json::json!({}))
            .unwrap();
        h.exports
            .add_export("t1", "LOAD01001", serde_json::json!({}))
            .unwrap();

        assert_eq!(h.exports.list_exports("t1", None).unwrap().len(), 2);
        let scoped = h.exports.list_exports("t1", Some("load01001")).unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].load_id, "LOAD01001");
    }
}
