use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use crate::db::{
    helpers::{format_datetime, parse_json, parse_optional_datetime},
    Database,
};
use crate::telemetry::TelemetrySnapshot;

/// A stored snapshot with its delivery bookkeeping.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSnapshot {
    pub snapshot: TelemetrySnapshot,
    pub last_synced_at: Option<DateTime<Utc>>,
}

fn row_to_stored_snapshot(row: &Row) -> Result<StoredSnapshot> {
    let payload: String = row.get("payload")?;
    let last_synced_at: Option<String> = row.get("last_synced_at")?;

    Ok(StoredSnapshot {
        snapshot: parse_json(&payload, "payload")?,
        last_synced_at: parse_optional_datetime(last_synced_at, "last_synced_at")?,
    })
}

impl Database {
    /// Append a snapshot. Snapshot content is never updated afterwards.
    pub async fn insert_snapshot(&self, snapshot: &TelemetrySnapshot) -> Result<()> {
        let record = snapshot.clone();
        self.execute(move |conn| {
            let payload = serde_json::to_string(&record)?;
            conn.execute(
                "INSERT INTO telemetry_snapshots (id, session_id, timestamp, client_signature, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    record.session_id,
                    format_datetime(&record.timestamp),
                    record.client_signature,
                    payload,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn latest_snapshot(&self) -> Result<Option<StoredSnapshot>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT payload, last_synced_at
                 FROM telemetry_snapshots
                 ORDER BY timestamp DESC, rowid DESC
                 LIMIT 1",
            )?;

            let mut rows = stmt.query([])?;
            let snapshot = match rows.next()? {
                Some(row) => Some(row_to_stored_snapshot(row)?),
                None => None,
            };
            Ok(snapshot)
        })
        .await
    }

    /// Newest first.
    pub async fn list_snapshots(&self, limit: usize) -> Result<Vec<StoredSnapshot>> {
        let limit = limit as i64;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT payload, last_synced_at
                 FROM telemetry_snapshots
                 ORDER BY timestamp DESC, rowid DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit])?;
            let mut snapshots = Vec::new();
            while let Some(row) = rows.next()? {
                snapshots.push(row_to_stored_snapshot(row)?);
            }

            Ok(snapshots)
        })
        .await
    }

    pub async fn mark_snapshot_synced(&self, snapshot_id: &str, synced_at: DateTime<Utc>) -> Result<()> {
        let snapshot_id = snapshot_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE telemetry_snapshots
                 SET last_synced_at = ?1
                 WHERE id = ?2",
                params![format_datetime(&synced_at), snapshot_id],
            )?;

            if rows_affected == 0 {
                bail!("snapshot {snapshot_id} not found");
            }

            Ok(())
        })
        .await
    }

    /// Most recent successful snapshot delivery, if any.
    pub async fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.execute(|conn| {
            let value: Option<String> = conn
                .query_row(
                    "SELECT MAX(last_synced_at) FROM telemetry_snapshots",
                    [],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            parse_optional_datetime(value, "last_synced_at")
        })
        .await
    }

    pub async fn snapshot_count(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM telemetry_snapshots", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }
}
