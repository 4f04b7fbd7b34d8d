use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    helpers::{format_datetime, parse_datetime, parse_json},
    Database,
};
use crate::models::ErrorEvent;

const EVENT_COLUMNS: &str = "id, code, message, context, timestamp, client_signature, synced";

fn row_to_error_event(row: &Row) -> Result<ErrorEvent> {
    let context: Option<String> = row.get("context")?;
    let timestamp: String = row.get("timestamp")?;
    let synced: i64 = row.get("synced")?;

    Ok(ErrorEvent {
        id: row.get("id")?,
        code: row.get("code")?,
        message: row.get("message")?,
        context: context
            .map(|raw| parse_json(&raw, "context"))
            .transpose()?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
        client_signature: row.get("client_signature")?,
        synced: synced != 0,
    })
}

impl Database {
    pub async fn insert_error_event(&self, event: &ErrorEvent) -> Result<()> {
        let record = event.clone();
        self.execute(move |conn| {
            let context = record
                .context
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            conn.execute(
                "INSERT INTO error_events (id, code, message, context, timestamp, client_signature, synced)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    record.code,
                    record.message,
                    context,
                    format_datetime(&record.timestamp),
                    record.client_signature,
                    record.synced as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Oldest first, so a batch reads in the order errors happened.
    pub async fn unsynced_error_events(&self) -> Result<Vec<ErrorEvent>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS}
                 FROM error_events
                 WHERE synced = 0
                 ORDER BY timestamp ASC, rowid ASC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(row_to_error_event(row)?);
            }

            Ok(events)
        })
        .await
    }

    /// Newest first, synced or not.
    pub async fn list_error_events(&self, limit: usize) -> Result<Vec<ErrorEvent>> {
        let limit = limit as i64;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS}
                 FROM error_events
                 ORDER BY timestamp DESC, rowid DESC
                 LIMIT ?1"
            ))?;

            let mut rows = stmt.query(params![limit])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(row_to_error_event(row)?);
            }

            Ok(events)
        })
        .await
    }

    /// Flip the given events to synced. Already-synced ids are left alone;
    /// returns how many events actually changed.
    pub async fn mark_events_synced(&self, event_ids: &[String], synced_at: DateTime<Utc>) -> Result<usize> {
        let event_ids = event_ids.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut changed = 0;
            {
                let mut stmt = tx.prepare(
                    "UPDATE error_events
                     SET synced = 1,
                         synced_at = ?1
                     WHERE id = ?2 AND synced = 0",
                )?;
                let synced_at = format_datetime(&synced_at);
                for id in &event_ids {
                    changed += stmt.execute(params![synced_at, id])?;
                }
            }
            tx.commit()?;
            Ok(changed)
        })
        .await
    }

    /// Retention: drop delivered events recorded before `older_than`.
    /// Unsynced events are never removed.
    pub async fn prune_synced_events(&self, older_than: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let removed = conn.execute(
                "DELETE FROM error_events
                 WHERE synced = 1 AND timestamp < ?1",
                params![format_datetime(&older_than)],
            )?;
            Ok(removed)
        })
        .await
    }
}
