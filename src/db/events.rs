//! Append-only event history.
//!
//! Mirrors what was published on the bus, for the UI timeline. Events are
//! history, not coordination state; a retention sweep keeps the table
//! bounded.

use crate::error::Result;
use crate::events::Event;
use crate::types::Id;

use super::{Database, EventRow, store_err};

const EVENT_COLUMNS: &str = r#"
    id, kind, message, subject_type, subject_id, download_id,
    app_name, details, created_at
"#;

impl Database {
    /// Append one event to the history
    pub async fn insert_event(&self, event: &Event) -> Result<()> {
        let details = serde_json::to_string(&event.details)?;

        sqlx::query(
            r#"
            INSERT INTO events (
                id, kind, message, subject_type, subject_id,
                download_id, app_name, details, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Id::generate())
        .bind(event.kind.as_str())
        .bind(&event.message)
        .bind(event.subject_type.as_str())
        .bind(event.subject_id.map(|id| id.to_string()))
        .bind(event.download_id.map(|id| id.to_string()))
        .bind(&event.app)
        .bind(details)
        .bind(event.at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to insert event"))?;

        Ok(())
    }

    /// Most recent events, newest first
    pub async fn list_events(&self, limit: i64) -> Result<Vec<EventRow>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM events
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("failed to list events"))?;

        Ok(rows)
    }

    /// Most recent events of one download, newest first
    pub async fn list_events_for_download(
        &self,
        download_id: Id,
        limit: i64,
    ) -> Result<Vec<EventRow>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM events
            WHERE download_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#
        ))
        .bind(download_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("failed to list events for download"))?;

        Ok(rows)
    }

    /// Delete all but the newest `keep` events
    pub async fn prune_events(&self, keep: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM events
            WHERE id NOT IN (
                SELECT id FROM events ORDER BY created_at DESC, id DESC LIMIT ?
            )
            "#,
        )
        .bind(keep)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to prune events"))?;

        Ok(result.rows_affected())
    }
}
