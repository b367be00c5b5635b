//! Tracked download projection rows.
//!
//! Owned by the tracked-download projector. Soft-deleted when the
//! category moves away from every tracked category, and reactivated
//! (same row, same ID) when it returns.

use crate::error::Result;
use crate::types::{Id, TrackedState};

use super::clients::missing_row;
use super::{Database, NewTracked, TrackedRow, store_err};

const TRACKED_COLUMNS: &str = r#"
    id, download_job_id, name, category, app_name, state,
    total_size_bytes, completed_size_bytes, total_files, error_message,
    discovered_at, completed_at, created_at, updated_at, deleted_at
"#;

impl Database {
    /// Insert a new tracked download projection
    pub async fn insert_tracked(&self, tracked: &NewTracked) -> Result<TrackedRow> {
        let now = Self::now();
        let id = Id::generate();

        sqlx::query(
            r#"
            INSERT INTO tracked_downloads (
                id, download_job_id, name, category, app_name, state,
                total_size_bytes, completed_size_bytes, total_files,
                discovered_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(tracked.download_job_id)
        .bind(&tracked.name)
        .bind(&tracked.category)
        .bind(&tracked.app_name)
        .bind(tracked.state)
        .bind(tracked.total_size_bytes)
        .bind(tracked.completed_size_bytes)
        .bind(tracked.total_files)
        .bind(tracked.discovered_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to insert tracked download"))?;

        self.get_tracked(id)
            .await?
            .ok_or_else(|| missing_row("tracked download", id))
    }

    /// Get a tracked download by ID
    pub async fn get_tracked(&self, id: Id) -> Result<Option<TrackedRow>> {
        let row = sqlx::query_as::<_, TrackedRow>(&format!(
            "SELECT {TRACKED_COLUMNS} FROM tracked_downloads WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("failed to get tracked download"))?;

        Ok(row)
    }

    /// Get the live tracked projection of a download, if any
    pub async fn get_tracked_for_download(&self, download_job_id: Id) -> Result<Option<TrackedRow>> {
        let row = sqlx::query_as::<_, TrackedRow>(&format!(
            r#"
            SELECT {TRACKED_COLUMNS} FROM tracked_downloads
            WHERE download_job_id = ? AND deleted_at IS NULL
            "#
        ))
        .bind(download_job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("failed to get tracked download for job"))?;

        Ok(row)
    }

    /// Get the tracked projection of a download including soft-deleted rows
    ///
    /// Caller-scoped opt-in to the soft-delete filter; used to reactivate
    /// a projection when its category returns to a tracked value. Prefers
    /// the live row, then the most recently deleted one.
    pub async fn get_tracked_for_download_with_deleted(
        &self,
        download_job_id: Id,
    ) -> Result<Option<TrackedRow>> {
        let row = sqlx::query_as::<_, TrackedRow>(&format!(
            r#"
            SELECT {TRACKED_COLUMNS} FROM tracked_downloads
            WHERE download_job_id = ?
            ORDER BY deleted_at IS NOT NULL, updated_at DESC
            LIMIT 1
            "#
        ))
        .bind(download_job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("failed to get tracked download including deleted"))?;

        Ok(row)
    }

    /// List all live tracked downloads, newest discovery first
    pub async fn list_tracked(&self) -> Result<Vec<TrackedRow>> {
        let rows = sqlx::query_as::<_, TrackedRow>(&format!(
            r#"
            SELECT {TRACKED_COLUMNS} FROM tracked_downloads
            WHERE deleted_at IS NULL
            ORDER BY discovered_at DESC
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("failed to list tracked downloads"))?;

        Ok(rows)
    }

    /// Set the workflow state
    pub async fn set_tracked_state(&self, id: Id, state: TrackedState) -> Result<()> {
        sqlx::query(
            "UPDATE tracked_downloads SET state = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(state.to_i32())
        .bind(Self::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to set tracked state"))?;
        Ok(())
    }

    /// Set a failure state together with its message
    pub async fn set_tracked_failure(
        &self,
        id: Id,
        state: TrackedState,
        message: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tracked_downloads
            SET state = ?, error_message = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(state.to_i32())
        .bind(message)
        .bind(Self::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to set tracked failure"))?;
        Ok(())
    }

    /// Refresh cached name and the selected-file aggregates
    pub async fn update_tracked_aggregates(
        &self,
        id: Id,
        name: &str,
        total_size_bytes: i64,
        total_files: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tracked_downloads
            SET name = ?, total_size_bytes = ?, total_files = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(name)
        .bind(total_size_bytes)
        .bind(total_files)
        .bind(Self::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to update tracked aggregates"))?;
        Ok(())
    }

    /// Update synced-bytes progress
    pub async fn update_tracked_completed_size(&self, id: Id, completed_size_bytes: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tracked_downloads
            SET completed_size_bytes = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(completed_size_bytes)
        .bind(Self::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to update tracked progress"))?;
        Ok(())
    }

    /// Update the cached category and responsible app
    pub async fn update_tracked_category(
        &self,
        id: Id,
        category: &str,
        app_name: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tracked_downloads
            SET category = ?, app_name = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(category)
        .bind(app_name)
        .bind(Self::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to update tracked category"))?;
        Ok(())
    }

    /// Mark the pipeline finished: state `imported`, `completed_at` stamped
    pub async fn mark_tracked_imported(&self, id: Id) -> Result<()> {
        let now = Self::now();
        sqlx::query(
            r#"
            UPDATE tracked_downloads
            SET state = ?, completed_at = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(TrackedState::Imported.to_i32())
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to mark tracked imported"))?;
        Ok(())
    }

    /// Soft-delete a tracked projection (category moved away)
    pub async fn soft_delete_tracked(&self, id: Id) -> Result<()> {
        let now = Self::now();
        sqlx::query("UPDATE tracked_downloads SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err("failed to soft-delete tracked download"))?;
        Ok(())
    }

    /// Reactivate a soft-deleted projection (category returned)
    pub async fn restore_tracked(&self, id: Id) -> Result<()> {
        sqlx::query("UPDATE tracked_downloads SET deleted_at = NULL, updated_at = ? WHERE id = ?")
            .bind(Self::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err("failed to restore tracked download"))?;
        Ok(())
    }

    /// Hard-delete the projection of a removed download
    pub async fn delete_tracked_for_download(&self, download_job_id: Id) -> Result<()> {
        sqlx::query("DELETE FROM tracked_downloads WHERE download_job_id = ?")
            .bind(download_job_id)
            .execute(&self.pool)
            .await
            .map_err(store_err("failed to delete tracked download"))?;
        Ok(())
    }

    /// Per-state counts of live tracked downloads, for the stats endpoint
    pub async fn count_tracked_by_state(&self) -> Result<Vec<(i32, i64)>> {
        let rows: Vec<(i32, i64)> = sqlx::query_as(
            r#"
            SELECT state, COUNT(*) FROM tracked_downloads
            WHERE deleted_at IS NULL
            GROUP BY state
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("failed to count tracked downloads"))?;

        Ok(rows)
    }
}
