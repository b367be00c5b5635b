//! Move jobs.
//!
//! Owned by the move controller. At most one live move job exists per
//! download job, created only after its sync job completes.

use crate::error::Result;
use crate::types::{Id, MoveStatus};

use super::clients::missing_row;
use super::{Database, MoveJobRow, store_err};

const MOVE_JOB_COLUMNS: &str = r#"
    id, download_job_id, source_path, destination_path, status,
    error_message, created_at, updated_at, deleted_at
"#;

impl Database {
    /// Get the move job of a download, if any
    pub async fn get_move_job_for_download(&self, download_job_id: Id) -> Result<Option<MoveJobRow>> {
        let row = sqlx::query_as::<_, MoveJobRow>(&format!(
            r#"
            SELECT {MOVE_JOB_COLUMNS} FROM move_jobs
            WHERE download_job_id = ? AND deleted_at IS NULL
            "#
        ))
        .bind(download_job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("failed to get move job for download"))?;

        Ok(row)
    }

    /// Get a move job by ID
    pub async fn get_move_job(&self, id: Id) -> Result<Option<MoveJobRow>> {
        let row = sqlx::query_as::<_, MoveJobRow>(&format!(
            "SELECT {MOVE_JOB_COLUMNS} FROM move_jobs WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("failed to get move job"))?;

        Ok(row)
    }

    /// Create a move job in `pending`
    pub async fn create_move_job(
        &self,
        download_job_id: Id,
        source_path: &str,
        destination_path: &str,
    ) -> Result<MoveJobRow> {
        let now = Self::now();
        let id = Id::generate();

        sqlx::query(
            r#"
            INSERT INTO move_jobs (
                id, download_job_id, source_path, destination_path,
                status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(download_job_id)
        .bind(source_path)
        .bind(destination_path)
        .bind(MoveStatus::Pending.to_i32())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to insert move job"))?;

        self.get_move_job(id)
            .await?
            .ok_or_else(|| missing_row("move job", id))
    }

    /// Update a move job's status (and error message, for failures)
    pub async fn set_move_job_status(
        &self,
        id: Id,
        status: MoveStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE move_jobs
            SET status = ?, error_message = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(status.to_i32())
        .bind(error_message)
        .bind(Self::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to update move job status"))?;
        Ok(())
    }

    /// Whether promotion of a download's staging tree has started
    pub async fn has_move_started(&self, download_job_id: Id) -> Result<bool> {
        Ok(self
            .get_move_job_for_download(download_job_id)
            .await?
            .is_some_and(|m| MoveStatus::from_i32(m.status) != MoveStatus::Pending))
    }

    /// Retry an errored move job: reset it to `pending`
    ///
    /// Returns whether a row was reset.
    pub async fn try_reset_move_job(&self, id: Id) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE move_jobs
            SET status = ?, error_message = NULL, updated_at = ?
            WHERE id = ? AND status = ? AND deleted_at IS NULL
            "#,
        )
        .bind(MoveStatus::Pending.to_i32())
        .bind(Self::now())
        .bind(id)
        .bind(MoveStatus::Error.to_i32())
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to reset move job"))?;

        Ok(result.rows_affected() > 0)
    }
}
