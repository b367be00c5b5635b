//! Sync jobs and sync files.
//!
//! Owned by the file-sync controller. The conditional UPDATE helpers
//! (`try_*`) exist so concurrent transfer tasks can race on job
//! completion safely: whichever task's UPDATE matches zero rows knows the
//! transition already happened and must not publish a duplicate event.

use crate::error::Result;
use crate::types::{Id, SyncFileStatus, SyncStatus};

use super::clients::missing_row;
use super::{Database, SyncFileRow, SyncJobRow, store_err};

const SYNC_JOB_COLUMNS: &str = r#"
    id, download_job_id, remote_base, local_base, status, error_message,
    started_at, completed_at, cancelled_at, created_at, updated_at, deleted_at
"#;

const SYNC_FILE_COLUMNS: &str = r#"
    id, sync_job_id, download_file_id, relative_path, size_bytes,
    synced_bytes, status, error_message, created_at, updated_at, deleted_at
"#;

/// Outcome of [`Database::ensure_sync_file`]
#[derive(Debug, Clone)]
pub enum EnsureSyncFile {
    /// A fresh row was created in `pending`
    Created(SyncFileRow),
    /// A live row already exists (any status); the caller decides whether
    /// its status makes the triggering event a duplicate
    Existing(SyncFileRow),
}

impl Database {
    /// Get the sync job of a download, if any
    pub async fn get_sync_job_for_download(&self, download_job_id: Id) -> Result<Option<SyncJobRow>> {
        let row = sqlx::query_as::<_, SyncJobRow>(&format!(
            r#"
            SELECT {SYNC_JOB_COLUMNS} FROM sync_jobs
            WHERE download_job_id = ? AND deleted_at IS NULL
            "#
        ))
        .bind(download_job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("failed to get sync job for download"))?;

        Ok(row)
    }

    /// Get a sync job by ID
    pub async fn get_sync_job(&self, id: Id) -> Result<Option<SyncJobRow>> {
        let row = sqlx::query_as::<_, SyncJobRow>(&format!(
            "SELECT {SYNC_JOB_COLUMNS} FROM sync_jobs WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("failed to get sync job"))?;

        Ok(row)
    }

    /// Get the sync job (or create one in `pending`) for a download
    ///
    /// Runs in a transaction: exactly one live sync job can exist per
    /// download job. Returns the row and whether it was created now.
    pub async fn ensure_sync_job(
        &self,
        download_job_id: Id,
        remote_base: &str,
        local_base: &str,
    ) -> Result<(SyncJobRow, bool)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(store_err("failed to begin sync job transaction"))?;

        let existing = sqlx::query_as::<_, SyncJobRow>(&format!(
            r#"
            SELECT {SYNC_JOB_COLUMNS} FROM sync_jobs
            WHERE download_job_id = ? AND deleted_at IS NULL
            "#
        ))
        .bind(download_job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err("failed to check for existing sync job"))?;

        if let Some(row) = existing {
            tx.commit()
                .await
                .map_err(store_err("failed to commit sync job transaction"))?;
            return Ok((row, false));
        }

        let now = Self::now();
        let id = Id::generate();
        sqlx::query(
            r#"
            INSERT INTO sync_jobs (
                id, download_job_id, remote_base, local_base, status,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(download_job_id)
        .bind(remote_base)
        .bind(local_base)
        .bind(SyncStatus::Pending.to_i32())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(store_err("failed to insert sync job"))?;

        tx.commit()
            .await
            .map_err(store_err("failed to commit sync job transaction"))?;

        let row = self
            .get_sync_job(id)
            .await?
            .ok_or_else(|| missing_row("sync job", id))?;
        Ok((row, true))
    }

    /// Transition a sync job `pending → syncing` and stamp `started_at`
    ///
    /// Returns whether this call performed the transition.
    pub async fn try_start_sync_job(&self, id: Id) -> Result<bool> {
        let now = Self::now();
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = ?, started_at = ?, updated_at = ?
            WHERE id = ? AND status = ? AND deleted_at IS NULL
            "#,
        )
        .bind(SyncStatus::Syncing.to_i32())
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(SyncStatus::Pending.to_i32())
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to start sync job"))?;

        Ok(result.rows_affected() > 0)
    }

    /// Complete a sync job if every non-cancelled file is complete
    ///
    /// Returns whether this call performed the transition.
    pub async fn try_complete_sync_job(&self, id: Id) -> Result<bool> {
        let now = Self::now();
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = ?, completed_at = ?, updated_at = ?
            WHERE id = ? AND status IN (?, ?) AND deleted_at IS NULL
              AND NOT EXISTS (
                SELECT 1 FROM sync_files
                WHERE sync_job_id = sync_jobs.id
                  AND deleted_at IS NULL
                  AND status NOT IN (?, ?)
              )
            "#,
        )
        .bind(SyncStatus::Complete.to_i32())
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(SyncStatus::Pending.to_i32())
        .bind(SyncStatus::Syncing.to_i32())
        .bind(SyncFileStatus::Complete.to_i32())
        .bind(SyncFileStatus::Cancelled.to_i32())
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to complete sync job"))?;

        Ok(result.rows_affected() > 0)
    }

    /// Fail a sync job if no file is still pending or syncing
    ///
    /// Returns whether this call performed the transition.
    pub async fn try_fail_sync_job(&self, id: Id, message: &str) -> Result<bool> {
        let now = Self::now();
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = ?, error_message = ?, updated_at = ?
            WHERE id = ? AND status IN (?, ?) AND deleted_at IS NULL
              AND NOT EXISTS (
                SELECT 1 FROM sync_files
                WHERE sync_job_id = sync_jobs.id
                  AND deleted_at IS NULL
                  AND status IN (?, ?)
              )
            "#,
        )
        .bind(SyncStatus::Error.to_i32())
        .bind(message)
        .bind(now)
        .bind(id)
        .bind(SyncStatus::Pending.to_i32())
        .bind(SyncStatus::Syncing.to_i32())
        .bind(SyncFileStatus::Pending.to_i32())
        .bind(SyncFileStatus::Syncing.to_i32())
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to fail sync job"))?;

        Ok(result.rows_affected() > 0)
    }

    /// Cancel a sync job and stamp `cancelled_at`
    ///
    /// Returns whether this call performed the transition (false when the
    /// job was already terminal).
    pub async fn try_cancel_sync_job(&self, id: Id) -> Result<bool> {
        let now = Self::now();
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = ?, cancelled_at = ?, updated_at = ?
            WHERE id = ? AND status IN (?, ?) AND deleted_at IS NULL
            "#,
        )
        .bind(SyncStatus::Cancelled.to_i32())
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(SyncStatus::Pending.to_i32())
        .bind(SyncStatus::Syncing.to_i32())
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to cancel sync job"))?;

        Ok(result.rows_affected() > 0)
    }

    /// Quietly resume a sync job that had gone to `error`
    ///
    /// A late `file.completed` for a file the earlier failure never
    /// touched re-opens the job so its completion accounting works.
    pub async fn try_resume_sync_job(&self, id: Id) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = ?, error_message = NULL, updated_at = ?
            WHERE id = ? AND status = ? AND deleted_at IS NULL
            "#,
        )
        .bind(SyncStatus::Syncing.to_i32())
        .bind(Self::now())
        .bind(id)
        .bind(SyncStatus::Error.to_i32())
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to resume sync job"))?;

        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete a sync job together with its files
    ///
    /// Used when a cancelled download becomes syncable again: the old
    /// job's history is kept, and `ensure_sync_job` creates a fresh one
    /// under the one-live-job-per-download invariant.
    pub async fn soft_delete_sync_job(&self, id: Id) -> Result<()> {
        let now = Self::now();
        sqlx::query("UPDATE sync_files SET deleted_at = ?, updated_at = ? WHERE sync_job_id = ? AND deleted_at IS NULL")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err("failed to soft-delete sync files"))?;
        sqlx::query("UPDATE sync_jobs SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err("failed to soft-delete sync job"))?;
        Ok(())
    }

    /// Point a sync job at a new staging directory
    pub async fn update_sync_job_local_base(&self, id: Id, local_base: &str) -> Result<()> {
        sqlx::query(
            "UPDATE sync_jobs SET local_base = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(local_base)
        .bind(Self::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to update sync job local base"))?;
        Ok(())
    }

    /// Sync jobs that were mid-flight when the process last stopped
    pub async fn list_restorable_sync_jobs(&self) -> Result<Vec<SyncJobRow>> {
        let rows = sqlx::query_as::<_, SyncJobRow>(&format!(
            r#"
            SELECT {SYNC_JOB_COLUMNS} FROM sync_jobs
            WHERE status IN (?, ?) AND deleted_at IS NULL
            ORDER BY created_at ASC
            "#
        ))
        .bind(SyncStatus::Pending.to_i32())
        .bind(SyncStatus::Syncing.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("failed to list restorable sync jobs"))?;

        Ok(rows)
    }

    /// Get the sync file (or create one in `pending`) for a download file
    ///
    /// Runs in a transaction. The caller inspects an `Existing` result's
    /// status: a terminal row means the triggering event is a duplicate
    /// and must be ignored — this is the at-most-once-transfer gate.
    pub async fn ensure_sync_file(
        &self,
        sync_job_id: Id,
        download_file_id: Id,
        relative_path: &str,
        size_bytes: i64,
    ) -> Result<EnsureSyncFile> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(store_err("failed to begin sync file transaction"))?;

        let existing = sqlx::query_as::<_, SyncFileRow>(&format!(
            r#"
            SELECT {SYNC_FILE_COLUMNS} FROM sync_files
            WHERE sync_job_id = ? AND relative_path = ? AND deleted_at IS NULL
            "#
        ))
        .bind(sync_job_id)
        .bind(relative_path)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err("failed to check for existing sync file"))?;

        if let Some(row) = existing {
            tx.commit()
                .await
                .map_err(store_err("failed to commit sync file transaction"))?;
            return Ok(EnsureSyncFile::Existing(row));
        }

        let now = Self::now();
        let id = Id::generate();
        sqlx::query(
            r#"
            INSERT INTO sync_files (
                id, sync_job_id, download_file_id, relative_path,
                size_bytes, synced_bytes, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(sync_job_id)
        .bind(download_file_id)
        .bind(relative_path)
        .bind(size_bytes)
        .bind(SyncFileStatus::Pending.to_i32())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(store_err("failed to insert sync file"))?;

        tx.commit()
            .await
            .map_err(store_err("failed to commit sync file transaction"))?;

        let row = self
            .get_sync_file(id)
            .await?
            .ok_or_else(|| missing_row("sync file", id))?;
        Ok(EnsureSyncFile::Created(row))
    }

    /// Get a sync file by ID
    pub async fn get_sync_file(&self, id: Id) -> Result<Option<SyncFileRow>> {
        let row = sqlx::query_as::<_, SyncFileRow>(&format!(
            "SELECT {SYNC_FILE_COLUMNS} FROM sync_files WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("failed to get sync file"))?;

        Ok(row)
    }

    /// All live sync files of a job
    pub async fn list_sync_files(&self, sync_job_id: Id) -> Result<Vec<SyncFileRow>> {
        let rows = sqlx::query_as::<_, SyncFileRow>(&format!(
            r#"
            SELECT {SYNC_FILE_COLUMNS} FROM sync_files
            WHERE sync_job_id = ? AND deleted_at IS NULL
            ORDER BY relative_path
            "#
        ))
        .bind(sync_job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("failed to list sync files"))?;

        Ok(rows)
    }

    /// Transition a sync file `pending → syncing`
    ///
    /// Returns whether this call performed the transition (false means the
    /// file was cancelled or picked up elsewhere while queued).
    pub async fn try_start_sync_file(&self, id: Id) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_files
            SET status = ?, updated_at = ?
            WHERE id = ? AND status = ? AND deleted_at IS NULL
            "#,
        )
        .bind(SyncFileStatus::Syncing.to_i32())
        .bind(Self::now())
        .bind(id)
        .bind(SyncFileStatus::Pending.to_i32())
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to start sync file"))?;

        Ok(result.rows_affected() > 0)
    }

    /// Record transfer progress for a sync file
    pub async fn update_sync_file_progress(&self, id: Id, synced_bytes: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_files
            SET synced_bytes = MIN(?, size_bytes), updated_at = ?
            WHERE id = ? AND status = ? AND deleted_at IS NULL
            "#,
        )
        .bind(synced_bytes)
        .bind(Self::now())
        .bind(id)
        .bind(SyncFileStatus::Syncing.to_i32())
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to update sync file progress"))?;
        Ok(())
    }

    /// Mark a sync file complete (synced bytes snap to the full size)
    pub async fn complete_sync_file(&self, id: Id) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_files
            SET status = ?, synced_bytes = size_bytes, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(SyncFileStatus::Complete.to_i32())
        .bind(Self::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to complete sync file"))?;
        Ok(())
    }

    /// Mark a sync file failed with a message
    pub async fn fail_sync_file(&self, id: Id, message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_files
            SET status = ?, error_message = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(SyncFileStatus::Error.to_i32())
        .bind(message)
        .bind(Self::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to fail sync file"))?;
        Ok(())
    }

    /// Mark a sync file cancelled unless it already reached a terminal state
    pub async fn cancel_sync_file(&self, id: Id) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_files
            SET status = ?, updated_at = ?
            WHERE id = ? AND status IN (?, ?) AND deleted_at IS NULL
            "#,
        )
        .bind(SyncFileStatus::Cancelled.to_i32())
        .bind(Self::now())
        .bind(id)
        .bind(SyncFileStatus::Pending.to_i32())
        .bind(SyncFileStatus::Syncing.to_i32())
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to cancel sync file"))?;
        Ok(())
    }

    /// Cancel every non-terminal sync file of a job
    pub async fn cancel_open_sync_files(&self, sync_job_id: Id) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_files
            SET status = ?, updated_at = ?
            WHERE sync_job_id = ? AND status IN (?, ?) AND deleted_at IS NULL
            "#,
        )
        .bind(SyncFileStatus::Cancelled.to_i32())
        .bind(Self::now())
        .bind(sync_job_id)
        .bind(SyncFileStatus::Pending.to_i32())
        .bind(SyncFileStatus::Syncing.to_i32())
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to cancel open sync files"))?;
        Ok(())
    }

    /// Sum of synced bytes across a job's live sync files
    pub async fn sum_synced_bytes(&self, sync_job_id: Id) -> Result<i64> {
        let total: Option<i64> = sqlx::query_scalar::<_, Option<i64>>(
            r#"
            SELECT SUM(synced_bytes) FROM sync_files
            WHERE sync_job_id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(sync_job_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err("failed to sum synced bytes"))?;

        Ok(total.unwrap_or(0))
    }
}
