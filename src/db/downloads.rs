//! Download jobs and their files.
//!
//! These rows are owned by the download controller: it is the only writer.
//! Removal of a job hard-deletes it and cascades into every dependent row
//! (files, sync/move/app jobs, tracked download).

use crate::error::Result;
use crate::types::Id;

use super::clients::missing_row;
use super::{Database, DownloadFileRow, DownloadJobRow, DownloadJobUpdate, NewDownloadFile, NewDownloadJob, store_err};

const JOB_COLUMNS: &str = r#"
    id, client_id, remote_id, name, category, previous_category,
    status, size_bytes, downloaded_bytes, progress,
    save_path, content_path, discovered_at, downloaded_at,
    created_at, updated_at, deleted_at
"#;

const FILE_COLUMNS: &str = r#"
    id, download_job_id, relative_path, size_bytes, downloaded_bytes,
    progress, priority, created_at, updated_at, deleted_at
"#;

impl Database {
    /// Insert a freshly discovered download job
    pub async fn insert_download_job(&self, job: &NewDownloadJob) -> Result<DownloadJobRow> {
        let now = Self::now();
        let id = Id::generate();
        let downloaded_at = (job.progress >= 1.0).then_some(now);

        sqlx::query(
            r#"
            INSERT INTO download_jobs (
                id, client_id, remote_id, name, category,
                status, size_bytes, downloaded_bytes, progress,
                save_path, content_path, discovered_at, downloaded_at,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(job.client_id)
        .bind(&job.remote_id)
        .bind(&job.name)
        .bind(&job.category)
        .bind(job.status)
        .bind(job.size_bytes)
        .bind(job.downloaded_bytes)
        .bind(job.progress)
        .bind(&job.save_path)
        .bind(&job.content_path)
        .bind(now)
        .bind(downloaded_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to insert download job"))?;

        self.get_download_job(id)
            .await?
            .ok_or_else(|| missing_row("download job", id))
    }

    /// Get a download job by ID
    pub async fn get_download_job(&self, id: Id) -> Result<Option<DownloadJobRow>> {
        let row = sqlx::query_as::<_, DownloadJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM download_jobs WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("failed to get download job"))?;

        Ok(row)
    }

    /// Get a download job by its client identity
    pub async fn get_download_job_by_remote(
        &self,
        client_id: Id,
        remote_id: &str,
    ) -> Result<Option<DownloadJobRow>> {
        let row = sqlx::query_as::<_, DownloadJobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM download_jobs
            WHERE client_id = ? AND remote_id = ? AND deleted_at IS NULL
            "#
        ))
        .bind(client_id)
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("failed to get download job by remote id"))?;

        Ok(row)
    }

    /// All live jobs of one client
    pub async fn list_download_jobs_for_client(&self, client_id: Id) -> Result<Vec<DownloadJobRow>> {
        let rows = sqlx::query_as::<_, DownloadJobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM download_jobs
            WHERE client_id = ? AND deleted_at IS NULL
            ORDER BY discovered_at ASC
            "#
        ))
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("failed to list download jobs for client"))?;

        Ok(rows)
    }

    /// All live jobs across all clients, newest discovery first
    pub async fn list_download_jobs(&self) -> Result<Vec<DownloadJobRow>> {
        let rows = sqlx::query_as::<_, DownloadJobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM download_jobs
            WHERE deleted_at IS NULL
            ORDER BY discovered_at DESC
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("failed to list download jobs"))?;

        Ok(rows)
    }

    /// Persist the poller's diff of a tracked job
    pub async fn update_download_job(&self, update: &DownloadJobUpdate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE download_jobs
            SET name = ?, category = ?, previous_category = ?,
                status = ?, size_bytes = ?, downloaded_bytes = ?, progress = ?,
                save_path = ?, content_path = ?, downloaded_at = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(&update.name)
        .bind(&update.category)
        .bind(&update.previous_category)
        .bind(update.status)
        .bind(update.size_bytes)
        .bind(update.downloaded_bytes)
        .bind(update.progress)
        .bind(&update.save_path)
        .bind(&update.content_path)
        .bind(update.downloaded_at)
        .bind(Self::now())
        .bind(update.id)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to update download job"))?;

        Ok(())
    }

    /// Hard-delete a job; the schema cascades into all dependent rows
    pub async fn delete_download_job(&self, id: Id) -> Result<()> {
        sqlx::query("DELETE FROM download_jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err("failed to delete download job"))?;
        Ok(())
    }

    /// Insert a file row, or refresh size/progress/priority of an existing one
    pub async fn upsert_download_file(&self, file: &NewDownloadFile) -> Result<DownloadFileRow> {
        let now = Self::now();

        if let Some(existing) = self
            .get_download_file(file.download_job_id, &file.relative_path)
            .await?
        {
            sqlx::query(
                r#"
                UPDATE download_files
                SET size_bytes = ?, downloaded_bytes = ?, progress = ?, priority = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(file.size_bytes)
            .bind(file.downloaded_bytes)
            .bind(file.progress)
            .bind(file.priority)
            .bind(now)
            .bind(existing.id)
            .execute(&self.pool)
            .await
            .map_err(store_err("failed to update download file"))?;

            return Ok(DownloadFileRow {
                size_bytes: file.size_bytes,
                downloaded_bytes: file.downloaded_bytes,
                progress: file.progress,
                priority: file.priority,
                updated_at: now,
                ..existing
            });
        }

        let id = Id::generate();
        sqlx::query(
            r#"
            INSERT INTO download_files (
                id, download_job_id, relative_path, size_bytes,
                downloaded_bytes, progress, priority, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(file.download_job_id)
        .bind(&file.relative_path)
        .bind(file.size_bytes)
        .bind(file.downloaded_bytes)
        .bind(file.progress)
        .bind(file.priority)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to insert download file"))?;

        self.get_download_file_by_id(id)
            .await?
            .ok_or_else(|| missing_row("download file", id))
    }

    /// Get a file by ID
    pub async fn get_download_file_by_id(&self, id: Id) -> Result<Option<DownloadFileRow>> {
        let row = sqlx::query_as::<_, DownloadFileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM download_files WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("failed to get download file"))?;

        Ok(row)
    }

    /// Get a file by its unique (job, relative path) identity
    pub async fn get_download_file(
        &self,
        download_job_id: Id,
        relative_path: &str,
    ) -> Result<Option<DownloadFileRow>> {
        let row = sqlx::query_as::<_, DownloadFileRow>(&format!(
            r#"
            SELECT {FILE_COLUMNS} FROM download_files
            WHERE download_job_id = ? AND relative_path = ? AND deleted_at IS NULL
            "#
        ))
        .bind(download_job_id)
        .bind(relative_path)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("failed to get download file by path"))?;

        Ok(row)
    }

    /// All live files of a job
    pub async fn list_download_files(&self, download_job_id: Id) -> Result<Vec<DownloadFileRow>> {
        let rows = sqlx::query_as::<_, DownloadFileRow>(&format!(
            r#"
            SELECT {FILE_COLUMNS} FROM download_files
            WHERE download_job_id = ? AND deleted_at IS NULL
            ORDER BY relative_path
            "#
        ))
        .bind(download_job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("failed to list download files"))?;

        Ok(rows)
    }
}
