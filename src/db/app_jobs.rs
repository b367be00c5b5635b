//! App notification jobs.
//!
//! Owned by the app-notify controller. (download_job_id, app_name) is
//! unique among live rows: one notification slot per app per download.

use crate::error::Result;
use crate::types::{AppJobStatus, Id};

use super::clients::missing_row;
use super::{AppJobRow, Database, store_err};

const APP_JOB_COLUMNS: &str = r#"
    id, download_job_id, app_name, path, status, error_message,
    created_at, updated_at, deleted_at
"#;

/// Outcome of [`Database::ensure_app_job`]
#[derive(Debug, Clone)]
pub enum EnsureAppJob {
    /// A pending job ready to be claimed — fresh, left over from an
    /// interrupted run, or an errored job reset by a pipeline re-entry
    Ready(AppJobRow),
    /// The app already acknowledged this download; never re-notify
    AlreadyComplete(AppJobRow),
    /// A notification is currently being sent
    InFlight(AppJobRow),
}

impl Database {
    /// Get the notification job for (download, app), if any
    pub async fn get_app_job(
        &self,
        download_job_id: Id,
        app_name: &str,
    ) -> Result<Option<AppJobRow>> {
        let row = sqlx::query_as::<_, AppJobRow>(&format!(
            r#"
            SELECT {APP_JOB_COLUMNS} FROM app_jobs
            WHERE download_job_id = ? AND app_name = ? AND deleted_at IS NULL
            "#
        ))
        .bind(download_job_id)
        .bind(app_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("failed to get app job"))?;

        Ok(row)
    }

    /// All notification jobs of a download
    pub async fn list_app_jobs(&self, download_job_id: Id) -> Result<Vec<AppJobRow>> {
        let rows = sqlx::query_as::<_, AppJobRow>(&format!(
            r#"
            SELECT {APP_JOB_COLUMNS} FROM app_jobs
            WHERE download_job_id = ? AND deleted_at IS NULL
            ORDER BY app_name
            "#
        ))
        .bind(download_job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("failed to list app jobs"))?;

        Ok(rows)
    }

    /// Get or create the notification slot for (download, app)
    ///
    /// A completed job is returned as-is (never re-notified); an errored
    /// job is reset to `pending` so a pipeline re-entry retries it; a
    /// pending or processing job is reported as in flight.
    pub async fn ensure_app_job(
        &self,
        download_job_id: Id,
        app_name: &str,
        path: &str,
    ) -> Result<EnsureAppJob> {
        let now = Self::now();

        if let Some(existing) = self.get_app_job(download_job_id, app_name).await? {
            return match AppJobStatus::from_i32(existing.status) {
                AppJobStatus::Complete => Ok(EnsureAppJob::AlreadyComplete(existing)),
                // A pending slot may be an interrupted run's leftovers;
                // hand it back and let the claim transition arbitrate
                AppJobStatus::Pending => Ok(EnsureAppJob::Ready(existing)),
                AppJobStatus::Processing => Ok(EnsureAppJob::InFlight(existing)),
                AppJobStatus::Error => {
                    sqlx::query(
                        r#"
                        UPDATE app_jobs
                        SET status = ?, path = ?, error_message = NULL, updated_at = ?
                        WHERE id = ?
                        "#,
                    )
                    .bind(AppJobStatus::Pending.to_i32())
                    .bind(path)
                    .bind(now)
                    .bind(existing.id)
                    .execute(&self.pool)
                    .await
                    .map_err(store_err("failed to reset app job"))?;

                    let row = self
                        .get_app_job(download_job_id, app_name)
                        .await?
                        .ok_or_else(|| missing_row("app job", existing.id))?;
                    Ok(EnsureAppJob::Ready(row))
                }
            };
        }

        let id = Id::generate();
        sqlx::query(
            r#"
            INSERT INTO app_jobs (
                id, download_job_id, app_name, path, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(download_job_id)
        .bind(app_name)
        .bind(path)
        .bind(AppJobStatus::Pending.to_i32())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to insert app job"))?;

        let row = self
            .get_app_job(download_job_id, app_name)
            .await?
            .ok_or_else(|| missing_row("app job", id))?;
        Ok(EnsureAppJob::Ready(row))
    }

    /// Claim a pending notification job (`pending → processing`)
    ///
    /// Conditional so two concurrent re-entries cannot both send: only
    /// the winner proceeds.
    pub async fn try_begin_app_job(&self, id: Id) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE app_jobs
            SET status = ?, updated_at = ?
            WHERE id = ? AND status = ? AND deleted_at IS NULL
            "#,
        )
        .bind(AppJobStatus::Processing.to_i32())
        .bind(Self::now())
        .bind(id)
        .bind(AppJobStatus::Pending.to_i32())
        .execute(&self.pool)
        .await
        .map_err(store_err("failed to claim app job"))?;

        Ok(result.rows_affected() > 0)
    }

    /// Update a notification job's status (and error message, for failures)
    pub async fn set_app_job_status(
        &self,
        id: Id,
        status: AppJobStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE app_jobs
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
        .map_err(store_err("failed to update app job status"))?;
        Ok(())
    }
}
