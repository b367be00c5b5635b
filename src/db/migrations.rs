//! Database lifecycle and schema migrations.

use crate::error::{Error, Result, StoreError};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

impl Database {
    /// Open (creating if needed) the database file and run migrations
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::Store(StoreError::ConnectionFailed(format!(
                        "failed to create database directory: {}",
                        e
                    )))
                })?;
            }
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Store(StoreError::ConnectionFailed(format!(
                    "failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Store(StoreError::ConnectionFailed(format!(
                "failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Store(StoreError::ConnectionFailed(format!(
                "failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Store(StoreError::MigrationFailed(format!(
                "failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(version) FROM schema_version")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Store(StoreError::QueryFailed(format!(
                        "failed to query schema version: {}",
                        e
                    )))
                })?;

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&mut conn).await?;
        }
        if current_version < 2 {
            Self::migrate_v2(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: initial schema
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("applying database migration v1");

        // Transaction so a partial failure does not leave a broken schema
        exec(conn, "BEGIN").await?;

        let result = async {
            Self::create_clients_schema(conn).await?;
            Self::create_apps_schema(conn).await?;
            Self::create_download_schema(conn).await?;
            Self::create_sync_schema(conn).await?;
            Self::create_move_schema(conn).await?;
            Self::create_app_job_schema(conn).await?;
            Self::create_tracked_schema(conn).await?;
            Self::create_event_schema(conn).await?;
            Self::record_migration(conn, 1).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => exec(conn, "COMMIT").await,
            Err(e) => {
                exec(conn, "ROLLBACK").await.ok();
                Err(e)
            }
        }
    }

    /// Migration v2: lookup indexes for the event timeline
    async fn migrate_v2(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("applying database migration v2");

        exec(conn, "BEGIN").await?;

        let result = async {
            exec(
                conn,
                "CREATE INDEX IF NOT EXISTS ix_events_download_id ON events (download_id)",
            )
            .await?;
            exec(
                conn,
                "CREATE INDEX IF NOT EXISTS ix_events_created_at ON events (created_at)",
            )
            .await?;
            Self::record_migration(conn, 2).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => exec(conn, "COMMIT").await,
            Err(e) => {
                exec(conn, "ROLLBACK").await.ok();
                Err(e)
            }
        }
    }

    async fn create_clients_schema(conn: &mut SqliteConnection) -> Result<()> {
        exec(
            conn,
            r#"
            CREATE TABLE download_clients (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                url TEXT NOT NULL,
                username TEXT,
                password TEXT,
                ssh_host TEXT NOT NULL,
                ssh_port INTEGER NOT NULL DEFAULT 22,
                ssh_user TEXT NOT NULL,
                ssh_key_file TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                last_connected_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            )
            "#,
        )
        .await?;
        exec(
            conn,
            r#"
            CREATE UNIQUE INDEX ux_download_clients_name
            ON download_clients (name) WHERE deleted_at IS NULL
            "#,
        )
        .await
    }

    async fn create_apps_schema(conn: &mut SqliteConnection) -> Result<()> {
        exec(
            conn,
            r#"
            CREATE TABLE apps (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                url TEXT NOT NULL DEFAULT '',
                api_key TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL,
                downloads_path TEXT,
                cleanup_on_category_change INTEGER NOT NULL DEFAULT 0,
                cleanup_on_remove INTEGER NOT NULL DEFAULT 0,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            )
            "#,
        )
        .await?;
        exec(
            conn,
            r#"
            CREATE UNIQUE INDEX ux_apps_name
            ON apps (name) WHERE deleted_at IS NULL
            "#,
        )
        .await
    }

    async fn create_download_schema(conn: &mut SqliteConnection) -> Result<()> {
        exec(
            conn,
            r#"
            CREATE TABLE download_jobs (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL REFERENCES download_clients (id) ON DELETE CASCADE,
                remote_id TEXT NOT NULL,
                name TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT '',
                previous_category TEXT,
                status INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                downloaded_bytes INTEGER NOT NULL DEFAULT 0,
                progress REAL NOT NULL DEFAULT 0,
                save_path TEXT NOT NULL DEFAULT '',
                content_path TEXT NOT NULL DEFAULT '',
                discovered_at INTEGER NOT NULL,
                downloaded_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            )
            "#,
        )
        .await?;
        exec(
            conn,
            r#"
            CREATE UNIQUE INDEX ux_download_jobs_client_remote
            ON download_jobs (client_id, remote_id) WHERE deleted_at IS NULL
            "#,
        )
        .await?;
        exec(
            conn,
            r#"
            CREATE TABLE download_files (
                id TEXT PRIMARY KEY,
                download_job_id TEXT NOT NULL REFERENCES download_jobs (id) ON DELETE CASCADE,
                relative_path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                downloaded_bytes INTEGER NOT NULL DEFAULT 0,
                progress REAL NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            )
            "#,
        )
        .await?;
        exec(
            conn,
            r#"
            CREATE UNIQUE INDEX ux_download_files_job_path
            ON download_files (download_job_id, relative_path) WHERE deleted_at IS NULL
            "#,
        )
        .await
    }

    async fn create_sync_schema(conn: &mut SqliteConnection) -> Result<()> {
        exec(
            conn,
            r#"
            CREATE TABLE sync_jobs (
                id TEXT PRIMARY KEY,
                download_job_id TEXT NOT NULL REFERENCES download_jobs (id) ON DELETE CASCADE,
                remote_base TEXT NOT NULL,
                local_base TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                started_at INTEGER,
                completed_at INTEGER,
                cancelled_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            )
            "#,
        )
        .await?;
        exec(
            conn,
            r#"
            CREATE UNIQUE INDEX ux_sync_jobs_download
            ON sync_jobs (download_job_id) WHERE deleted_at IS NULL
            "#,
        )
        .await?;
        exec(
            conn,
            r#"
            CREATE TABLE sync_files (
                id TEXT PRIMARY KEY,
                sync_job_id TEXT NOT NULL REFERENCES sync_jobs (id) ON DELETE CASCADE,
                download_file_id TEXT NOT NULL REFERENCES download_files (id) ON DELETE CASCADE,
                relative_path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                synced_bytes INTEGER NOT NULL DEFAULT 0,
                status INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            )
            "#,
        )
        .await?;
        exec(
            conn,
            r#"
            CREATE UNIQUE INDEX ux_sync_files_job_path
            ON sync_files (sync_job_id, relative_path) WHERE deleted_at IS NULL
            "#,
        )
        .await
    }

    async fn create_move_schema(conn: &mut SqliteConnection) -> Result<()> {
        exec(
            conn,
            r#"
            CREATE TABLE move_jobs (
                id TEXT PRIMARY KEY,
                download_job_id TEXT NOT NULL REFERENCES download_jobs (id) ON DELETE CASCADE,
                source_path TEXT NOT NULL,
                destination_path TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            )
            "#,
        )
        .await?;
        exec(
            conn,
            r#"
            CREATE UNIQUE INDEX ux_move_jobs_download
            ON move_jobs (download_job_id) WHERE deleted_at IS NULL
            "#,
        )
        .await
    }

    async fn create_app_job_schema(conn: &mut SqliteConnection) -> Result<()> {
        exec(
            conn,
            r#"
            CREATE TABLE app_jobs (
                id TEXT PRIMARY KEY,
                download_job_id TEXT NOT NULL REFERENCES download_jobs (id) ON DELETE CASCADE,
                app_name TEXT NOT NULL,
                path TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            )
            "#,
        )
        .await?;
        exec(
            conn,
            r#"
            CREATE UNIQUE INDEX ux_app_jobs_download_app
            ON app_jobs (download_job_id, app_name) WHERE deleted_at IS NULL
            "#,
        )
        .await
    }

    async fn create_tracked_schema(conn: &mut SqliteConnection) -> Result<()> {
        exec(
            conn,
            r#"
            CREATE TABLE tracked_downloads (
                id TEXT PRIMARY KEY,
                download_job_id TEXT NOT NULL REFERENCES download_jobs (id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                category TEXT NOT NULL,
                app_name TEXT,
                state INTEGER NOT NULL DEFAULT 0,
                total_size_bytes INTEGER NOT NULL DEFAULT 0,
                completed_size_bytes INTEGER NOT NULL DEFAULT 0,
                total_files INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                discovered_at INTEGER NOT NULL,
                completed_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            )
            "#,
        )
        .await?;
        exec(
            conn,
            r#"
            CREATE UNIQUE INDEX ux_tracked_downloads_download
            ON tracked_downloads (download_job_id) WHERE deleted_at IS NULL
            "#,
        )
        .await
    }

    async fn create_event_schema(conn: &mut SqliteConnection) -> Result<()> {
        exec(
            conn,
            r#"
            CREATE TABLE events (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                message TEXT NOT NULL DEFAULT '',
                subject_type TEXT NOT NULL,
                subject_id TEXT,
                download_id TEXT,
                app_name TEXT,
                details TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .await
    }

    async fn record_migration(conn: &mut SqliteConnection, version: i64) -> Result<()> {
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(Self::now())
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Store(StoreError::MigrationFailed(format!(
                    "failed to record migration v{}: {}",
                    version, e
                )))
            })?;
        Ok(())
    }
}

async fn exec(conn: &mut SqliteConnection, sql: &str) -> Result<()> {
    sqlx::query(sql).execute(&mut *conn).await.map_err(|e| {
        Error::Store(StoreError::MigrationFailed(format!(
            "migration statement failed: {}",
            e
        )))
    })?;
    Ok(())
}
