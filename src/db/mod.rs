//! Store layer for seedreap
//!
//! Handles SQLite persistence for download clients, apps, download jobs
//! and their files, sync/move/app jobs, tracked downloads, and the event
//! history. The store is single-writer: one process owns the database
//! file.
//!
//! Soft delete: every mutable entity carries a nullable `deleted_at`.
//! Queries exclude soft-deleted rows by default; callers opt in through
//! the explicit `*_with_deleted` variants. Uniqueness invariants are
//! enforced with partial unique indexes scoped to live rows, so a
//! soft-deleted torrent can be re-discovered under the same identity.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by aggregate:
//! - [`migrations`] — lifecycle, schema migrations
//! - [`clients`] — download client rows
//! - [`apps`] — media app rows
//! - [`downloads`] — download jobs and their files
//! - [`sync_jobs`] — sync jobs and sync files
//! - [`move_jobs`] — move jobs
//! - [`app_jobs`] — app notification jobs
//! - [`tracked`] — tracked download projection rows
//! - [`events`] — append-only event history

use crate::types::Id;
use sqlx::{FromRow, sqlite::SqlitePool};

mod app_jobs;
mod apps;
mod clients;
mod downloads;
mod events;
mod migrations;
mod move_jobs;
mod sync_jobs;
mod tracked;

pub use sync_jobs::EnsureSyncFile;
pub use app_jobs::EnsureAppJob;

/// New download client to be upserted into the database
#[derive(Debug, Clone)]
pub struct NewClient {
    /// Unique display name (config map key)
    pub name: String,
    /// Client kind tag ("qbittorrent")
    pub kind: String,
    /// WebUI endpoint URL
    pub url: String,
    /// WebUI username
    pub username: Option<String>,
    /// WebUI password
    pub password: Option<String>,
    /// SSH host for file transfers
    pub ssh_host: String,
    /// SSH port
    pub ssh_port: i64,
    /// SSH user
    pub ssh_user: String,
    /// SSH private key file
    pub ssh_key_file: Option<String>,
    /// Whether the client is polled
    pub enabled: bool,
}

/// Download client record from the database
#[derive(Debug, Clone, FromRow)]
pub struct ClientRow {
    /// Entity ID
    pub id: Id,
    /// Unique display name
    pub name: String,
    /// Client kind tag
    pub kind: String,
    /// WebUI endpoint URL
    pub url: String,
    /// WebUI username
    pub username: Option<String>,
    /// WebUI password
    pub password: Option<String>,
    /// SSH host for file transfers
    pub ssh_host: String,
    /// SSH port
    pub ssh_port: i64,
    /// SSH user
    pub ssh_user: String,
    /// SSH private key file
    pub ssh_key_file: Option<String>,
    /// Whether the client is polled
    pub enabled: bool,
    /// Unix timestamp of the last validated connection
    pub last_connected_at: Option<i64>,
    /// Unix timestamp when the row was created
    pub created_at: i64,
    /// Unix timestamp of the last update
    pub updated_at: i64,
    /// Soft-delete timestamp (NULL = live)
    pub deleted_at: Option<i64>,
}

/// New media app to be upserted into the database
#[derive(Debug, Clone)]
pub struct NewApp {
    /// Unique display name (config map key)
    pub name: String,
    /// App kind tag ("sonarr", "radarr", "passthrough")
    pub kind: String,
    /// API endpoint URL
    pub url: String,
    /// API key
    pub api_key: String,
    /// Torrent category this app claims
    pub category: String,
    /// Destination override
    pub downloads_path: Option<String>,
    /// Remove local artifacts when the category moves away
    pub cleanup_on_category_change: bool,
    /// Remove the destination when the torrent is removed remotely
    pub cleanup_on_remove: bool,
    /// Whether the app participates in the pipeline
    pub enabled: bool,
}

/// Media app record from the database
#[derive(Debug, Clone, FromRow)]
pub struct AppRow {
    /// Entity ID
    pub id: Id,
    /// Unique display name
    pub name: String,
    /// App kind tag
    pub kind: String,
    /// API endpoint URL
    pub url: String,
    /// API key
    pub api_key: String,
    /// Torrent category this app claims
    pub category: String,
    /// Destination override
    pub downloads_path: Option<String>,
    /// Remove local artifacts when the category moves away
    pub cleanup_on_category_change: bool,
    /// Remove the destination when the torrent is removed remotely
    pub cleanup_on_remove: bool,
    /// Whether the app participates in the pipeline
    pub enabled: bool,
    /// Unix timestamp when the row was created
    pub created_at: i64,
    /// Unix timestamp of the last update
    pub updated_at: i64,
    /// Soft-delete timestamp (NULL = live)
    pub deleted_at: Option<i64>,
}

/// New download job discovered on a client
#[derive(Debug, Clone)]
pub struct NewDownloadJob {
    /// Owning client
    pub client_id: Id,
    /// Client-assigned torrent hash
    pub remote_id: String,
    /// Display name
    pub name: String,
    /// Current category
    pub category: String,
    /// Normalised status code
    pub status: i32,
    /// Total size in bytes
    pub size_bytes: i64,
    /// Downloaded bytes on the remote
    pub downloaded_bytes: i64,
    /// Remote progress (0.0 to 1.0)
    pub progress: f64,
    /// Save path on the seedbox
    pub save_path: String,
    /// Content path on the seedbox
    pub content_path: String,
}

/// Download job record from the database
#[derive(Debug, Clone, FromRow)]
pub struct DownloadJobRow {
    /// Entity ID
    pub id: Id,
    /// Owning client
    pub client_id: Id,
    /// Client-assigned torrent hash
    pub remote_id: String,
    /// Display name
    pub name: String,
    /// Current category
    pub category: String,
    /// Category before the most recent category change
    pub previous_category: Option<String>,
    /// Normalised status code (see [`crate::types::TorrentState`])
    pub status: i32,
    /// Total size in bytes
    pub size_bytes: i64,
    /// Downloaded bytes on the remote
    pub downloaded_bytes: i64,
    /// Remote progress (0.0 to 1.0)
    pub progress: f64,
    /// Save path on the seedbox
    pub save_path: String,
    /// Content path on the seedbox
    pub content_path: String,
    /// Unix timestamp of first discovery
    pub discovered_at: i64,
    /// Unix timestamp when the remote download completed
    pub downloaded_at: Option<i64>,
    /// Unix timestamp when the row was created
    pub created_at: i64,
    /// Unix timestamp of the last update
    pub updated_at: i64,
    /// Soft-delete timestamp (NULL = live)
    pub deleted_at: Option<i64>,
}

/// Field set persisted by the poller when a tracked torrent changes
#[derive(Debug, Clone)]
pub struct DownloadJobUpdate {
    /// Job to update
    pub id: Id,
    /// Display name
    pub name: String,
    /// Current category
    pub category: String,
    /// Category before the most recent change (set on category change)
    pub previous_category: Option<String>,
    /// Normalised status code
    pub status: i32,
    /// Total size in bytes
    pub size_bytes: i64,
    /// Downloaded bytes on the remote
    pub downloaded_bytes: i64,
    /// Remote progress (0.0 to 1.0)
    pub progress: f64,
    /// Save path on the seedbox
    pub save_path: String,
    /// Content path on the seedbox
    pub content_path: String,
    /// Completion timestamp, stamped on the transition to complete
    pub downloaded_at: Option<i64>,
}

/// New file within a download job
#[derive(Debug, Clone)]
pub struct NewDownloadFile {
    /// Owning download job
    pub download_job_id: Id,
    /// Path relative to the torrent's save path
    pub relative_path: String,
    /// Size in bytes
    pub size_bytes: i64,
    /// Downloaded bytes on the remote
    pub downloaded_bytes: i64,
    /// Remote progress (0.0 to 1.0)
    pub progress: f64,
    /// Client priority; 0 means excluded by the user
    pub priority: i64,
}

/// Download file record from the database
#[derive(Debug, Clone, FromRow)]
pub struct DownloadFileRow {
    /// Entity ID
    pub id: Id,
    /// Owning download job
    pub download_job_id: Id,
    /// Path relative to the torrent's save path
    pub relative_path: String,
    /// Size in bytes
    pub size_bytes: i64,
    /// Downloaded bytes on the remote
    pub downloaded_bytes: i64,
    /// Remote progress (0.0 to 1.0)
    pub progress: f64,
    /// Client priority; 0 means excluded by the user
    pub priority: i64,
    /// Unix timestamp when the row was created
    pub created_at: i64,
    /// Unix timestamp of the last update
    pub updated_at: i64,
    /// Soft-delete timestamp (NULL = live)
    pub deleted_at: Option<i64>,
}

impl DownloadFileRow {
    /// Whether the remote reports this file as fully downloaded
    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0
    }

    /// Whether the user excluded this file on the client
    pub fn is_excluded(&self) -> bool {
        self.priority == 0
    }
}

/// Sync job record from the database
#[derive(Debug, Clone, FromRow)]
pub struct SyncJobRow {
    /// Entity ID
    pub id: Id,
    /// Owning download job
    pub download_job_id: Id,
    /// Directory on the seedbox that relative paths resolve against
    pub remote_base: String,
    /// Local staging directory
    pub local_base: String,
    /// Status code (see [`crate::types::SyncStatus`])
    pub status: i32,
    /// Error message for failed jobs
    pub error_message: Option<String>,
    /// Unix timestamp when the first transfer started
    pub started_at: Option<i64>,
    /// Unix timestamp when the job completed
    pub completed_at: Option<i64>,
    /// Unix timestamp when the job was cancelled
    pub cancelled_at: Option<i64>,
    /// Unix timestamp when the row was created
    pub created_at: i64,
    /// Unix timestamp of the last update
    pub updated_at: i64,
    /// Soft-delete timestamp (NULL = live)
    pub deleted_at: Option<i64>,
}

/// Sync file record from the database
#[derive(Debug, Clone, FromRow)]
pub struct SyncFileRow {
    /// Entity ID
    pub id: Id,
    /// Owning sync job
    pub sync_job_id: Id,
    /// The download file this transfer mirrors
    pub download_file_id: Id,
    /// Path relative to the bases
    pub relative_path: String,
    /// Size in bytes
    pub size_bytes: i64,
    /// Bytes transferred so far
    pub synced_bytes: i64,
    /// Status code (see [`crate::types::SyncFileStatus`])
    pub status: i32,
    /// Error message for failed transfers
    pub error_message: Option<String>,
    /// Unix timestamp when the row was created
    pub created_at: i64,
    /// Unix timestamp of the last update
    pub updated_at: i64,
    /// Soft-delete timestamp (NULL = live)
    pub deleted_at: Option<i64>,
}

/// Move job record from the database
#[derive(Debug, Clone, FromRow)]
pub struct MoveJobRow {
    /// Entity ID
    pub id: Id,
    /// Owning download job
    pub download_job_id: Id,
    /// Staging tree being promoted
    pub source_path: String,
    /// Destination tree
    pub destination_path: String,
    /// Status code (see [`crate::types::MoveStatus`])
    pub status: i32,
    /// Error message for failed moves
    pub error_message: Option<String>,
    /// Unix timestamp when the row was created
    pub created_at: i64,
    /// Unix timestamp of the last update
    pub updated_at: i64,
    /// Soft-delete timestamp (NULL = live)
    pub deleted_at: Option<i64>,
}

/// App notification job record from the database
#[derive(Debug, Clone, FromRow)]
pub struct AppJobRow {
    /// Entity ID
    pub id: Id,
    /// Owning download job
    pub download_job_id: Id,
    /// Name of the notified app
    pub app_name: String,
    /// Path sent to the app
    pub path: String,
    /// Status code (see [`crate::types::AppJobStatus`])
    pub status: i32,
    /// Error message for failed notifications
    pub error_message: Option<String>,
    /// Unix timestamp when the row was created
    pub created_at: i64,
    /// Unix timestamp of the last update
    pub updated_at: i64,
    /// Soft-delete timestamp (NULL = live)
    pub deleted_at: Option<i64>,
}

/// New tracked download projection row
#[derive(Debug, Clone)]
pub struct NewTracked {
    /// The projected download job
    pub download_job_id: Id,
    /// Cached display name
    pub name: String,
    /// Cached category
    pub category: String,
    /// Name of the first matching app
    pub app_name: Option<String>,
    /// Workflow state code
    pub state: i32,
    /// Total size of selected files
    pub total_size_bytes: i64,
    /// Synced bytes of selected files
    pub completed_size_bytes: i64,
    /// Number of selected files
    pub total_files: i64,
    /// Unix timestamp of first discovery
    pub discovered_at: i64,
}

/// Tracked download record from the database
#[derive(Debug, Clone, FromRow)]
pub struct TrackedRow {
    /// Entity ID
    pub id: Id,
    /// The projected download job
    pub download_job_id: Id,
    /// Cached display name
    pub name: String,
    /// Cached category
    pub category: String,
    /// Name of the first matching app
    pub app_name: Option<String>,
    /// Workflow state code (see [`crate::types::TrackedState`])
    pub state: i32,
    /// Total size of selected files
    pub total_size_bytes: i64,
    /// Synced bytes of selected files
    pub completed_size_bytes: i64,
    /// Number of selected files
    pub total_files: i64,
    /// Most recent failure message, if any
    pub error_message: Option<String>,
    /// Unix timestamp of first discovery
    pub discovered_at: i64,
    /// Unix timestamp when the pipeline finished (imported)
    pub completed_at: Option<i64>,
    /// Unix timestamp when the row was created
    pub created_at: i64,
    /// Unix timestamp of the last update
    pub updated_at: i64,
    /// Soft-delete timestamp (NULL = live)
    pub deleted_at: Option<i64>,
}

/// Event history record from the database
#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    /// Entity ID
    pub id: Id,
    /// Dotted event type string
    pub kind: String,
    /// Timeline message
    pub message: String,
    /// Subject entity type string
    pub subject_type: String,
    /// Subject entity ID
    pub subject_id: Option<String>,
    /// Owning download job, when one exists
    pub download_id: Option<String>,
    /// App name for app-scoped events
    pub app_name: Option<String>,
    /// JSON-encoded details map
    pub details: String,
    /// Publication timestamp
    pub created_at: i64,
}

/// Database handle for seedreap
///
/// Cheap to clone; all clones share the same connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Current Unix timestamp in seconds
    pub(crate) fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Map a sqlx error into the store taxonomy, keeping the query context
pub(crate) fn store_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> crate::error::Error {
    move |e| {
        let is_constraint = matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation() || db.is_foreign_key_violation());
        if is_constraint {
            crate::error::Error::Store(crate::error::StoreError::Constraint(format!(
                "{}: {}",
                context, e
            )))
        } else {
            crate::error::Error::Store(crate::error::StoreError::QueryFailed(format!(
                "{}: {}",
                context, e
            )))
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
