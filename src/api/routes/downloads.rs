//! Download listing and detail handlers.

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::api::AppState;
use crate::api::error_response::ApiError;
use crate::db::{AppJobRow, DownloadFileRow, DownloadJobRow, MoveJobRow, SyncFileRow, SyncJobRow, TrackedRow};
use crate::types::{AppJobStatus, Id, MoveStatus, SyncFileStatus, SyncStatus, TorrentState, TrackedState};

/// One download in the list view
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadSummary {
    /// Download job ID
    pub id: Id,
    /// Display name
    pub name: String,
    /// Current category
    pub category: String,
    /// Remote client status
    pub status: TorrentState,
    /// Remote progress (0.0 to 1.0)
    pub progress: f64,
    /// Total size in bytes
    pub size_bytes: i64,
    /// Workflow state, when the download is tracked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TrackedState>,
    /// Synced bytes of the selected files
    pub completed_size_bytes: i64,
    /// Most recent failure message, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Unix timestamp of first discovery
    pub discovered_at: i64,
}

fn summary(job: &DownloadJobRow, tracked: Option<&TrackedRow>) -> DownloadSummary {
    DownloadSummary {
        id: job.id,
        name: job.name.clone(),
        category: job.category.clone(),
        status: TorrentState::from_i32(job.status),
        progress: job.progress,
        size_bytes: job.size_bytes,
        state: tracked.map(|t| TrackedState::from_i32(t.state)),
        completed_size_bytes: tracked.map(|t| t.completed_size_bytes).unwrap_or(0),
        error_message: tracked.and_then(|t| t.error_message.clone()),
        discovered_at: job.discovered_at,
    }
}

/// One file in the detail view
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FileView {
    /// Path relative to the torrent root
    pub relative_path: String,
    /// Size in bytes
    pub size_bytes: i64,
    /// Remote progress (0.0 to 1.0)
    pub progress: f64,
    /// Whether the user excluded the file
    pub excluded: bool,
    /// Transfer status, when a sync file exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_status: Option<SyncFileStatus>,
    /// Transferred bytes
    pub synced_bytes: i64,
}

/// Sync job in the detail view
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncJobView {
    /// Sync job ID
    pub id: Id,
    /// Status
    pub status: SyncStatus,
    /// Local staging directory
    pub local_base: String,
    /// Error message of a failed job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Unix timestamp when the first transfer started
    pub started_at: Option<i64>,
    /// Unix timestamp of completion
    pub completed_at: Option<i64>,
}

/// Move job in the detail view
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MoveJobView {
    /// Move job ID
    pub id: Id,
    /// Status
    pub status: MoveStatus,
    /// Destination tree
    pub destination_path: String,
    /// Error message of a failed move
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// App notification in the detail view
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AppJobView {
    /// Notified app name
    pub app_name: String,
    /// Status
    pub status: AppJobStatus,
    /// Path sent to the app
    pub path: String,
    /// Error message of a failed notification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Full pipeline view of one download
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadDetail {
    /// Summary fields
    #[serde(flatten)]
    pub summary: DownloadSummary,
    /// Files with their transfer state
    pub files: Vec<FileView>,
    /// Sync job, if one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncJobView>,
    /// Move job, if one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub move_job: Option<MoveJobView>,
    /// App notifications
    pub app_jobs: Vec<AppJobView>,
}

/// GET /downloads - List all downloads
#[utoipa::path(
    get,
    path = "/api/v1/downloads",
    tag = "downloads",
    responses(
        (status = 200, description = "All live downloads", body = [DownloadSummary]),
        (status = 500, description = "Store failure")
    )
)]
pub async fn list_downloads(
    State(state): State<AppState>,
) -> Result<Json<Vec<DownloadSummary>>, ApiError> {
    let jobs = state.db.list_download_jobs().await?;
    let tracked: HashMap<Id, TrackedRow> = state
        .db
        .list_tracked()
        .await?
        .into_iter()
        .map(|t| (t.download_job_id, t))
        .collect();

    Ok(Json(
        jobs.iter()
            .map(|job| summary(job, tracked.get(&job.id)))
            .collect(),
    ))
}

/// GET /downloads/{id} - Full pipeline view of one download
#[utoipa::path(
    get,
    path = "/api/v1/downloads/{id}",
    tag = "downloads",
    params(("id" = String, Path, description = "Download job ID")),
    responses(
        (status = 200, description = "Download detail", body = DownloadDetail),
        (status = 400, description = "Malformed ID"),
        (status = 404, description = "Unknown download")
    )
)]
pub async fn get_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DownloadDetail>, ApiError> {
    let id: Id = id
        .parse()
        .map_err(|_| ApiError::bad_request("malformed download ID"))?;

    let Some(job) = state.db.get_download_job(id).await? else {
        return Err(ApiError::not_found("no such download"));
    };

    let tracked = state.db.get_tracked_for_download(id).await?;
    let files = state.db.list_download_files(id).await?;
    let sync_job = state.db.get_sync_job_for_download(id).await?;
    let sync_files: HashMap<Id, SyncFileRow> = match &sync_job {
        Some(sync_job) => state
            .db
            .list_sync_files(sync_job.id)
            .await?
            .into_iter()
            .map(|f| (f.download_file_id, f))
            .collect(),
        None => HashMap::new(),
    };
    let move_job = state.db.get_move_job_for_download(id).await?;
    let app_jobs = state.db.list_app_jobs(id).await?;

    Ok(Json(DownloadDetail {
        summary: summary(&job, tracked.as_ref()),
        files: files.iter().map(|f| file_view(f, &sync_files)).collect(),
        sync: sync_job.as_ref().map(sync_view),
        move_job: move_job.as_ref().map(move_view),
        app_jobs: app_jobs.iter().map(app_job_view).collect(),
    }))
}

fn file_view(file: &DownloadFileRow, sync_files: &HashMap<Id, SyncFileRow>) -> FileView {
    let sync = sync_files.get(&file.id);
    FileView {
        relative_path: file.relative_path.clone(),
        size_bytes: file.size_bytes,
        progress: file.progress,
        excluded: file.is_excluded(),
        sync_status: sync.map(|s| SyncFileStatus::from_i32(s.status)),
        synced_bytes: sync.map(|s| s.synced_bytes).unwrap_or(0),
    }
}

fn sync_view(sync_job: &SyncJobRow) -> SyncJobView {
    SyncJobView {
        id: sync_job.id,
        status: SyncStatus::from_i32(sync_job.status),
        local_base: sync_job.local_base.clone(),
        error_message: sync_job.error_message.clone(),
        started_at: sync_job.started_at,
        completed_at: sync_job.completed_at,
    }
}

fn move_view(move_job: &MoveJobRow) -> MoveJobView {
    MoveJobView {
        id: move_job.id,
        status: MoveStatus::from_i32(move_job.status),
        destination_path: move_job.destination_path.clone(),
        error_message: move_job.error_message.clone(),
    }
}

fn app_job_view(app_job: &AppJobRow) -> AppJobView {
    AppJobView {
        app_name: app_job.app_name.clone(),
        status: AppJobStatus::from_i32(app_job.status),
        path: app_job.path.clone(),
        error_message: app_job.error_message.clone(),
    }
}
