//! File-sync controller: mirrors completed remote files into staging.
//!
//! Reacts to `file.completed`, `download.removed`, and `category.changed`.
//! Keeps no durable state in memory — only a bounded worker pool and one
//! cancellation handle per active download; everything else is re-read
//! from the store by each handler, so duplicate or interleaved events are
//! harmless.
//!
//! At-most-once transfer per file is enforced twice over: the sync-file
//! ensure ignores rows that already reached a terminal status, and the
//! `pending → syncing` transition is a conditional update only one task
//! can win.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::db::{Database, EnsureSyncFile, SyncJobRow};
use crate::error::Result;
use crate::events::{Event, EventBus, EventKind, SubjectType, publish_event};
use crate::transfer::TransferBackend;
use crate::types::{Id, SyncStatus};
use crate::{fsops, speed_limiter::SpeedLimiter};

mod task;
pub mod speed;

pub use speed::{SpeedSample, SpeedSampler};

/// Shared state between the reactor and its transfer tasks
pub(crate) struct SyncShared {
    pub(crate) db: Arc<Database>,
    pub(crate) bus: EventBus,
    pub(crate) syncing_path: PathBuf,
    pub(crate) downloads_path: PathBuf,
    pub(crate) backends: HashMap<String, Arc<dyn TransferBackend>>,
    pub(crate) sampler: SpeedSampler,
    pub(crate) limiter: SpeedLimiter,
    pub(crate) slots: Arc<Semaphore>,
    pub(crate) active: Mutex<HashMap<Id, CancellationToken>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) tasks: TaskTracker,
}

impl SyncShared {
    /// The cancellation handle of one download's transfers
    pub(crate) async fn job_token(&self, download_id: Id) -> CancellationToken {
        let mut active = self.active.lock().await;
        active
            .entry(download_id)
            .or_insert_with(|| self.cancel.child_token())
            .clone()
    }

    pub(crate) async fn drop_job_token(&self, download_id: Id) {
        self.active.lock().await.remove(&download_id);
    }

    pub(crate) async fn emit(&self, event: Event) {
        publish_event(&self.db, &self.bus, event).await;
    }
}

/// Settings the sync controller needs from the configuration
pub struct SyncControllerConfig {
    /// Staging root
    pub syncing_path: PathBuf,
    /// Destination root (for remote-removal cleanup)
    pub downloads_path: PathBuf,
    /// Transfer slots across all sync jobs
    pub max_concurrent: usize,
}

/// The file-sync controller (C7)
pub struct SyncController {
    shared: Arc<SyncShared>,
}

impl SyncController {
    /// Build the controller
    pub fn new(
        db: Arc<Database>,
        bus: EventBus,
        config: SyncControllerConfig,
        backends: HashMap<String, Arc<dyn TransferBackend>>,
        limiter: SpeedLimiter,
        sampler: SpeedSampler,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(SyncShared {
                db,
                bus,
                syncing_path: config.syncing_path,
                downloads_path: config.downloads_path,
                backends,
                sampler,
                limiter,
                slots: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
                active: Mutex::new(HashMap::new()),
                cancel,
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// The throughput sampler (shared with the HTTP API)
    pub fn sampler(&self) -> SpeedSampler {
        self.shared.sampler.clone()
    }

    /// Subscribe and start the reactor
    pub fn spawn(&self) -> tokio::task::JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let mut subscription = shared.bus.subscribe(
            "sync-controller",
            &[
                EventKind::FileCompleted,
                EventKind::DownloadRemoved,
                EventKind::CategoryChanged,
            ],
        );

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shared.cancel.cancelled() => break,
                    event = subscription.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                let result = match event.kind {
                    EventKind::FileCompleted => handle_file_completed(&shared, &event).await,
                    EventKind::DownloadRemoved => handle_download_removed(&shared, &event).await,
                    EventKind::CategoryChanged => handle_category_changed(&shared, &event).await,
                    _ => Ok(()),
                };
                if let Err(e) = result {
                    tracing::warn!(kind = event.kind.as_str(), error = %e, "sync handler failed");
                }
            }

            // Scoped release: signal workers and wait for them briefly
            shared.tasks.close();
            let wait = tokio::time::timeout(std::time::Duration::from_secs(10), shared.tasks.wait());
            if wait.await.is_err() {
                tracing::warn!("transfer tasks did not settle before shutdown timeout");
            }
            tracing::debug!("sync controller stopped");
        })
    }
}

/// Resolve the transfer bases of one file
///
/// Clients report file paths relative to the torrent's save path, with
/// multi-file torrents nesting everything under the content root folder.
/// Sync jobs anchor at the content directory instead, so staging (and
/// later the destination) does not repeat the download name: the root
/// segment is stripped when the content path covers it. Single-file
/// torrents (content path = the file itself) keep the save path anchor.
fn content_bases(save_path: &str, content_path: &str, relative_path: &str) -> (String, String) {
    let save = save_path.trim_end_matches('/');
    let content = content_path.trim_end_matches('/');

    if content != save {
        if let Some(root) = content.strip_prefix(save).map(|r| r.trim_start_matches('/')) {
            if !root.is_empty() {
                if let Some(stripped) = relative_path.strip_prefix(&format!("{}/", root)) {
                    return (content.to_string(), stripped.to_string());
                }
            }
        }
    }

    (save.to_string(), relative_path.to_string())
}

/// Reactivate or create the sync job for a download
///
/// A cancelled job means the download was cleaned up and is re-syncable:
/// the old job is archived (soft-deleted) and a fresh one created.
async fn ensure_active_sync_job(
    shared: &SyncShared,
    download_id: Id,
    remote_base: &str,
    local_base: &str,
) -> Result<(SyncJobRow, bool)> {
    let (job, created) = shared
        .db
        .ensure_sync_job(download_id, remote_base, local_base)
        .await?;
    if created {
        return Ok((job, true));
    }

    if SyncStatus::from_i32(job.status) == SyncStatus::Cancelled {
        shared.db.soft_delete_sync_job(job.id).await?;
        let (fresh, _) = shared
            .db
            .ensure_sync_job(download_id, remote_base, local_base)
            .await?;
        return Ok((fresh, true));
    }

    Ok((job, false))
}

async fn handle_file_completed(shared: &Arc<SyncShared>, event: &Event) -> Result<()> {
    let Some(download_id) = event.download_id else {
        return Ok(());
    };
    let Some(relative_path) = event.detail_str("relative_path").map(str::to_string) else {
        return Ok(());
    };

    let Some(job) = shared.db.get_download_job(download_id).await? else {
        return Ok(());
    };

    // Only categories claimed by an enabled app enter the pipeline
    if shared.db.apps_for_category(&job.category).await?.is_empty() {
        return Ok(());
    }

    let Some(client) = shared.db.get_client(job.client_id).await? else {
        return Ok(());
    };
    let Some(file) = shared.db.get_download_file(job.id, &relative_path).await? else {
        tracing::warn!(path = %relative_path, "file.completed for unknown download file");
        return Ok(());
    };
    if file.is_excluded() {
        return Ok(());
    }

    let (remote_base, content_relative) =
        content_bases(&job.save_path, &job.content_path, &relative_path);

    let local_base = fsops::staging_dir(&shared.syncing_path, &client.name, job.id);
    let local_base_str = local_base.to_string_lossy().into_owned();

    let (sync_job, created) =
        ensure_active_sync_job(shared, job.id, &remote_base, &local_base_str).await?;
    if created {
        shared
            .emit(
                Event::new(EventKind::SyncJobCreated, SubjectType::SyncJob)
                    .subject(sync_job.id)
                    .download(job.id)
                    .message(format!("sync started for {}", job.name))
                    .detail("local_base", local_base_str.clone()),
            )
            .await;
    }

    let sync_file = match shared
        .db
        .ensure_sync_file(sync_job.id, file.id, &content_relative, file.size_bytes)
        .await?
    {
        EnsureSyncFile::Created(row) => {
            shared
                .emit(
                    Event::new(EventKind::SyncFileCreated, SubjectType::SyncJob)
                        .subject(sync_job.id)
                        .download(job.id)
                        .message(format!("queued {}", content_relative))
                        .detail("relative_path", content_relative.clone()),
                )
                .await;
            row
        }
        EnsureSyncFile::Existing(row) => {
            use crate::types::SyncFileStatus;
            match SyncFileStatus::from_i32(row.status) {
                // The at-most-once gate: terminal rows ignore duplicates
                SyncFileStatus::Complete
                | SyncFileStatus::Cancelled
                | SyncFileStatus::Error => return Ok(()),
                // In flight already
                SyncFileStatus::Syncing => return Ok(()),
                // Queued (possibly from a previous process run): submit a
                // task; the pending→syncing gate deduplicates
                SyncFileStatus::Pending => row,
            }
        }
    };

    let work = task::TransferWork {
        download_job_id: job.id,
        sync_job_id: sync_job.id,
        sync_file_id: sync_file.id,
        client_name: client.name.clone(),
    };
    let shared_clone = Arc::clone(shared);
    shared
        .tasks
        .spawn(async move { task::run_transfer(shared_clone, work).await });

    Ok(())
}

async fn handle_download_removed(shared: &Arc<SyncShared>, event: &Event) -> Result<()> {
    let Some(download_id) = event.download_id else {
        return Ok(());
    };
    let client_name = event.detail_str("client_name").unwrap_or_default().to_string();
    let category = event.detail_str("category").unwrap_or_default().to_string();
    let name = event.detail_str("name").unwrap_or_default().to_string();
    let was_complete = event.detail_bool("was_complete").unwrap_or(false);

    // Stop in-flight transfers. The store rows are already gone (the
    // removal cascades), so the event carries the cleanup context.
    let token = {
        let mut active = shared.active.lock().await;
        active.remove(&download_id)
    };
    if let Some(token) = token {
        token.cancel();
        shared
            .emit(
                Event::new(EventKind::SyncCancelled, SubjectType::SyncJob)
                    .download(download_id)
                    .message(format!("sync cancelled, {} was removed remotely", name)),
            )
            .await;
    }

    let staging = fsops::staging_dir(&shared.syncing_path, &client_name, download_id);
    let mut removed_paths = Vec::new();
    if fsops::remove_tree(&staging).await.unwrap_or(false) {
        removed_paths.push(staging.to_string_lossy().into_owned());
    }
    fsops::remove_if_empty(staging.parent().unwrap_or(&shared.syncing_path)).await;

    // Destination cleanup is opt-in per app
    if was_complete {
        for app in shared.db.apps_for_category(&category).await? {
            if !app.cleanup_on_remove {
                continue;
            }
            let destination = fsops::destination_dir(
                &shared.downloads_path,
                app.downloads_path.as_deref().map(std::path::Path::new),
                &client_name,
                &category,
                &name,
            );
            if fsops::remove_tree(&destination).await.unwrap_or(false) {
                removed_paths.push(destination.to_string_lossy().into_owned());
            }
        }
    }

    if !removed_paths.is_empty() {
        shared
            .emit(
                Event::new(EventKind::Cleanup, SubjectType::DownloadJob)
                    .download(download_id)
                    .message(format!("removed local artifacts of {}", name))
                    .detail("paths", serde_json::Value::from(removed_paths)),
            )
            .await;
    }

    Ok(())
}

async fn handle_category_changed(shared: &Arc<SyncShared>, event: &Event) -> Result<()> {
    let Some(download_id) = event.download_id else {
        return Ok(());
    };
    let previous = event.detail_str("previous").unwrap_or_default().to_string();
    let current = event.detail_str("current").unwrap_or_default().to_string();

    let Some(job) = shared.db.get_download_job(download_id).await? else {
        return Ok(());
    };
    let Some(sync_job) = shared.db.get_sync_job_for_download(download_id).await? else {
        return Ok(());
    };
    let Some(client) = shared.db.get_client(job.client_id).await? else {
        return Ok(());
    };

    let tracked_now = !shared.db.apps_for_category(&current).await?.is_empty();

    if tracked_now {
        // The sync continues under the new category. Migrate the staging
        // tree when the layout moved; in-flight transfers keep their open
        // file handles, so a rename does not disturb them.
        if shared.db.has_move_started(download_id).await? {
            return Ok(());
        }

        let new_base = fsops::staging_dir(&shared.syncing_path, &client.name, job.id);
        let new_base_str = new_base.to_string_lossy().into_owned();
        if new_base_str != sync_job.local_base {
            let old_base = PathBuf::from(&sync_job.local_base);
            if tokio::fs::metadata(&old_base).await.is_ok() {
                if let Some(parent) = new_base.parent() {
                    tokio::fs::create_dir_all(parent).await.ok();
                }
                if let Err(e) = tokio::fs::rename(&old_base, &new_base).await {
                    tracing::warn!(error = %e, "failed to migrate staging directory");
                    return Ok(());
                }
            }
            shared
                .db
                .update_sync_job_local_base(sync_job.id, &new_base_str)
                .await?;
        }
        return Ok(());
    }

    // Untracked: cancel as in the removal case
    let token = {
        let mut active = shared.active.lock().await;
        active.remove(&download_id)
    };
    if let Some(token) = token {
        token.cancel();
    }

    let cancelled = shared.db.try_cancel_sync_job(sync_job.id).await?;
    shared.db.cancel_open_sync_files(sync_job.id).await?;
    if cancelled {
        shared
            .emit(
                Event::new(EventKind::SyncCancelled, SubjectType::SyncJob)
                    .subject(sync_job.id)
                    .download(download_id)
                    .message(format!(
                        "sync cancelled, {} moved to untracked category '{}'",
                        job.name, current
                    )),
            )
            .await;
    }

    let mut removed_paths = Vec::new();
    let staging = PathBuf::from(&sync_job.local_base);
    if fsops::remove_tree(&staging).await.unwrap_or(false) {
        removed_paths.push(staging.to_string_lossy().into_owned());
    }

    // The app that used to own the category decides destination cleanup
    for app in shared.db.apps_for_category(&previous).await? {
        if !app.cleanup_on_category_change {
            continue;
        }
        let destination = fsops::destination_dir(
            &shared.downloads_path,
            app.downloads_path.as_deref().map(std::path::Path::new),
            &client.name,
            &previous,
            &job.name,
        );
        if fsops::remove_tree(&destination).await.unwrap_or(false) {
            removed_paths.push(destination.to_string_lossy().into_owned());
        }
    }

    if !removed_paths.is_empty() {
        shared
            .emit(
                Event::new(EventKind::Cleanup, SubjectType::DownloadJob)
                    .download(download_id)
                    .message(format!("removed local artifacts of {}", job.name))
                    .detail("paths", serde_json::Value::from(removed_paths)),
            )
            .await;
    }

    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::content_bases;

    #[test]
    fn multi_file_torrents_anchor_at_the_content_directory() {
        let (base, rel) = content_bases("/dl", "/dl/Show S01", "Show S01/e01.mkv");
        assert_eq!(base, "/dl/Show S01");
        assert_eq!(rel, "e01.mkv");

        let (base, rel) = content_bases("/dl/", "/dl/Show S01/", "Show S01/Sub/e02.mkv");
        assert_eq!(base, "/dl/Show S01");
        assert_eq!(rel, "Sub/e02.mkv");
    }

    #[test]
    fn single_file_torrents_keep_the_save_path_anchor() {
        // content path is the file itself; nothing to strip
        let (base, rel) = content_bases("/dl", "/dl/movie.mkv", "movie.mkv");
        assert_eq!(base, "/dl");
        assert_eq!(rel, "movie.mkv");
    }

    #[test]
    fn unrelated_content_path_falls_back_to_the_save_path() {
        let (base, rel) = content_bases("/dl", "/elsewhere/Show", "Show/e01.mkv");
        assert_eq!(base, "/dl");
        assert_eq!(rel, "Show/e01.mkv");
    }
}
