//! Tracked-download projector: derives the user-visible workflow state.
//!
//! Subscribes to every event and maintains one projection row per
//! tracked download. The projection exists iff at least one enabled app
//! claims the download's category; it is soft-deleted when the category
//! moves away and reactivated (same row, same ID) when it returns. All
//! writes go to the store; the projector holds no in-memory state.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::db::{Database, NewTracked, TrackedRow};
use crate::error::Result;
use crate::events::{Event, EventBus, EventKind};
use crate::types::{AppJobStatus, Id, SyncStatus, TorrentState, TrackedState};

/// The tracked-download projector (C10)
pub struct TrackedProjector {
    db: Arc<Database>,
    bus: EventBus,
    cancel: CancellationToken,
}

impl TrackedProjector {
    /// Build the projector
    pub fn new(db: Arc<Database>, bus: EventBus, cancel: CancellationToken) -> Self {
        Self { db, bus, cancel }
    }

    /// Subscribe to every event kind and start the reactor
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        // Subscribes to everything; a deeper queue rides out event bursts
        let mut subscription = self
            .bus
            .subscribe_with_capacity("tracked-projector", &[], 1024);

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    event = subscription.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                if let Err(e) = self.handle(&event).await {
                    tracing::warn!(kind = event.kind.as_str(), error = %e, "projection failed");
                }
            }
            tracing::debug!("tracked projector stopped");
        })
    }

    /// Apply one event to the projection
    pub async fn handle(&self, event: &Event) -> Result<()> {
        let Some(download_id) = event.download_id else {
            return Ok(());
        };

        match event.kind {
            EventKind::DownloadDiscovered => self.on_discovered(download_id).await,
            EventKind::DownloadUpdated => self.on_updated(download_id).await,
            EventKind::DownloadPaused => {
                self.set_state(download_id, TrackedState::Paused).await
            }
            EventKind::DownloadResumed => self.on_resumed(download_id).await,
            EventKind::DownloadComplete => self.on_download_complete(download_id).await,
            EventKind::DownloadError => self.set_state(download_id, TrackedState::Error).await,
            EventKind::DownloadRemoved => {
                // Removal is final: no reactivation, no history
                self.db.delete_tracked_for_download(download_id).await
            }
            EventKind::CategoryChanged => self.on_category_changed(download_id, event).await,
            EventKind::SyncStarted => self.on_sync_started(download_id).await,
            EventKind::SyncFileComplete => self.on_sync_progress(download_id).await,
            EventKind::SyncComplete => self.on_sync_complete(download_id).await,
            EventKind::SyncFailed => {
                self.set_failure(download_id, TrackedState::SyncError, event)
                    .await
            }
            EventKind::SyncCancelled => self.set_state(download_id, TrackedState::Cancelled).await,
            EventKind::MoveStarted => self.set_state(download_id, TrackedState::Moving).await,
            EventKind::MoveComplete => self.set_state(download_id, TrackedState::Moved).await,
            EventKind::MoveFailed => {
                self.set_failure(download_id, TrackedState::MoveError, event)
                    .await
            }
            EventKind::AppNotifyStarted => {
                self.set_state(download_id, TrackedState::Importing).await
            }
            EventKind::AppNotifyComplete => self.on_notify_complete(download_id).await,
            EventKind::AppNotifyFailed => {
                self.set_failure(download_id, TrackedState::ImportError, event)
                    .await
            }
            _ => Ok(()),
        }
    }

    async fn tracked(&self, download_id: Id) -> Result<Option<TrackedRow>> {
        self.db.get_tracked_for_download(download_id).await
    }

    async fn set_state(&self, download_id: Id, state: TrackedState) -> Result<()> {
        if let Some(tracked) = self.tracked(download_id).await? {
            self.db.set_tracked_state(tracked.id, state).await?;
        }
        Ok(())
    }

    async fn set_failure(
        &self,
        download_id: Id,
        state: TrackedState,
        event: &Event,
    ) -> Result<()> {
        if let Some(tracked) = self.tracked(download_id).await? {
            let message = event
                .detail_str("error")
                .unwrap_or(&event.message)
                .to_string();
            self.db
                .set_tracked_failure(tracked.id, state, &message)
                .await?;
        }
        Ok(())
    }

    /// Selected-file aggregates: excluded files never count
    async fn aggregates(&self, download_id: Id) -> Result<(i64, i64)> {
        let files = self.db.list_download_files(download_id).await?;
        let selected = files.iter().filter(|f| !f.is_excluded());
        let total_size = selected.clone().map(|f| f.size_bytes).sum();
        let total_files = selected.count() as i64;
        Ok((total_size, total_files))
    }

    /// Create the projection, or reactivate a soft-deleted one
    async fn create_or_reactivate(&self, download_id: Id) -> Result<()> {
        let Some(job) = self.db.get_download_job(download_id).await? else {
            return Ok(());
        };
        let apps = self.db.apps_for_category(&job.category).await?;
        let Some(first_app) = apps.first() else {
            return Ok(());
        };

        let (total_size, total_files) = self.aggregates(download_id).await?;

        if let Some(existing) = self
            .db
            .get_tracked_for_download_with_deleted(download_id)
            .await?
        {
            if existing.deleted_at.is_some() {
                self.db.restore_tracked(existing.id).await?;
            }
            self.db
                .update_tracked_category(existing.id, &job.category, Some(&first_app.name))
                .await?;
            self.db
                .update_tracked_aggregates(existing.id, &job.name, total_size, total_files)
                .await?;
            return Ok(());
        }

        let state = self.derived_state(&job).await?;
        self.db
            .insert_tracked(&NewTracked {
                download_job_id: job.id,
                name: job.name.clone(),
                category: job.category.clone(),
                app_name: Some(first_app.name.clone()),
                state: state.to_i32(),
                total_size_bytes: total_size,
                completed_size_bytes: 0,
                total_files,
                discovered_at: job.discovered_at,
            })
            .await?;
        Ok(())
    }

    /// State derived from the download and sync statuses together
    async fn derived_state(&self, job: &crate::db::DownloadJobRow) -> Result<TrackedState> {
        let state = match TorrentState::from_i32(job.status) {
            TorrentState::Paused => TrackedState::Paused,
            TorrentState::Error => TrackedState::Error,
            TorrentState::Downloading => TrackedState::Downloading,
            TorrentState::Complete => {
                match self.db.get_sync_job_for_download(job.id).await? {
                    Some(sync_job) => match SyncStatus::from_i32(sync_job.status) {
                        SyncStatus::Syncing => TrackedState::Syncing,
                        SyncStatus::Complete => TrackedState::Synced,
                        _ => TrackedState::Pending,
                    },
                    None => TrackedState::Pending,
                }
            }
        };
        Ok(state)
    }

    async fn on_discovered(&self, download_id: Id) -> Result<()> {
        self.create_or_reactivate(download_id).await
    }

    async fn on_updated(&self, download_id: Id) -> Result<()> {
        let Some(tracked) = self.tracked(download_id).await? else {
            return Ok(());
        };
        let Some(job) = self.db.get_download_job(download_id).await? else {
            return Ok(());
        };
        let (total_size, total_files) = self.aggregates(download_id).await?;
        self.db
            .update_tracked_aggregates(tracked.id, &job.name, total_size, total_files)
            .await?;
        Ok(())
    }

    async fn on_resumed(&self, download_id: Id) -> Result<()> {
        let syncing = matches!(
            self.db.get_sync_job_for_download(download_id).await?,
            Some(sync_job) if SyncStatus::from_i32(sync_job.status) == SyncStatus::Syncing
        );
        let state = if syncing {
            TrackedState::DownloadingSyncing
        } else {
            TrackedState::Downloading
        };
        self.set_state(download_id, state).await
    }

    async fn on_download_complete(&self, download_id: Id) -> Result<()> {
        let state = match self.db.get_sync_job_for_download(download_id).await? {
            Some(sync_job) => match SyncStatus::from_i32(sync_job.status) {
                SyncStatus::Syncing => TrackedState::Syncing,
                SyncStatus::Complete => TrackedState::Synced,
                _ => TrackedState::Pending,
            },
            None => TrackedState::Pending,
        };
        self.set_state(download_id, state).await
    }

    async fn on_sync_started(&self, download_id: Id) -> Result<()> {
        let still_downloading = matches!(
            self.db.get_download_job(download_id).await?,
            Some(job) if TorrentState::from_i32(job.status) == TorrentState::Downloading
        );
        let state = if still_downloading {
            TrackedState::DownloadingSyncing
        } else {
            TrackedState::Syncing
        };
        self.set_state(download_id, state).await
    }

    async fn on_sync_progress(&self, download_id: Id) -> Result<()> {
        let Some(tracked) = self.tracked(download_id).await? else {
            return Ok(());
        };
        if let Some(sync_job) = self.db.get_sync_job_for_download(download_id).await? {
            let completed = self.db.sum_synced_bytes(sync_job.id).await?;
            self.db
                .update_tracked_completed_size(tracked.id, completed)
                .await?;
        }
        Ok(())
    }

    async fn on_sync_complete(&self, download_id: Id) -> Result<()> {
        self.on_sync_progress(download_id).await?;
        self.set_state(download_id, TrackedState::Synced).await
    }

    /// Imported means every matching app acknowledged
    async fn on_notify_complete(&self, download_id: Id) -> Result<()> {
        let Some(tracked) = self.tracked(download_id).await? else {
            return Ok(());
        };

        let jobs = self.db.list_app_jobs(download_id).await?;
        let any_error = jobs
            .iter()
            .any(|j| AppJobStatus::from_i32(j.status) == AppJobStatus::Error);
        let all_complete = !jobs.is_empty()
            && jobs
                .iter()
                .all(|j| AppJobStatus::from_i32(j.status) == AppJobStatus::Complete);

        if all_complete {
            self.db.mark_tracked_imported(tracked.id).await?;
        } else if !any_error {
            self.db
                .set_tracked_state(tracked.id, TrackedState::Importing)
                .await?;
        }
        Ok(())
    }

    async fn on_category_changed(&self, download_id: Id, event: &Event) -> Result<()> {
        let current = event.detail_str("current").unwrap_or_default();
        let tracked_now = !self.db.apps_for_category(current).await?.is_empty();

        if tracked_now {
            // Covers both the cached-field update and reactivation after a
            // soft delete; creates the projection if none ever existed
            self.create_or_reactivate(download_id).await
        } else if let Some(tracked) = self.tracked(download_id).await? {
            self.db.soft_delete_tracked(tracked.id).await
        } else {
            Ok(())
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewApp, NewClient, NewDownloadFile, NewDownloadJob};
    use crate::events::SubjectType;

    struct Fixture {
        db: Arc<Database>,
        projector: TrackedProjector,
        download_id: Id,
        _db_file: tempfile::NamedTempFile,
    }

    async fn fixture_with_status(status: TorrentState) -> Fixture {
        let db_file = tempfile::NamedTempFile::new().unwrap();
        let db = Arc::new(Database::new(db_file.path()).await.unwrap());

        let client = db
            .upsert_client(&NewClient {
                name: "box1".to_string(),
                kind: "qbittorrent".to_string(),
                url: "http://box1:8080".to_string(),
                username: None,
                password: None,
                ssh_host: "box1".to_string(),
                ssh_port: 22,
                ssh_user: "sync".to_string(),
                ssh_key_file: None,
                enabled: true,
            })
            .await
            .unwrap();
        db.upsert_app(&NewApp {
            name: "sonarr-main".to_string(),
            kind: "sonarr".to_string(),
            url: "http://sonarr:8989".to_string(),
            api_key: "key".to_string(),
            category: "tv-sonarr".to_string(),
            downloads_path: None,
            cleanup_on_category_change: false,
            cleanup_on_remove: false,
            enabled: true,
        })
        .await
        .unwrap();

        let job = db
            .insert_download_job(&NewDownloadJob {
                client_id: client.id,
                remote_id: "aaa".to_string(),
                name: "Show S01".to_string(),
                category: "tv-sonarr".to_string(),
                status: status.to_i32(),
                size_bytes: 300,
                downloaded_bytes: 0,
                progress: 0.0,
                save_path: "/seedbox".to_string(),
                content_path: "/seedbox/Show S01".to_string(),
            })
            .await
            .unwrap();

        for (path, priority) in [("e01.mkv", 1), ("e02.mkv", 1), ("sample.mkv", 0)] {
            db.upsert_download_file(&NewDownloadFile {
                download_job_id: job.id,
                relative_path: path.to_string(),
                size_bytes: 100,
                downloaded_bytes: 0,
                progress: 0.0,
                priority,
            })
            .await
            .unwrap();
        }

        let projector = TrackedProjector::new(Arc::clone(&db), EventBus::new(), CancellationToken::new());
        Fixture {
            db,
            projector,
            download_id: job.id,
            _db_file: db_file,
        }
    }

    fn event(kind: EventKind, download_id: Id) -> Event {
        Event::new(kind, SubjectType::DownloadJob).download(download_id)
    }

    async fn state_of(f: &Fixture) -> TrackedState {
        let tracked = f
            .db
            .get_tracked_for_download(f.download_id)
            .await
            .unwrap()
            .unwrap();
        TrackedState::from_i32(tracked.state)
    }

    #[tokio::test]
    async fn discovery_creates_the_projection_without_excluded_files() {
        let f = fixture_with_status(TorrentState::Downloading).await;
        f.projector
            .handle(&event(EventKind::DownloadDiscovered, f.download_id))
            .await
            .unwrap();

        let tracked = f
            .db
            .get_tracked_for_download(f.download_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(TrackedState::from_i32(tracked.state), TrackedState::Downloading);
        assert_eq!(tracked.total_files, 2, "priority-0 files never count");
        assert_eq!(tracked.total_size_bytes, 200);
        assert_eq!(tracked.app_name.as_deref(), Some("sonarr-main"));
    }

    #[tokio::test]
    async fn discovery_of_untracked_category_creates_nothing() {
        let f = fixture_with_status(TorrentState::Downloading).await;
        f.db.retire_apps_except(&[]).await.unwrap();

        f.projector
            .handle(&event(EventKind::DownloadDiscovered, f.download_id))
            .await
            .unwrap();
        assert!(
            f.db.get_tracked_for_download(f.download_id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn complete_discovery_starts_in_pending() {
        let f = fixture_with_status(TorrentState::Complete).await;
        f.projector
            .handle(&event(EventKind::DownloadDiscovered, f.download_id))
            .await
            .unwrap();
        assert_eq!(state_of(&f).await, TrackedState::Pending);
    }

    #[tokio::test]
    async fn sync_started_during_download_is_the_hybrid_state() {
        let f = fixture_with_status(TorrentState::Downloading).await;
        f.projector
            .handle(&event(EventKind::DownloadDiscovered, f.download_id))
            .await
            .unwrap();

        f.db.ensure_sync_job(f.download_id, "/seedbox", "/staging/x")
            .await
            .unwrap();
        f.projector
            .handle(&event(EventKind::SyncStarted, f.download_id))
            .await
            .unwrap();
        assert_eq!(state_of(&f).await, TrackedState::DownloadingSyncing);
    }

    #[tokio::test]
    async fn paused_and_resumed_follow_the_sync_state() {
        let f = fixture_with_status(TorrentState::Downloading).await;
        f.projector
            .handle(&event(EventKind::DownloadDiscovered, f.download_id))
            .await
            .unwrap();

        f.projector
            .handle(&event(EventKind::DownloadPaused, f.download_id))
            .await
            .unwrap();
        assert_eq!(state_of(&f).await, TrackedState::Paused);

        // Resume with a syncing sync job lands in the hybrid state
        let (sync_job, _) =
            f.db.ensure_sync_job(f.download_id, "/seedbox", "/staging/x")
                .await
                .unwrap();
        f.db.try_start_sync_job(sync_job.id).await.unwrap();

        f.projector
            .handle(&event(EventKind::DownloadResumed, f.download_id))
            .await
            .unwrap();
        assert_eq!(state_of(&f).await, TrackedState::DownloadingSyncing);
    }

    #[tokio::test]
    async fn pipeline_tail_moves_through_moving_moved_importing_imported() {
        let f = fixture_with_status(TorrentState::Complete).await;
        f.projector
            .handle(&event(EventKind::DownloadDiscovered, f.download_id))
            .await
            .unwrap();

        for (kind, expected) in [
            (EventKind::MoveStarted, TrackedState::Moving),
            (EventKind::MoveComplete, TrackedState::Moved),
            (EventKind::AppNotifyStarted, TrackedState::Importing),
        ] {
            f.projector.handle(&event(kind, f.download_id)).await.unwrap();
            assert_eq!(state_of(&f).await, expected, "{kind:?}");
        }

        // The single matching app acknowledges → imported with a stamp
        let app_job = match f
            .db
            .ensure_app_job(f.download_id, "sonarr-main", "/library/x")
            .await
            .unwrap()
        {
            crate::db::EnsureAppJob::Ready(row) => row,
            other => panic!("unexpected {other:?}"),
        };
        f.db.set_app_job_status(app_job.id, AppJobStatus::Complete, None)
            .await
            .unwrap();

        f.projector
            .handle(&event(EventKind::AppNotifyComplete, f.download_id))
            .await
            .unwrap();

        let tracked = f
            .db
            .get_tracked_for_download(f.download_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(TrackedState::from_i32(tracked.state), TrackedState::Imported);
        assert!(tracked.completed_at.is_some(), "imported implies completed_at");
    }

    #[tokio::test]
    async fn failures_capture_the_error_message() {
        let f = fixture_with_status(TorrentState::Complete).await;
        f.projector
            .handle(&event(EventKind::DownloadDiscovered, f.download_id))
            .await
            .unwrap();

        f.projector
            .handle(
                &event(EventKind::SyncFailed, f.download_id).detail("error", "sftp reset"),
            )
            .await
            .unwrap();

        let tracked = f
            .db
            .get_tracked_for_download(f.download_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(TrackedState::from_i32(tracked.state), TrackedState::SyncError);
        assert_eq!(tracked.error_message.as_deref(), Some("sftp reset"));
    }

    #[tokio::test]
    async fn category_round_trip_soft_deletes_then_reactivates_the_same_row() {
        let f = fixture_with_status(TorrentState::Downloading).await;
        f.projector
            .handle(&event(EventKind::DownloadDiscovered, f.download_id))
            .await
            .unwrap();
        let original = f
            .db
            .get_tracked_for_download(f.download_id)
            .await
            .unwrap()
            .unwrap();

        // Away to an untracked category
        f.projector
            .handle(
                &event(EventKind::CategoryChanged, f.download_id)
                    .detail("previous", "tv-sonarr")
                    .detail("current", "archive"),
            )
            .await
            .unwrap();
        assert!(
            f.db.get_tracked_for_download(f.download_id)
                .await
                .unwrap()
                .is_none()
        );

        // And back
        f.projector
            .handle(
                &event(EventKind::CategoryChanged, f.download_id)
                    .detail("previous", "archive")
                    .detail("current", "tv-sonarr"),
            )
            .await
            .unwrap();

        let restored = f
            .db
            .get_tracked_for_download(f.download_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(restored.id, original.id, "reactivation must reuse the row");
    }

    #[tokio::test]
    async fn sync_file_complete_updates_completed_size() {
        let f = fixture_with_status(TorrentState::Complete).await;
        f.projector
            .handle(&event(EventKind::DownloadDiscovered, f.download_id))
            .await
            .unwrap();

        let (sync_job, _) =
            f.db.ensure_sync_job(f.download_id, "/seedbox", "/staging/x")
                .await
                .unwrap();
        let file = f
            .db
            .get_download_file(f.download_id, "e01.mkv")
            .await
            .unwrap()
            .unwrap();
        let row = match f
            .db
            .ensure_sync_file(sync_job.id, file.id, "e01.mkv", 100)
            .await
            .unwrap()
        {
            crate::db::EnsureSyncFile::Created(row) => row,
            other => panic!("unexpected {other:?}"),
        };
        f.db.complete_sync_file(row.id).await.unwrap();

        f.projector
            .handle(&event(EventKind::SyncFileComplete, f.download_id))
            .await
            .unwrap();

        let tracked = f
            .db
            .get_tracked_for_download(f.download_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tracked.completed_size_bytes, 100);
    }

    #[tokio::test]
    async fn removal_hard_deletes_the_projection() {
        let f = fixture_with_status(TorrentState::Downloading).await;
        f.projector
            .handle(&event(EventKind::DownloadDiscovered, f.download_id))
            .await
            .unwrap();

        f.projector
            .handle(&event(EventKind::DownloadRemoved, f.download_id))
            .await
            .unwrap();
        assert!(
            f.db.get_tracked_for_download_with_deleted(f.download_id)
                .await
                .unwrap()
                .is_none(),
            "hard delete leaves nothing to reactivate"
        );
    }
}
