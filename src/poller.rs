//! Download controller: polls every client and diffs against the store.
//!
//! The only time-triggered component. Each cycle lists the torrents of
//! every enabled client, compares them with the persisted download jobs,
//! and emits the lifecycle events the rest of the pipeline reacts to.
//! Failures are contained per client and per row: a broken seedbox or a
//! bad row is logged and skipped, the loop never exits except on
//! shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{TorrentClient, TorrentFile, TorrentInfo};
use crate::db::{ClientRow, Database, DownloadFileRow, DownloadJobRow, DownloadJobUpdate, NewDownloadFile, NewDownloadJob};
use crate::error::Result;
use crate::events::{Event, EventBus, EventKind, SubjectType, publish_event};
use crate::types::TorrentState;

/// Periodic poller over all configured download clients
pub struct DownloadPoller {
    db: Arc<Database>,
    bus: EventBus,
    clients: HashMap<String, Arc<dyn TorrentClient>>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl DownloadPoller {
    /// Build a poller over the given adapters (keyed by client name)
    pub fn new(
        db: Arc<Database>,
        bus: EventBus,
        clients: HashMap<String, Arc<dyn TorrentClient>>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            db,
            bus,
            clients,
            poll_interval,
            cancel,
        }
    }

    /// Restore in-flight work, then poll on the configured interval
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.restore_on_start().await;

            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = interval.tick() => self.poll_cycle().await,
                }
            }
            tracing::debug!("download poller stopped");
        })
    }

    /// One pass over every enabled client
    pub async fn poll_cycle(&self) {
        let clients = match self.db.list_clients().await {
            Ok(clients) => clients,
            Err(e) => {
                tracing::warn!(error = %e, "poll cycle skipped, cannot list clients");
                return;
            }
        };

        for client in clients.iter().filter(|c| c.enabled) {
            let Some(adapter) = self.clients.get(&client.name) else {
                continue;
            };
            if self.cancel.is_cancelled() {
                return;
            }
            if let Err(e) = self.poll_client(client, adapter.as_ref()).await {
                tracing::warn!(client = %client.name, error = %e, "poll failed for client");
            }
        }
    }

    async fn poll_client(&self, client: &ClientRow, adapter: &dyn TorrentClient) -> Result<()> {
        let torrents = adapter.list_downloads(None).await?;

        let mut known: HashMap<String, DownloadJobRow> = self
            .db
            .list_download_jobs_for_client(client.id)
            .await?
            .into_iter()
            .map(|job| (job.remote_id.clone(), job))
            .collect();

        for torrent in torrents {
            let result = match known.remove(&torrent.remote_id) {
                Some(job) => self.handle_update(client, adapter, job, &torrent).await,
                None => self.handle_new(client, adapter, &torrent).await,
            };
            if let Err(e) = result {
                tracing::warn!(
                    client = %client.name,
                    remote_id = %torrent.remote_id,
                    error = %e,
                    "skipping torrent this cycle"
                );
            }
        }

        // Whatever the adapter no longer reports has been removed remotely
        for (_, job) in known {
            if let Err(e) = self.handle_removed(client, job).await {
                tracing::warn!(client = %client.name, error = %e, "failed to process removal");
            }
        }

        Ok(())
    }

    /// First sighting of a torrent: persist it and announce it
    async fn handle_new(
        &self,
        client: &ClientRow,
        adapter: &dyn TorrentClient,
        torrent: &TorrentInfo,
    ) -> Result<()> {
        let files = adapter.get_files(&torrent.remote_id).await?;

        let job = self
            .db
            .insert_download_job(&NewDownloadJob {
                client_id: client.id,
                remote_id: torrent.remote_id.clone(),
                name: torrent.name.clone(),
                category: torrent.category.clone(),
                status: torrent.state.to_i32(),
                size_bytes: torrent.size_bytes,
                downloaded_bytes: torrent.downloaded_bytes,
                progress: torrent.progress,
                save_path: torrent.save_path.clone(),
                content_path: torrent.content_path.clone(),
            })
            .await?;

        for file in &files {
            self.db
                .upsert_download_file(&NewDownloadFile {
                    download_job_id: job.id,
                    relative_path: file.relative_path.clone(),
                    size_bytes: file.size_bytes,
                    downloaded_bytes: file.downloaded_bytes(),
                    progress: file.progress,
                    priority: file.priority,
                })
                .await?;
        }

        tracing::info!(
            client = %client.name,
            name = %torrent.name,
            category = %torrent.category,
            files = files.len(),
            "discovered download"
        );

        self.emit(
            Event::new(EventKind::DownloadDiscovered, SubjectType::DownloadJob)
                .subject(job.id)
                .download(job.id)
                .message(format!("discovered {} on {}", torrent.name, client.name))
                .detail("save_path", torrent.save_path.clone())
                .detail("content_path", torrent.content_path.clone())
                .detail("client_name", client.name.clone())
                .detail("file_count", files.len() as i64),
        )
        .await;

        if torrent.state == TorrentState::Complete {
            self.emit(
                Event::new(EventKind::DownloadComplete, SubjectType::DownloadJob)
                    .subject(job.id)
                    .download(job.id)
                    .message(format!("{} is complete on {}", torrent.name, client.name)),
            )
            .await;
            self.emit_completed_files(&job, &files).await;
        }

        Ok(())
    }

    /// A known torrent came back from the adapter: diff and persist
    async fn handle_update(
        &self,
        client: &ClientRow,
        adapter: &dyn TorrentClient,
        job: DownloadJobRow,
        torrent: &TorrentInfo,
    ) -> Result<()> {
        let old_status = TorrentState::from_i32(job.status);
        let new_status = torrent.state;
        let category_changed = job.category != torrent.category;

        // A finished torrent that neither moved category nor changed
        // status needs no per-cycle work (steady state)
        if old_status == TorrentState::Complete
            && new_status == TorrentState::Complete
            && !category_changed
        {
            return Ok(());
        }

        let files = adapter.get_files(&torrent.remote_id).await?;

        let known_files: HashMap<String, DownloadFileRow> = self
            .db
            .list_download_files(job.id)
            .await?
            .into_iter()
            .map(|f| (f.relative_path.clone(), f))
            .collect();

        let mut newly_complete: Vec<&TorrentFile> = Vec::new();
        let mut previously_complete: Vec<&TorrentFile> = Vec::new();
        for file in &files {
            let was_complete = known_files
                .get(&file.relative_path)
                .map(|f| f.is_complete())
                .unwrap_or(false);
            if was_complete && file.priority != 0 {
                previously_complete.push(file);
            }

            self.db
                .upsert_download_file(&NewDownloadFile {
                    download_job_id: job.id,
                    relative_path: file.relative_path.clone(),
                    size_bytes: file.size_bytes,
                    downloaded_bytes: file.downloaded_bytes(),
                    progress: file.progress,
                    priority: file.priority,
                })
                .await?;

            if !was_complete && file.progress >= 1.0 && file.priority != 0 {
                newly_complete.push(file);
            }
        }

        for file in newly_complete {
            self.emit(
                Event::new(EventKind::FileCompleted, SubjectType::DownloadJob)
                    .subject(job.id)
                    .download(job.id)
                    .message(format!("{} finished downloading", file.relative_path))
                    .detail("relative_path", file.relative_path.clone()),
            )
            .await;
        }

        let changed = category_changed
            || old_status != new_status
            || job.progress != torrent.progress
            || job.downloaded_bytes != torrent.downloaded_bytes
            || job.size_bytes != torrent.size_bytes
            || job.content_path != torrent.content_path
            || job.name != torrent.name;

        let previous_category = if category_changed {
            Some(job.category.clone())
        } else {
            job.previous_category.clone()
        };

        let downloaded_at = match (job.downloaded_at, new_status) {
            (Some(at), _) => Some(at),
            (None, TorrentState::Complete) => Some(Database::now()),
            (None, _) => None,
        };

        if changed {
            self.db
                .update_download_job(&DownloadJobUpdate {
                    id: job.id,
                    name: torrent.name.clone(),
                    category: torrent.category.clone(),
                    previous_category: previous_category.clone(),
                    status: new_status.to_i32(),
                    size_bytes: torrent.size_bytes,
                    downloaded_bytes: torrent.downloaded_bytes,
                    progress: torrent.progress,
                    save_path: torrent.save_path.clone(),
                    content_path: torrent.content_path.clone(),
                    downloaded_at,
                })
                .await?;
        }

        self.emit_status_transition(&job, torrent, old_status, new_status)
            .await;

        if changed {
            self.emit(
                Event::new(EventKind::DownloadUpdated, SubjectType::DownloadJob)
                    .subject(job.id)
                    .download(job.id)
                    .message(format!("{} updated", torrent.name))
                    .detail("progress", torrent.progress)
                    .detail("downloaded_bytes", torrent.downloaded_bytes),
            )
            .await;
        }

        if category_changed {
            tracing::info!(
                name = %torrent.name,
                previous = %job.category,
                current = %torrent.category,
                "category changed"
            );
            self.emit(
                Event::new(EventKind::CategoryChanged, SubjectType::DownloadJob)
                    .subject(job.id)
                    .download(job.id)
                    .message(format!(
                        "{} moved from '{}' to '{}'",
                        torrent.name, job.category, torrent.category
                    ))
                    .detail("previous", job.category.clone())
                    .detail("current", torrent.category.clone())
                    .detail("client_name", client.name.clone()),
            )
            .await;

            // Re-announce files that were already complete so the pipeline
            // re-enters under the new category (the sync controller's
            // terminal-status gate makes duplicates harmless)
            for file in previously_complete {
                self.emit(
                    Event::new(EventKind::FileCompleted, SubjectType::DownloadJob)
                        .subject(job.id)
                        .download(job.id)
                        .message(format!("{} finished downloading", file.relative_path))
                        .detail("relative_path", file.relative_path.clone()),
                )
                .await;
            }
        }

        Ok(())
    }

    async fn emit_status_transition(
        &self,
        job: &DownloadJobRow,
        torrent: &TorrentInfo,
        old_status: TorrentState,
        new_status: TorrentState,
    ) {
        if old_status == new_status {
            return;
        }

        let event = match new_status {
            TorrentState::Paused => Event::new(EventKind::DownloadPaused, SubjectType::DownloadJob)
                .message(format!("{} paused", torrent.name)),
            TorrentState::Downloading if old_status == TorrentState::Paused => {
                Event::new(EventKind::DownloadResumed, SubjectType::DownloadJob)
                    .message(format!("{} resumed", torrent.name))
            }
            TorrentState::Complete => {
                Event::new(EventKind::DownloadComplete, SubjectType::DownloadJob)
                    .message(format!("{} is complete", torrent.name))
            }
            TorrentState::Error => Event::new(EventKind::DownloadError, SubjectType::DownloadJob)
                .message(format!("{} errored on the client", torrent.name)),
            TorrentState::Downloading => return,
        };

        self.emit(event.subject(job.id).download(job.id)).await;
    }

    /// The adapter no longer reports this torrent: delete and announce
    async fn handle_removed(&self, client: &ClientRow, job: DownloadJobRow) -> Result<()> {
        let was_complete = TorrentState::from_i32(job.status) == TorrentState::Complete;

        // The event must carry everything downstream cleanup needs,
        // because the cascade makes the rows unavailable afterwards
        let event = Event::new(EventKind::DownloadRemoved, SubjectType::DownloadJob)
            .subject(job.id)
            .download(job.id)
            .message(format!("{} removed from {}", job.name, client.name))
            .detail("name", job.name.clone())
            .detail("category", job.category.clone())
            .detail("client_name", client.name.clone())
            .detail("was_complete", was_complete);

        self.db.delete_download_job(job.id).await?;

        tracing::info!(client = %client.name, name = %job.name, "download removed remotely");
        self.emit(event).await;
        Ok(())
    }

    /// Re-publish discovery for downloads whose sync was interrupted
    ///
    /// The sync and move controllers keep no in-memory state; re-emitting
    /// `download.discovered` (and the completed-file events) lets them
    /// re-hydrate and resume pending transfers after a restart.
    async fn restore_on_start(&self) {
        let restorable = match self.db.list_restorable_sync_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = %e, "restore skipped, cannot list sync jobs");
                return;
            }
        };

        for sync_job in restorable {
            if self.cancel.is_cancelled() {
                return;
            }
            if let Err(e) = self.restore_one(sync_job.download_job_id).await {
                tracing::warn!(error = %e, "failed to restore sync job");
            }
        }
    }

    async fn restore_one(&self, download_job_id: crate::types::Id) -> Result<()> {
        let Some(job) = self.db.get_download_job(download_job_id).await? else {
            return Ok(());
        };
        let Some(client) = self.db.get_client(job.client_id).await? else {
            return Ok(());
        };
        let Some(adapter) = self.clients.get(&client.name) else {
            return Ok(());
        };

        let torrent = match adapter.get_download(&job.remote_id).await {
            Ok(torrent) => torrent,
            Err(e) if e.is_not_found() => {
                // Removal is handled by the first regular poll cycle
                tracing::debug!(name = %job.name, "restorable download vanished remotely");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let files = adapter.get_files(&job.remote_id).await?;

        for file in &files {
            self.db
                .upsert_download_file(&NewDownloadFile {
                    download_job_id: job.id,
                    relative_path: file.relative_path.clone(),
                    size_bytes: file.size_bytes,
                    downloaded_bytes: file.downloaded_bytes(),
                    progress: file.progress,
                    priority: file.priority,
                })
                .await?;
        }

        tracing::info!(name = %job.name, "restoring interrupted sync");

        self.emit(
            Event::new(EventKind::DownloadDiscovered, SubjectType::DownloadJob)
                .subject(job.id)
                .download(job.id)
                .message(format!("restored {} on {}", job.name, client.name))
                .detail("save_path", torrent.save_path.clone())
                .detail("content_path", torrent.content_path.clone())
                .detail("client_name", client.name.clone())
                .detail("file_count", files.len() as i64),
        )
        .await;

        if torrent.state == TorrentState::Complete {
            self.emit(
                Event::new(EventKind::DownloadComplete, SubjectType::DownloadJob)
                    .subject(job.id)
                    .download(job.id)
                    .message(format!("{} is complete on {}", job.name, client.name)),
            )
            .await;
        }
        self.emit_completed_files(&job, &files).await;

        Ok(())
    }

    /// Emit `file.completed` for every complete, included file
    async fn emit_completed_files(&self, job: &DownloadJobRow, files: &[TorrentFile]) {
        for file in files {
            if file.progress >= 1.0 && file.priority != 0 {
                self.emit(
                    Event::new(EventKind::FileCompleted, SubjectType::DownloadJob)
                        .subject(job.id)
                        .download(job.id)
                        .message(format!("{} finished downloading", file.relative_path))
                        .detail("relative_path", file.relative_path.clone()),
                )
                .await;
            }
        }
    }

    async fn emit(&self, event: Event) {
        publish_event(&self.db, &self.bus, event).await;
    }
}
