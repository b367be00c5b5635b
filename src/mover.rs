//! Move controller: promotes completed staging trees to the destination.
//!
//! Reacts to `sync.complete`. The destination root is the responsible
//! app's `downloadsPath` override when set, otherwise
//! `<downloadsPath>/<clientName>/<category>`; the download's display name
//! becomes the final segment. Promotion is an atomic rename on the same
//! filesystem, with a guarded copy-then-delete fallback.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::db::Database;
use crate::error::Result;
use crate::events::{Event, EventBus, EventKind, SubjectType, publish_event};
use crate::fsops;
use crate::types::MoveStatus;

/// The move controller (C8)
pub struct MoveController {
    db: Arc<Database>,
    bus: EventBus,
    downloads_path: PathBuf,
    cancel: CancellationToken,
}

impl MoveController {
    /// Build the controller
    pub fn new(
        db: Arc<Database>,
        bus: EventBus,
        downloads_path: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            db,
            bus,
            downloads_path,
            cancel,
        }
    }

    /// Subscribe and start the reactor
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        let mut subscription = self.bus.subscribe("move-controller", &[EventKind::SyncComplete]);

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    event = subscription.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                if let Err(e) = self.handle_sync_complete(&event).await {
                    tracing::warn!(error = %e, "move handler failed");
                }
            }
            tracing::debug!("move controller stopped");
        })
    }

    async fn handle_sync_complete(&self, event: &Event) -> Result<()> {
        let Some(download_id) = event.download_id else {
            return Ok(());
        };
        let Some(job) = self.db.get_download_job(download_id).await? else {
            return Ok(());
        };
        let Some(sync_job) = self.db.get_sync_job_for_download(download_id).await? else {
            return Ok(());
        };
        let Some(client) = self.db.get_client(job.client_id).await? else {
            return Ok(());
        };

        // Destination override from the responsible app, when configured
        let apps = self.db.apps_for_category(&job.category).await?;
        let override_root = apps
            .iter()
            .find_map(|app| app.downloads_path.as_deref().filter(|p| !p.is_empty()))
            .map(PathBuf::from);

        let destination = fsops::destination_dir(
            &self.downloads_path,
            override_root.as_deref(),
            &client.name,
            &job.category,
            &job.name,
        );
        let source = PathBuf::from(&sync_job.local_base);

        // Re-emissions (restore, duplicate events) find the existing job
        let move_job = match self.db.get_move_job_for_download(download_id).await? {
            Some(existing) => match MoveStatus::from_i32(existing.status) {
                MoveStatus::Complete | MoveStatus::Moving => return Ok(()),
                MoveStatus::Error => {
                    // Staging was retained on failure; a re-entry retries
                    if !self.db.try_reset_move_job(existing.id).await? {
                        return Ok(());
                    }
                    existing
                }
                MoveStatus::Pending => existing,
            },
            None => {
                self.db
                    .create_move_job(
                        download_id,
                        &sync_job.local_base,
                        destination.to_string_lossy().as_ref(),
                    )
                    .await?
            }
        };

        self.db
            .set_move_job_status(move_job.id, MoveStatus::Moving, None)
            .await?;
        self.emit(
            Event::new(EventKind::MoveStarted, SubjectType::MoveJob)
                .subject(move_job.id)
                .download(download_id)
                .message(format!("moving {} into place", job.name))
                .detail("source", sync_job.local_base.clone())
                .detail("destination", destination.to_string_lossy().into_owned()),
        )
        .await;

        match fsops::move_tree(&source, &destination).await {
            Ok(()) => {
                self.db
                    .set_move_job_status(move_job.id, MoveStatus::Complete, None)
                    .await?;

                // The staging directory went with the rename; tidy the
                // per-client parent if it is empty now
                fsops::remove_tree(&source).await.ok();
                if let Some(parent) = source.parent() {
                    fsops::remove_if_empty(parent).await;
                }

                tracing::info!(
                    name = %job.name,
                    destination = %destination.display(),
                    "download moved into place"
                );
                self.emit(
                    Event::new(EventKind::MoveComplete, SubjectType::MoveJob)
                        .subject(move_job.id)
                        .download(download_id)
                        .message(format!("{} moved into place", job.name))
                        .detail("final_path", destination.to_string_lossy().into_owned()),
                )
                .await;
            }
            Err(e) => {
                let message = e.to_string();
                self.db
                    .set_move_job_status(move_job.id, MoveStatus::Error, Some(&message))
                    .await?;
                tracing::warn!(name = %job.name, error = %message, "move failed, staging retained");
                self.emit(
                    Event::new(EventKind::MoveFailed, SubjectType::MoveJob)
                        .subject(move_job.id)
                        .download(download_id)
                        .message(format!("move of {} failed: {}", job.name, message))
                        .detail("error", message),
                )
                .await;
            }
        }

        Ok(())
    }

    async fn emit(&self, event: Event) {
        publish_event(&self.db, &self.bus, event).await;
    }
}
