//! App-notify controller: asks matching apps to import a finished path.
//!
//! Reacts to `move.complete`. Every enabled app claiming the download's
//! category is notified in parallel, one task per app, unbounded — app
//! calls are cheap POSTs. Failures are recorded and published, never
//! retried automatically; a pipeline re-entry resets an errored slot.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::apps::MediaApp;
use crate::db::{AppRow, Database, EnsureAppJob};
use crate::error::Result;
use crate::events::{Event, EventBus, EventKind, SubjectType, publish_event};
use crate::types::{AppJobStatus, Id};

/// The app-notify controller (C9)
pub struct NotifyController {
    db: Arc<Database>,
    bus: EventBus,
    adapters: HashMap<String, Arc<dyn MediaApp>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl NotifyController {
    /// Build the controller over the given adapters (keyed by app name)
    pub fn new(
        db: Arc<Database>,
        bus: EventBus,
        adapters: HashMap<String, Arc<dyn MediaApp>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            db,
            bus,
            adapters,
            cancel,
            tasks: TaskTracker::new(),
        }
    }

    /// Subscribe and start the reactor
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        let mut subscription = self.bus.subscribe("notify-controller", &[EventKind::MoveComplete]);

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    event = subscription.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                if let Err(e) = self.handle_move_complete(&event).await {
                    tracing::warn!(error = %e, "notify handler failed");
                }
            }

            self.tasks.close();
            let wait = tokio::time::timeout(std::time::Duration::from_secs(10), self.tasks.wait());
            if wait.await.is_err() {
                tracing::warn!("notification tasks did not settle before shutdown timeout");
            }
            tracing::debug!("notify controller stopped");
        })
    }

    async fn handle_move_complete(&self, event: &Event) -> Result<()> {
        let Some(download_id) = event.download_id else {
            return Ok(());
        };
        let Some(final_path) = event.detail_str("final_path").map(PathBuf::from) else {
            return Ok(());
        };
        let Some(job) = self.db.get_download_job(download_id).await? else {
            return Ok(());
        };

        let apps = self.db.apps_for_category(&job.category).await?;
        if apps.is_empty() {
            // Not an error: the operator may run categories with no app
            tracing::warn!(
                name = %job.name,
                category = %job.category,
                "move complete but no enabled app claims the category"
            );
            return Ok(());
        }

        for app in apps {
            let Some(adapter) = self.adapters.get(&app.name).cloned() else {
                tracing::warn!(app = %app.name, "no adapter for configured app");
                continue;
            };
            self.tasks.spawn(notify_one(
                Arc::clone(&self.db),
                self.bus.clone(),
                adapter,
                app,
                download_id,
                final_path.clone(),
                job.name.clone(),
            ));
        }

        Ok(())
    }
}

/// Notify one app about one finished download
async fn notify_one(
    db: Arc<Database>,
    bus: EventBus,
    adapter: Arc<dyn MediaApp>,
    app: AppRow,
    download_id: Id,
    final_path: PathBuf,
    download_name: String,
) {
    let result = notify_one_inner(
        &db,
        &bus,
        adapter.as_ref(),
        &app,
        download_id,
        &final_path,
        &download_name,
    )
    .await;
    if let Err(e) = result {
        tracing::warn!(app = %app.name, error = %e, "notification bookkeeping failed");
    }
}

async fn notify_one_inner(
    db: &Arc<Database>,
    bus: &EventBus,
    adapter: &dyn MediaApp,
    app: &AppRow,
    download_id: Id,
    final_path: &std::path::Path,
    download_name: &str,
) -> Result<()> {
    let app_job = match db
        .ensure_app_job(download_id, &app.name, final_path.to_string_lossy().as_ref())
        .await?
    {
        EnsureAppJob::Ready(row) => row,
        // Completed slots are final, in-flight ones belong to their task
        EnsureAppJob::AlreadyComplete(_) | EnsureAppJob::InFlight(_) => return Ok(()),
    };

    // Only the winner of the claim sends the notification
    if !db.try_begin_app_job(app_job.id).await? {
        return Ok(());
    }
    publish_event(
        db,
        bus,
        Event::new(EventKind::AppNotifyStarted, SubjectType::AppJob)
            .subject(app_job.id)
            .download(download_id)
            .for_app(app.name.clone())
            .message(format!("asking {} to import {}", app.name, download_name))
            .detail("path", final_path.to_string_lossy().into_owned()),
    )
    .await;

    match adapter.trigger_import(final_path).await {
        Ok(()) => {
            db.set_app_job_status(app_job.id, AppJobStatus::Complete, None)
                .await?;
            tracing::info!(app = %app.name, name = %download_name, "import triggered");
            publish_event(
                db,
                bus,
                Event::new(EventKind::AppNotifyComplete, SubjectType::AppJob)
                    .subject(app_job.id)
                    .download(download_id)
                    .for_app(app.name.clone())
                    .message(format!("{} accepted the import", app.name)),
            )
            .await;
        }
        Err(e) => {
            let message = e.to_string();
            db.set_app_job_status(app_job.id, AppJobStatus::Error, Some(&message))
                .await?;
            tracing::warn!(app = %app.name, error = %message, "import trigger failed");
            publish_event(
                db,
                bus,
                Event::new(EventKind::AppNotifyFailed, SubjectType::AppJob)
                    .subject(app_job.id)
                    .download(download_id)
                    .for_app(app.name.clone())
                    .message(format!("{} rejected the import: {}", app.name, message))
                    .detail("error", message),
            )
            .await;
        }
    }

    Ok(())
}
