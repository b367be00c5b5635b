//! Per-file transfer task.
//!
//! Each task holds one worker-pool slot for its whole lifetime. The
//! state machine per file: win the `pending → syncing` race, run the
//! backend transfer with progress persistence, then settle the file and
//! possibly the whole job.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::TransferError;
use crate::events::{Event, EventKind, SubjectType};
use crate::transfer::TransferRequest;
use crate::types::Id;

use super::SyncShared;

/// Persist progress once per this many chunk callbacks
const PERSIST_EVERY_TICKS: u64 = 32;

/// Identity of one queued transfer
pub(super) struct TransferWork {
    pub(super) download_job_id: Id,
    pub(super) sync_job_id: Id,
    pub(super) sync_file_id: Id,
    pub(super) client_name: String,
}

pub(super) async fn run_transfer(shared: Arc<SyncShared>, work: TransferWork) {
    // One slot per transfer; waiting in line keeps the file `pending`
    let permit = tokio::select! {
        _ = shared.cancel.cancelled() => return,
        permit = Arc::clone(&shared.slots).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };
    let _permit = permit;

    if let Err(e) = run_transfer_inner(&shared, &work).await {
        tracing::warn!(error = %e, "transfer task failed before starting");
    }
}

async fn run_transfer_inner(
    shared: &Arc<SyncShared>,
    work: &TransferWork,
) -> crate::error::Result<()> {
    // Only the winner of the pending→syncing race runs the transfer;
    // duplicates queued behind the same row exit here
    if !shared.db.try_start_sync_file(work.sync_file_id).await? {
        return Ok(());
    }

    let Some(sync_file) = shared.db.get_sync_file(work.sync_file_id).await? else {
        return Ok(());
    };
    let Some(sync_job) = shared.db.get_sync_job(work.sync_job_id).await? else {
        return Ok(());
    };

    let job_token = shared.job_token(work.download_job_id).await;
    if job_token.is_cancelled() {
        shared.db.cancel_sync_file(sync_file.id).await?;
        return Ok(());
    }

    // First transfer of the job flips it to syncing and announces
    if shared.db.try_start_sync_job(sync_job.id).await? {
        shared
            .emit(
                Event::new(EventKind::SyncStarted, SubjectType::SyncJob)
                    .subject(sync_job.id)
                    .download(work.download_job_id)
                    .message("file transfers started".to_string())
                    .detail("local_base", sync_job.local_base.clone()),
            )
            .await;
    } else {
        // A late file after an earlier failure quietly re-opens the job
        shared.db.try_resume_sync_job(sync_job.id).await?;
    }

    shared
        .emit(
            Event::new(EventKind::SyncFileStarted, SubjectType::SyncJob)
                .subject(sync_job.id)
                .download(work.download_job_id)
                .message(format!("transferring {}", sync_file.relative_path))
                .detail("relative_path", sync_file.relative_path.clone()),
        )
        .await;

    let local_path = PathBuf::from(&sync_job.local_base).join(&sync_file.relative_path);
    if let Some(parent) = local_path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            let message = format!("cannot create staging directory: {}", e);
            settle_failure(shared, work, &sync_file.relative_path, &message).await?;
            return Ok(());
        }
    }

    let remote_path = join_remote(&sync_job.remote_base, &sync_file.relative_path);

    let Some(backend) = shared.backends.get(&work.client_name) else {
        let message = format!("no transfer backend for client {}", work.client_name);
        settle_failure(shared, work, &sync_file.relative_path, &message).await?;
        return Ok(());
    };

    // Progress plumbing: workers tick an atomic; a persister coalesces
    // ticks into store writes so progress survives a restart without
    // write-amplifying every chunk
    let transferred = Arc::new(AtomicU64::new(0));
    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<u64>();

    let persister = {
        let db = Arc::clone(&shared.db);
        let sync_file_id = sync_file.id;
        tokio::spawn(async move {
            while let Some(mut latest) = progress_rx.recv().await {
                // Coalesce a burst of ticks into one write
                while let Ok(newer) = progress_rx.try_recv() {
                    latest = newer;
                }
                if let Err(e) = db.update_sync_file_progress(sync_file_id, latest as i64).await {
                    tracing::debug!(error = %e, "progress write failed");
                }
            }
        })
    };

    let progress = {
        let transferred = Arc::clone(&transferred);
        let sampler = shared.sampler.clone();
        let ticks = AtomicU64::new(0);
        let progress_tx = progress_tx.clone();
        Arc::new(move |delta: u64| {
            let total = transferred.fetch_add(delta, Ordering::Relaxed) + delta;
            sampler.record(delta);
            if ticks.fetch_add(1, Ordering::Relaxed) % PERSIST_EVERY_TICKS == 0 {
                progress_tx.send(total).ok();
            }
        })
    };

    let result = backend
        .transfer(TransferRequest {
            remote_path,
            local_path: local_path.clone(),
            size_bytes: sync_file.size_bytes.max(0) as u64,
            cancel: job_token.child_token(),
            progress,
        })
        .await;

    drop(progress_tx);
    persister.await.ok();

    match result {
        Ok(()) => {
            shared.db.complete_sync_file(sync_file.id).await?;
            shared
                .emit(
                    Event::new(EventKind::SyncFileComplete, SubjectType::SyncJob)
                        .subject(sync_job.id)
                        .download(work.download_job_id)
                        .message(format!("transferred {}", sync_file.relative_path))
                        .detail("relative_path", sync_file.relative_path.clone())
                        .detail("file_path", local_path.to_string_lossy().into_owned()),
                )
                .await;

            // Whoever settles the last open file completes the job
            if shared.db.try_complete_sync_job(sync_job.id).await? {
                shared.drop_job_token(work.download_job_id).await;
                shared
                    .emit(
                        Event::new(EventKind::SyncComplete, SubjectType::SyncJob)
                            .subject(sync_job.id)
                            .download(work.download_job_id)
                            .message("all files transferred".to_string())
                            .detail("local_base", sync_job.local_base.clone()),
                    )
                    .await;
            }
        }
        Err(TransferError::Cancelled) => {
            // Cancellation settles the file only; job-level bookkeeping
            // belongs to whoever cancelled us
            shared.db.cancel_sync_file(sync_file.id).await?;
        }
        Err(e) => {
            let message = e.to_string();
            settle_failure(shared, work, &sync_file.relative_path, &message).await?;
        }
    }

    Ok(())
}

async fn settle_failure(
    shared: &Arc<SyncShared>,
    work: &TransferWork,
    relative_path: &str,
    message: &str,
) -> crate::error::Result<()> {
    shared.db.fail_sync_file(work.sync_file_id, message).await?;
    shared
        .emit(
            Event::new(EventKind::SyncFailed, SubjectType::SyncJob)
                .subject(work.sync_job_id)
                .download(work.download_job_id)
                .message(format!("transfer of {} failed: {}", relative_path, message))
                .detail("relative_path", relative_path.to_string())
                .detail("error", message.to_string()),
        )
        .await;

    // The job fails as a whole only once nothing is still in flight
    if shared
        .db
        .try_fail_sync_job(work.sync_job_id, message)
        .await?
    {
        shared.drop_job_token(work.download_job_id).await;
    }

    Ok(())
}

/// Join a remote base and a relative path with forward slashes
///
/// Remote paths are seedbox-side strings, not local `Path`s; the remote
/// is assumed to be POSIX.
fn join_remote(base: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_join_normalises_slashes() {
        assert_eq!(join_remote("/dl", "a/b.mkv"), "/dl/a/b.mkv");
        assert_eq!(join_remote("/dl/", "a.mkv"), "/dl/a.mkv");
        assert_eq!(join_remote("/dl", "/a.mkv"), "/dl/a.mkv");
    }
}
