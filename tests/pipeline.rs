//! End-to-end pipeline scenarios against a running engine.
//!
//! Scripted seedbox (mock client + local transfer backend), real store,
//! real controllers, real filesystem.

mod common;

use common::{CLIENT, HarnessApp, assert_ordered, eventually, harness, staging_file, wait_until_tracked_state};
use seedreap::events::EventKind;
use seedreap::types::{AppKind, TrackedState};
use std::time::Duration;

/// Happy path: one complete single-file torrent rides the whole pipeline.
#[tokio::test]
async fn complete_single_file_torrent_reaches_imported() {
    let mut h = harness(vec![HarnessApp::new("sonarr-main", "tv-sonarr")]).await;
    h.seed_torrent("aaa", "Show S01", "tv-sonarr", &[("e01.mkv", 200_000)])
        .await;
    h.client.complete_torrent("aaa");

    h.engine.start().await.unwrap();

    let notify_complete = h.wait_for(EventKind::AppNotifyComplete).await;
    assert_eq!(notify_complete.app.as_deref(), Some("sonarr-main"));

    assert_ordered(
        &h.log,
        &[
            EventKind::DownloadDiscovered,
            EventKind::DownloadComplete,
            EventKind::FileCompleted,
            EventKind::SyncStarted,
            EventKind::SyncFileComplete,
            EventKind::SyncComplete,
            EventKind::MoveStarted,
            EventKind::MoveComplete,
            EventKind::AppNotifyStarted,
            EventKind::AppNotifyComplete,
        ],
    );

    let download_id = h
        .log
        .iter()
        .find(|e| e.kind == EventKind::DownloadDiscovered)
        .and_then(|e| e.download_id)
        .unwrap();
    let destination = h.destination("tv-sonarr", "Show S01");
    assert!(
        destination.join("e01.mkv").exists(),
        "content must land in the destination tree"
    );
    assert!(
        !staging_file(&h, download_id, "e01.mkv").exists(),
        "staging must be empty after promotion"
    );

    wait_until_tracked_state(&h.db, download_id, TrackedState::Imported).await;
    let tracked = h
        .db
        .get_tracked_for_download(download_id)
        .await
        .unwrap()
        .unwrap();
    assert!(tracked.completed_at.is_some());

    h.shutdown().await;
}

/// Files sync one by one while the torrent is still downloading.
#[tokio::test]
async fn incremental_sync_during_download() {
    let mut h = harness(vec![HarnessApp::new("sonarr-main", "tv-sonarr")]).await;
    h.seed_torrent(
        "bbb",
        "Show S02",
        "tv-sonarr",
        &[("e01.mkv", 50_000), ("e02.mkv", 50_000), ("e03.mkv", 50_000)],
    )
    .await;

    h.engine.start().await.unwrap();
    let discovered = h.wait_for(EventKind::DownloadDiscovered).await;
    let download_id = discovered.download_id.unwrap();

    // First file completes remotely; its transfer starts while the
    // torrent is still downloading
    h.client.set_file_progress("bbb", "Show S02/e01.mkv", 1.0);
    h.wait_for_matching(EventKind::SyncFileComplete, |e| {
        e.detail_str("relative_path") == Some("e01.mkv")
    })
    .await;

    // Syncing while the remote still downloads is the hybrid state
    wait_until_tracked_state(&h.db, download_id, TrackedState::DownloadingSyncing).await;

    // Remaining files finish; the sync job completes after the third
    h.client.set_file_progress("bbb", "Show S02/e02.mkv", 1.0);
    h.wait_for_matching(EventKind::SyncFileComplete, |e| {
        e.detail_str("relative_path") == Some("e02.mkv")
    })
    .await;
    h.client.set_file_progress("bbb", "Show S02/e03.mkv", 1.0);

    h.wait_for(EventKind::SyncComplete).await;
    h.wait_for(EventKind::AppNotifyComplete).await;

    assert_eq!(
        h.log
            .iter()
            .filter(|e| e.kind == EventKind::FileCompleted)
            .count(),
        3
    );
    assert_ordered(
        &h.log,
        &[
            EventKind::SyncStarted,
            EventKind::SyncComplete,
            EventKind::MoveComplete,
            EventKind::AppNotifyComplete,
        ],
    );

    wait_until_tracked_state(&h.db, download_id, TrackedState::Imported).await;
    let tracked = h
        .db
        .get_tracked_for_download(download_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tracked.completed_size_bytes, 150_000);

    h.shutdown().await;
}

/// Category change mid-sync to another tracked app: the in-flight
/// transfer survives and the move resolves to the new app's path.
#[tokio::test]
async fn category_change_mid_sync_to_other_tracked_app() {
    let mut h = harness(vec![
        HarnessApp::new("sonarr-main", "tv-sonarr"),
        HarnessApp {
            kind: AppKind::Radarr,
            ..HarnessApp::new("radarr-main", "movies-radarr")
        },
    ])
    .await;

    h.seed_torrent(
        "ccc",
        "Feature",
        "tv-sonarr",
        &[("part1.mkv", 400_000), ("part2.mkv", 50_000), ("part3.mkv", 50_000)],
    )
    .await;

    // Slow the first transfer down so the category change lands mid-flight
    h.backend.set_chunk_delay(Some(Duration::from_millis(100)));

    h.engine.start().await.unwrap();
    h.wait_for(EventKind::DownloadDiscovered).await;

    h.client.set_file_progress("ccc", "Feature/part1.mkv", 1.0);
    h.wait_for_matching(EventKind::SyncFileStarted, |e| {
        e.detail_str("relative_path") == Some("part1.mkv")
    })
    .await;

    // Mid-transfer category change
    h.client.set_category("ccc", "movies-radarr");
    h.wait_for(EventKind::CategoryChanged).await;

    // The in-flight transfer completes rather than aborting
    h.backend.set_chunk_delay(None);
    let part1_done = h
        .wait_for_matching(EventKind::SyncFileComplete, |e| {
            e.detail_str("relative_path") == Some("part1.mkv")
        })
        .await;
    assert!(part1_done.at >= h.log.iter().find(|e| e.kind == EventKind::CategoryChanged).unwrap().at);

    h.client.set_file_progress("ccc", "Feature/part2.mkv", 1.0);
    h.client.set_file_progress("ccc", "Feature/part3.mkv", 1.0);
    h.wait_for(EventKind::SyncComplete).await;

    let move_complete = h.wait_for(EventKind::MoveComplete).await;
    let final_path = move_complete.detail_str("final_path").unwrap().to_string();
    assert!(
        final_path.contains("movies-radarr"),
        "move must resolve against the new category, got {final_path}"
    );

    let notified = h.wait_for(EventKind::AppNotifyComplete).await;
    assert_eq!(notified.app.as_deref(), Some("radarr-main"));

    let destination = h.destination("movies-radarr", "Feature");
    for part in ["part1.mkv", "part2.mkv", "part3.mkv"] {
        assert!(destination.join(part).exists(), "{part} must be promoted");
    }

    h.shutdown().await;
}

/// Category change to an untracked value cancels the sync and cleans up.
#[tokio::test]
async fn category_change_to_untracked_cancels_and_cleans_up() {
    let mut h = harness(vec![HarnessApp {
        cleanup_on_category_change: true,
        ..HarnessApp::new("sonarr-main", "tv-sonarr")
    }])
    .await;

    h.seed_torrent(
        "ddd",
        "Show S03",
        "tv-sonarr",
        &[("e01.mkv", 600_000), ("e02.mkv", 50_000)],
    )
    .await;
    h.backend.set_chunk_delay(Some(Duration::from_millis(100)));

    h.engine.start().await.unwrap();
    let discovered = h.wait_for(EventKind::DownloadDiscovered).await;
    let download_id = discovered.download_id.unwrap();

    h.client.set_file_progress("ddd", "Show S03/e01.mkv", 1.0);
    h.wait_for(EventKind::SyncFileStarted).await;

    // A destination tree from an earlier run should be cleaned up too
    let destination = h.destination("tv-sonarr", "Show S03");
    tokio::fs::create_dir_all(&destination).await.unwrap();
    tokio::fs::write(destination.join("stale.mkv"), b"old").await.unwrap();

    h.client.set_category("ddd", "archive");
    h.wait_for(EventKind::SyncCancelled).await;
    h.wait_for(EventKind::Cleanup).await;

    let staging_root = h.syncing_path.join(CLIENT).join(download_id.to_string());
    assert!(!staging_root.exists(), "staging tree must be removed");
    assert!(
        !destination.exists(),
        "cleanupOnCategoryChange removes the destination tree"
    );

    // The projection is soft-deleted, ready for reactivation
    let db = h.db.clone();
    eventually("tracked projection soft-deleted", || {
        let db = db.clone();
        async move {
            db.get_tracked_for_download(download_id)
                .await
                .unwrap()
                .is_none()
        }
    })
    .await;
    let hidden = h
        .db
        .get_tracked_for_download_with_deleted(download_id)
        .await
        .unwrap()
        .unwrap();
    assert!(hidden.deleted_at.is_some());

    h.backend.set_chunk_delay(None);
    h.shutdown().await;
}

/// Removal on the seedbox with cleanupOnRemove tears everything down.
#[tokio::test]
async fn removal_on_seedbox_cleans_destination_and_projection() {
    let mut h = harness(vec![HarnessApp {
        cleanup_on_remove: true,
        ..HarnessApp::new("sonarr-main", "tv-sonarr")
    }])
    .await;

    h.seed_torrent("eee", "Show S04", "tv-sonarr", &[("e01.mkv", 100_000)])
        .await;
    h.client.complete_torrent("eee");

    h.engine.start().await.unwrap();
    let notified = h.wait_for(EventKind::AppNotifyComplete).await;
    let download_id = notified.download_id.unwrap();

    let destination = h.destination("tv-sonarr", "Show S04");
    assert!(destination.join("e01.mkv").exists());

    // The user deletes the torrent on the seedbox
    h.client.remove_torrent("eee");
    h.wait_for(EventKind::DownloadRemoved).await;
    h.wait_for(EventKind::Cleanup).await;

    assert!(
        !destination.exists(),
        "cleanupOnRemove removes the destination tree"
    );
    assert!(
        h.db.get_download_job(download_id).await.unwrap().is_none(),
        "removal hard-deletes the job"
    );
    assert!(
        h.db.get_tracked_for_download_with_deleted(download_id)
            .await
            .unwrap()
            .is_none(),
        "removal hard-deletes the projection"
    );

    h.shutdown().await;
}

/// An auth failure at poll time mutates nothing and recovers by itself.
#[tokio::test]
async fn auth_failure_at_poll_is_quiet_and_recovers() {
    let mut h = harness(vec![HarnessApp::new("sonarr-main", "tv-sonarr")]).await;
    h.seed_torrent("fff", "Show S05", "tv-sonarr", &[("e01.mkv", 10_000)])
        .await;
    h.client
        .fail_list(Some(seedreap::client::mock::MockFailure::Auth));

    h.engine.start().await.unwrap();

    // Let several poll cycles fail
    tokio::time::sleep(Duration::from_millis(500)).await;
    h.drain();

    assert!(
        h.db.list_download_jobs().await.unwrap().is_empty(),
        "failed polls must not mutate the store"
    );
    assert!(
        !h.log
            .iter()
            .any(|e| matches!(e.kind, EventKind::DownloadDiscovered | EventKind::DownloadRemoved)),
        "failed polls must not emit download events"
    );

    // The next cycle proceeds normally once auth recovers
    h.client.fail_list(None);
    h.wait_for(EventKind::DownloadDiscovered).await;
    assert_eq!(h.db.list_download_jobs().await.unwrap().len(), 1);

    h.shutdown().await;
}

/// Cancel + cleanup leaves a download re-syncable: the next completed
/// file starts a fresh sync job.
#[tokio::test]
async fn cancelled_sync_is_resyncable_after_category_returns() {
    let mut h = harness(vec![HarnessApp::new("sonarr-main", "tv-sonarr")]).await;
    h.seed_torrent("ggg", "Show S06", "tv-sonarr", &[("e01.mkv", 600_000)])
        .await;
    h.backend.set_chunk_delay(Some(Duration::from_millis(100)));

    h.engine.start().await.unwrap();
    let discovered = h.wait_for(EventKind::DownloadDiscovered).await;
    let download_id = discovered.download_id.unwrap();

    h.client.set_file_progress("ggg", "Show S06/e01.mkv", 1.0);
    h.wait_for(EventKind::SyncFileStarted).await;
    let first_job = h
        .db
        .get_sync_job_for_download(download_id)
        .await
        .unwrap()
        .unwrap();

    h.client.set_category("ggg", "archive");
    h.wait_for(EventKind::SyncCancelled).await;
    h.backend.set_chunk_delay(None);

    // Back to the tracked category: the completed file re-enters the
    // pipeline under a fresh sync job
    h.client.set_category("ggg", "tv-sonarr");
    h.wait_for(EventKind::SyncComplete).await;

    let second_job = h
        .db
        .get_sync_job_for_download(download_id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(
        second_job.id, first_job.id,
        "a cancelled sync job is archived, not resumed"
    );

    h.wait_for(EventKind::AppNotifyComplete).await;
    h.shutdown().await;
}
