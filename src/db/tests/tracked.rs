use super::{fixture_client, fixture_job, test_db};
use crate::db::{Database, EnsureAppJob, NewTracked};
use crate::types::{AppJobStatus, MoveStatus, TrackedState};

async fn fixture_tracked(db: &Database) -> (crate::types::Id, crate::db::TrackedRow) {
    let client = fixture_client(db, "box1").await;
    let job = fixture_job(db, client.id, "hash1").await;
    let tracked = db
        .insert_tracked(&NewTracked {
            download_job_id: job.id,
            name: job.name.clone(),
            category: job.category.clone(),
            app_name: Some("sonarr-main".to_string()),
            state: TrackedState::Downloading.to_i32(),
            total_size_bytes: 1000,
            completed_size_bytes: 0,
            total_files: 3,
            discovered_at: job.discovered_at,
        })
        .await
        .unwrap();
    (job.id, tracked)
}

#[tokio::test]
async fn soft_delete_then_restore_keeps_the_same_row() {
    let (db, _f) = test_db().await;
    let (job_id, tracked) = fixture_tracked(&db).await;

    db.soft_delete_tracked(tracked.id).await.unwrap();
    assert!(
        db.get_tracked_for_download(job_id).await.unwrap().is_none(),
        "soft-deleted rows are hidden by default"
    );

    let hidden = db
        .get_tracked_for_download_with_deleted(job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hidden.id, tracked.id, "opt-in bypass sees the row");
    assert!(hidden.deleted_at.is_some());

    db.restore_tracked(hidden.id).await.unwrap();
    let restored = db.get_tracked_for_download(job_id).await.unwrap().unwrap();
    assert_eq!(restored.id, tracked.id, "reactivation reuses the same ID");
    assert!(restored.deleted_at.is_none());
}

#[tokio::test]
async fn imported_stamping_sets_completed_at() {
    let (db, _f) = test_db().await;
    let (job_id, tracked) = fixture_tracked(&db).await;

    db.mark_tracked_imported(tracked.id).await.unwrap();
    let row = db.get_tracked_for_download(job_id).await.unwrap().unwrap();
    assert_eq!(TrackedState::from_i32(row.state), TrackedState::Imported);
    assert!(
        row.completed_at.is_some(),
        "state imported implies completed_at is set"
    );
}

#[tokio::test]
async fn failure_states_capture_the_message() {
    let (db, _f) = test_db().await;
    let (job_id, tracked) = fixture_tracked(&db).await;

    db.set_tracked_failure(tracked.id, TrackedState::SyncError, "sftp timed out")
        .await
        .unwrap();
    let row = db.get_tracked_for_download(job_id).await.unwrap().unwrap();
    assert_eq!(TrackedState::from_i32(row.state), TrackedState::SyncError);
    assert_eq!(row.error_message.as_deref(), Some("sftp timed out"));
}

#[tokio::test]
async fn state_counts_group_live_rows() {
    let (db, _f) = test_db().await;
    let (_job_id, tracked) = fixture_tracked(&db).await;
    db.set_tracked_state(tracked.id, TrackedState::Syncing)
        .await
        .unwrap();

    let counts = db.count_tracked_by_state().await.unwrap();
    assert_eq!(counts, vec![(TrackedState::Syncing.to_i32(), 1)]);
}

#[tokio::test]
async fn app_job_slot_is_reset_for_retry_only_from_error() {
    let (db, _f) = test_db().await;
    let client = fixture_client(&db, "box1").await;
    let job = fixture_job(&db, client.id, "hash1").await;

    let ready = db
        .ensure_app_job(job.id, "sonarr-main", "/library/t")
        .await
        .unwrap();
    let row = match ready {
        EnsureAppJob::Ready(row) => row,
        other => panic!("fresh slot must be ready, got {other:?}"),
    };

    // A pending slot can be claimed exactly once
    assert!(db.try_begin_app_job(row.id).await.unwrap());
    assert!(
        !db.try_begin_app_job(row.id).await.unwrap(),
        "second claim must lose"
    );

    // While processing, a second notification attempt backs off
    assert!(matches!(
        db.ensure_app_job(job.id, "sonarr-main", "/library/t")
            .await
            .unwrap(),
        EnsureAppJob::InFlight(_)
    ));

    // Errors are retried by a pipeline re-entry
    db.set_app_job_status(row.id, AppJobStatus::Error, Some("502"))
        .await
        .unwrap();
    match db
        .ensure_app_job(job.id, "sonarr-main", "/library/t2")
        .await
        .unwrap()
    {
        EnsureAppJob::Ready(reset) => {
            assert_eq!(reset.id, row.id);
            assert_eq!(reset.path, "/library/t2", "retry carries the new path");
            assert!(reset.error_message.is_none());
        }
        other => panic!("errored slot must reset, got {other:?}"),
    }

    // Completion is final
    db.set_app_job_status(row.id, AppJobStatus::Complete, None)
        .await
        .unwrap();
    assert!(matches!(
        db.ensure_app_job(job.id, "sonarr-main", "/library/t")
            .await
            .unwrap(),
        EnsureAppJob::AlreadyComplete(_)
    ));
}

#[tokio::test]
async fn move_job_reset_retries_only_errored_moves() {
    let (db, _f) = test_db().await;
    let client = fixture_client(&db, "box1").await;
    let job = fixture_job(&db, client.id, "hash1").await;

    let move_job = db
        .create_move_job(job.id, "/staging/t", "/library/t")
        .await
        .unwrap();
    assert!(!db.has_move_started(job.id).await.unwrap());

    db.set_move_job_status(move_job.id, MoveStatus::Moving, None)
        .await
        .unwrap();
    assert!(db.has_move_started(job.id).await.unwrap());
    assert!(!db.try_reset_move_job(move_job.id).await.unwrap());

    db.set_move_job_status(move_job.id, MoveStatus::Error, Some("destination exists"))
        .await
        .unwrap();
    assert!(db.try_reset_move_job(move_job.id).await.unwrap());

    let row = db.get_move_job(move_job.id).await.unwrap().unwrap();
    assert_eq!(MoveStatus::from_i32(row.status), MoveStatus::Pending);
    assert!(row.error_message.is_none());
}
