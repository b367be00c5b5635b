use super::{fixture_client, fixture_job, test_db};
use crate::db::{Database, DownloadFileRow, DownloadJobRow, EnsureSyncFile, NewDownloadFile, SyncJobRow};
use crate::types::{SyncFileStatus, SyncStatus};

async fn fixture_sync(db: &Database) -> (DownloadJobRow, SyncJobRow, Vec<DownloadFileRow>) {
    let client = fixture_client(db, "box1").await;
    let job = fixture_job(db, client.id, "hash1").await;

    let mut files = Vec::new();
    for name in ["a.mkv", "b.mkv", "c.mkv"] {
        files.push(
            db.upsert_download_file(&NewDownloadFile {
                download_job_id: job.id,
                relative_path: name.to_string(),
                size_bytes: 100,
                downloaded_bytes: 100,
                progress: 1.0,
                priority: 1,
            })
            .await
            .unwrap(),
        );
    }

    let (sync_job, created) = db
        .ensure_sync_job(job.id, "/seedbox/t", "/staging/box1/t")
        .await
        .unwrap();
    assert!(created);
    (job, sync_job, files)
}

#[tokio::test]
async fn ensure_sync_job_returns_existing_row_on_second_call() {
    let (db, _f) = test_db().await;
    let (job, sync_job, _) = fixture_sync(&db).await;

    let (again, created) = db
        .ensure_sync_job(job.id, "/elsewhere", "/elsewhere")
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(again.id, sync_job.id);
    assert_eq!(again.remote_base, "/seedbox/t", "bases of the original win");
}

#[tokio::test]
async fn ensure_sync_file_gates_duplicate_events_on_terminal_status() {
    let (db, _f) = test_db().await;
    let (_job, sync_job, files) = fixture_sync(&db).await;

    let first = db
        .ensure_sync_file(sync_job.id, files[0].id, "a.mkv", 100)
        .await
        .unwrap();
    let row = match first {
        EnsureSyncFile::Created(row) => row,
        EnsureSyncFile::Existing(_) => panic!("first ensure must create"),
    };

    db.complete_sync_file(row.id).await.unwrap();

    // A duplicate file.completed event finds the terminal row
    match db
        .ensure_sync_file(sync_job.id, files[0].id, "a.mkv", 100)
        .await
        .unwrap()
    {
        EnsureSyncFile::Existing(existing) => {
            assert!(SyncFileStatus::from_i32(existing.status).is_terminal());
            assert_eq!(existing.id, row.id);
        }
        EnsureSyncFile::Created(_) => panic!("duplicate event must not create a second transfer"),
    }
}

#[tokio::test]
async fn job_start_transition_happens_exactly_once() {
    let (db, _f) = test_db().await;
    let (_job, sync_job, _) = fixture_sync(&db).await;

    assert!(db.try_start_sync_job(sync_job.id).await.unwrap());
    assert!(
        !db.try_start_sync_job(sync_job.id).await.unwrap(),
        "second start must lose the race"
    );

    let row = db.get_sync_job(sync_job.id).await.unwrap().unwrap();
    assert_eq!(SyncStatus::from_i32(row.status), SyncStatus::Syncing);
    assert!(row.started_at.is_some());
}

#[tokio::test]
async fn job_completes_only_when_every_noncancelled_file_is_complete() {
    let (db, _f) = test_db().await;
    let (_job, sync_job, files) = fixture_sync(&db).await;

    let mut rows = Vec::new();
    for file in &files {
        match db
            .ensure_sync_file(sync_job.id, file.id, &file.relative_path, 100)
            .await
            .unwrap()
        {
            EnsureSyncFile::Created(row) => rows.push(row),
            EnsureSyncFile::Existing(_) => panic!("fixture files are fresh"),
        }
    }
    db.try_start_sync_job(sync_job.id).await.unwrap();

    db.complete_sync_file(rows[0].id).await.unwrap();
    assert!(
        !db.try_complete_sync_job(sync_job.id).await.unwrap(),
        "two files still open"
    );

    db.complete_sync_file(rows[1].id).await.unwrap();
    db.cancel_sync_file(rows[2].id).await.unwrap();
    assert!(
        db.try_complete_sync_job(sync_job.id).await.unwrap(),
        "complete + cancelled files satisfy completion"
    );
    assert!(
        !db.try_complete_sync_job(sync_job.id).await.unwrap(),
        "completion must be reported exactly once"
    );

    let row = db.get_sync_job(sync_job.id).await.unwrap().unwrap();
    assert!(row.completed_at.is_some());
}

#[tokio::test]
async fn job_fails_only_after_the_last_open_file_settles() {
    let (db, _f) = test_db().await;
    let (_job, sync_job, files) = fixture_sync(&db).await;

    let mut rows = Vec::new();
    for file in files.iter().take(2) {
        match db
            .ensure_sync_file(sync_job.id, file.id, &file.relative_path, 100)
            .await
            .unwrap()
        {
            EnsureSyncFile::Created(row) => rows.push(row),
            EnsureSyncFile::Existing(_) => panic!("fixture files are fresh"),
        }
    }
    db.try_start_sync_job(sync_job.id).await.unwrap();

    db.fail_sync_file(rows[0].id, "connection reset").await.unwrap();
    assert!(
        !db.try_fail_sync_job(sync_job.id, "connection reset")
            .await
            .unwrap(),
        "a pending sibling blocks the job-level failure"
    );

    db.fail_sync_file(rows[1].id, "connection reset").await.unwrap();
    assert!(
        db.try_fail_sync_job(sync_job.id, "connection reset")
            .await
            .unwrap()
    );

    let row = db.get_sync_job(sync_job.id).await.unwrap().unwrap();
    assert_eq!(SyncStatus::from_i32(row.status), SyncStatus::Error);
    assert_eq!(row.error_message.as_deref(), Some("connection reset"));
}

#[tokio::test]
async fn cancelling_a_job_cancels_open_files_and_stamps_cancelled_at() {
    let (db, _f) = test_db().await;
    let (_job, sync_job, files) = fixture_sync(&db).await;

    let mut rows = Vec::new();
    for file in &files {
        match db
            .ensure_sync_file(sync_job.id, file.id, &file.relative_path, 100)
            .await
            .unwrap()
        {
            EnsureSyncFile::Created(row) => rows.push(row),
            EnsureSyncFile::Existing(_) => panic!("fixture files are fresh"),
        }
    }
    db.complete_sync_file(rows[0].id).await.unwrap();

    assert!(db.try_cancel_sync_job(sync_job.id).await.unwrap());
    db.cancel_open_sync_files(sync_job.id).await.unwrap();

    let statuses: Vec<SyncFileStatus> = db
        .list_sync_files(sync_job.id)
        .await
        .unwrap()
        .iter()
        .map(|f| SyncFileStatus::from_i32(f.status))
        .collect();
    assert!(
        statuses.contains(&SyncFileStatus::Complete),
        "completed files keep their terminal status"
    );
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == SyncFileStatus::Cancelled)
            .count(),
        2
    );

    let row = db.get_sync_job(sync_job.id).await.unwrap().unwrap();
    assert!(row.cancelled_at.is_some());
    assert!(
        !db.try_cancel_sync_job(sync_job.id).await.unwrap(),
        "cancel is terminal"
    );
}

#[tokio::test]
async fn progress_updates_are_clamped_to_the_file_size() {
    let (db, _f) = test_db().await;
    let (_job, sync_job, files) = fixture_sync(&db).await;

    let row = match db
        .ensure_sync_file(sync_job.id, files[0].id, "a.mkv", 100)
        .await
        .unwrap()
    {
        EnsureSyncFile::Created(row) => row,
        EnsureSyncFile::Existing(_) => panic!("fresh"),
    };
    db.try_start_sync_file(row.id).await.unwrap();

    db.update_sync_file_progress(row.id, 5000).await.unwrap();
    let row = db.get_sync_file(row.id).await.unwrap().unwrap();
    assert_eq!(row.synced_bytes, 100, "synced_size must never exceed size");
}

#[tokio::test]
async fn restorable_jobs_are_the_pending_and_syncing_ones() {
    let (db, _f) = test_db().await;
    let (_job, sync_job, _) = fixture_sync(&db).await;

    assert_eq!(db.list_restorable_sync_jobs().await.unwrap().len(), 1);

    db.try_start_sync_job(sync_job.id).await.unwrap();
    assert_eq!(db.list_restorable_sync_jobs().await.unwrap().len(), 1);

    db.try_cancel_sync_job(sync_job.id).await.unwrap();
    assert!(db.list_restorable_sync_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn sum_synced_bytes_aggregates_across_files() {
    let (db, _f) = test_db().await;
    let (_job, sync_job, files) = fixture_sync(&db).await;

    for (i, file) in files.iter().enumerate() {
        let row = match db
            .ensure_sync_file(sync_job.id, file.id, &file.relative_path, 100)
            .await
            .unwrap()
        {
            EnsureSyncFile::Created(row) => row,
            EnsureSyncFile::Existing(_) => panic!("fresh"),
        };
        db.try_start_sync_file(row.id).await.unwrap();
        db.update_sync_file_progress(row.id, (i as i64 + 1) * 10)
            .await
            .unwrap();
    }

    assert_eq!(db.sum_synced_bytes(sync_job.id).await.unwrap(), 60);
}
