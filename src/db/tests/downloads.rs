use super::{fixture_client, fixture_job, test_db};
use crate::db::{DownloadJobUpdate, NewDownloadFile, NewDownloadJob};
use crate::types::TorrentState;

#[tokio::test]
async fn duplicate_remote_id_on_same_client_violates_constraint() {
    let (db, _f) = test_db().await;
    let client = fixture_client(&db, "box1").await;
    fixture_job(&db, client.id, "hash1").await;

    let duplicate = db
        .insert_download_job(&NewDownloadJob {
            client_id: client.id,
            remote_id: "hash1".to_string(),
            name: "dupe".to_string(),
            category: String::new(),
            status: TorrentState::Downloading.to_i32(),
            size_bytes: 1,
            downloaded_bytes: 0,
            progress: 0.0,
            save_path: String::new(),
            content_path: String::new(),
        })
        .await;

    assert!(duplicate.is_err(), "(client_id, remote_id) must be unique");
}

#[tokio::test]
async fn same_remote_id_on_other_client_is_allowed() {
    let (db, _f) = test_db().await;
    let box1 = fixture_client(&db, "box1").await;
    let box2 = fixture_client(&db, "box2").await;

    fixture_job(&db, box1.id, "hash1").await;
    fixture_job(&db, box2.id, "hash1").await;

    assert_eq!(db.list_download_jobs().await.unwrap().len(), 2);
}

#[tokio::test]
async fn update_persists_the_poller_diff() {
    let (db, _f) = test_db().await;
    let client = fixture_client(&db, "box1").await;
    let job = fixture_job(&db, client.id, "hash1").await;

    db.update_download_job(&DownloadJobUpdate {
        id: job.id,
        name: job.name.clone(),
        category: "movies-radarr".to_string(),
        previous_category: Some("tv-sonarr".to_string()),
        status: TorrentState::Complete.to_i32(),
        size_bytes: 1000,
        downloaded_bytes: 1000,
        progress: 1.0,
        save_path: job.save_path.clone(),
        content_path: job.content_path.clone(),
        downloaded_at: Some(123),
    })
    .await
    .unwrap();

    let job = db.get_download_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.category, "movies-radarr");
    assert_eq!(job.previous_category.as_deref(), Some("tv-sonarr"));
    assert_eq!(job.status, TorrentState::Complete.to_i32());
    assert_eq!(job.downloaded_at, Some(123));
}

#[tokio::test]
async fn upsert_download_file_updates_in_place() {
    let (db, _f) = test_db().await;
    let client = fixture_client(&db, "box1").await;
    let job = fixture_job(&db, client.id, "hash1").await;

    let file = db
        .upsert_download_file(&NewDownloadFile {
            download_job_id: job.id,
            relative_path: "Season 1/e01.mkv".to_string(),
            size_bytes: 500,
            downloaded_bytes: 100,
            progress: 0.2,
            priority: 1,
        })
        .await
        .unwrap();

    let again = db
        .upsert_download_file(&NewDownloadFile {
            download_job_id: job.id,
            relative_path: "Season 1/e01.mkv".to_string(),
            size_bytes: 500,
            downloaded_bytes: 500,
            progress: 1.0,
            priority: 1,
        })
        .await
        .unwrap();

    assert_eq!(again.id, file.id, "same (job, path) must keep the same row");
    assert!(again.is_complete());
    assert_eq!(db.list_download_files(job.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn deleting_a_job_cascades_into_all_dependents() {
    let (db, _f) = test_db().await;
    let client = fixture_client(&db, "box1").await;
    let job = fixture_job(&db, client.id, "hash1").await;

    let file = db
        .upsert_download_file(&NewDownloadFile {
            download_job_id: job.id,
            relative_path: "a.mkv".to_string(),
            size_bytes: 10,
            downloaded_bytes: 10,
            progress: 1.0,
            priority: 1,
        })
        .await
        .unwrap();

    let (sync_job, _) = db
        .ensure_sync_job(job.id, "/seedbox/t", "/staging/t")
        .await
        .unwrap();
    db.ensure_sync_file(sync_job.id, file.id, "a.mkv", 10)
        .await
        .unwrap();
    db.create_move_job(job.id, "/staging/t", "/library/t")
        .await
        .unwrap();
    db.ensure_app_job(job.id, "sonarr-main", "/library/t")
        .await
        .unwrap();

    db.delete_download_job(job.id).await.unwrap();

    assert!(db.get_download_job(job.id).await.unwrap().is_none());
    assert!(db.list_download_files(job.id).await.unwrap().is_empty());
    assert!(db.get_sync_job_for_download(job.id).await.unwrap().is_none());
    assert!(db.list_sync_files(sync_job.id).await.unwrap().is_empty());
    assert!(db.get_move_job_for_download(job.id).await.unwrap().is_none());
    assert!(db.list_app_jobs(job.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn excluded_files_are_flagged() {
    let (db, _f) = test_db().await;
    let client = fixture_client(&db, "box1").await;
    let job = fixture_job(&db, client.id, "hash1").await;

    let file = db
        .upsert_download_file(&NewDownloadFile {
            download_job_id: job.id,
            relative_path: "sample/sample.mkv".to_string(),
            size_bytes: 10,
            downloaded_bytes: 0,
            progress: 0.0,
            priority: 0,
        })
        .await
        .unwrap();

    assert!(file.is_excluded(), "priority 0 means excluded by the user");
}
