//! Store tests, organized by aggregate.

mod clients_apps;
mod downloads;
mod migrations;
mod sync_jobs;
mod tracked;

use super::*;
use tempfile::NamedTempFile;

/// Open a fresh database in a temp file; the file handle keeps it alive
pub(crate) async fn test_db() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

/// Insert a client fixture and return its row
pub(crate) async fn fixture_client(db: &Database, name: &str) -> ClientRow {
    db.upsert_client(&NewClient {
        name: name.to_string(),
        kind: "qbittorrent".to_string(),
        url: format!("http://{}:8080", name),
        username: Some("admin".to_string()),
        password: Some("secret".to_string()),
        ssh_host: name.to_string(),
        ssh_port: 22,
        ssh_user: "sync".to_string(),
        ssh_key_file: None,
        enabled: true,
    })
    .await
    .unwrap()
}

/// Insert an app fixture claiming the given category
pub(crate) async fn fixture_app(db: &Database, name: &str, category: &str) -> AppRow {
    db.upsert_app(&NewApp {
        name: name.to_string(),
        kind: "sonarr".to_string(),
        url: format!("http://{}:8989", name),
        api_key: "key".to_string(),
        category: category.to_string(),
        downloads_path: None,
        cleanup_on_category_change: false,
        cleanup_on_remove: false,
        enabled: true,
    })
    .await
    .unwrap()
}

/// Insert a download job fixture for a client
pub(crate) async fn fixture_job(db: &Database, client_id: crate::types::Id, remote_id: &str) -> DownloadJobRow {
    db.insert_download_job(&NewDownloadJob {
        client_id,
        remote_id: remote_id.to_string(),
        name: format!("torrent-{}", remote_id),
        category: "tv-sonarr".to_string(),
        status: crate::types::TorrentState::Downloading.to_i32(),
        size_bytes: 1000,
        downloaded_bytes: 0,
        progress: 0.0,
        save_path: "/seedbox/downloads".to_string(),
        content_path: format!("/seedbox/downloads/torrent-{}", remote_id),
    })
    .await
    .unwrap()
}
