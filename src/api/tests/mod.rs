use super::*;
use crate::config::Config;
use crate::db::{Database, NewApp, NewClient, NewDownloadJob};
use crate::events::EventBus;
use crate::sync::SpeedSampler;
use crate::types::TorrentState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use tower::ServiceExt; // for oneshot()

mod system;

/// A router over a seeded store, plus the handles tests poke at
pub(crate) struct ApiFixture {
    pub(crate) router: Router,
    pub(crate) db: Arc<Database>,
    pub(crate) bus: EventBus,
    pub(crate) sampler: SpeedSampler,
    _db_file: tempfile::NamedTempFile,
}

pub(crate) async fn fixture() -> ApiFixture {
    let db_file = tempfile::NamedTempFile::new().unwrap();
    let db = Arc::new(Database::new(db_file.path()).await.unwrap());

    db.upsert_client(&NewClient {
        name: "box1".to_string(),
        kind: "qbittorrent".to_string(),
        url: "http://box1:8080".to_string(),
        username: Some("admin".to_string()),
        password: Some("hunter2".to_string()),
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
        api_key: "super-secret".to_string(),
        category: "tv-sonarr".to_string(),
        downloads_path: None,
        cleanup_on_category_change: false,
        cleanup_on_remove: false,
        enabled: true,
    })
    .await
    .unwrap();

    let bus = EventBus::new();
    let sampler = SpeedSampler::new();
    let state = AppState {
        db: Arc::clone(&db),
        bus: bus.clone(),
        sampler: sampler.clone(),
        config: Arc::new(Config::default()),
    };

    ApiFixture {
        router: create_router(state, false),
        db,
        bus,
        sampler,
        _db_file: db_file,
    }
}

pub(crate) async fn seed_download(db: &Database) -> crate::db::DownloadJobRow {
    let client = db.get_client_by_name("box1").await.unwrap().unwrap();
    db.insert_download_job(&NewDownloadJob {
        client_id: client.id,
        remote_id: "aaa".to_string(),
        name: "Show S01".to_string(),
        category: "tv-sonarr".to_string(),
        status: TorrentState::Downloading.to_i32(),
        size_bytes: 1000,
        downloaded_bytes: 250,
        progress: 0.25,
        save_path: "/seedbox".to_string(),
        content_path: "/seedbox/Show S01".to_string(),
    })
    .await
    .unwrap()
}

pub(crate) async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}
