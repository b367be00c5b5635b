use super::{fixture_app, fixture_client, test_db};
use crate::db::{NewApp, NewClient};

#[tokio::test]
async fn upsert_client_is_idempotent_on_name() {
    let (db, _f) = test_db().await;

    let first = fixture_client(&db, "box1").await;
    let second = db
        .upsert_client(&NewClient {
            name: "box1".to_string(),
            kind: "qbittorrent".to_string(),
            url: "http://box1:9090".to_string(),
            username: None,
            password: None,
            ssh_host: "box1".to_string(),
            ssh_port: 2222,
            ssh_user: "other".to_string(),
            ssh_key_file: None,
            enabled: false,
        })
        .await
        .unwrap();

    assert_eq!(second.id, first.id, "same name must keep the same row");
    assert_eq!(second.url, "http://box1:9090");
    assert_eq!(second.ssh_port, 2222);
    assert!(!second.enabled);
    assert_eq!(db.list_clients().await.unwrap().len(), 1);
}

#[tokio::test]
async fn touch_client_connected_stamps_timestamp() {
    let (db, _f) = test_db().await;
    let client = fixture_client(&db, "box1").await;
    assert!(client.last_connected_at.is_none());

    db.touch_client_connected(client.id).await.unwrap();
    let client = db.get_client(client.id).await.unwrap().unwrap();
    assert!(client.last_connected_at.is_some());
}

#[tokio::test]
async fn retired_clients_disappear_from_default_queries() {
    let (db, _f) = test_db().await;
    fixture_client(&db, "box1").await;
    fixture_client(&db, "box2").await;

    db.retire_clients_except(&["box1".to_string()]).await.unwrap();

    let clients = db.list_clients().await.unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].name, "box1");
    assert!(db.get_client_by_name("box2").await.unwrap().is_none());
}

#[tokio::test]
async fn apps_for_category_matches_enabled_apps_exactly() {
    let (db, _f) = test_db().await;
    fixture_app(&db, "sonarr-main", "tv-sonarr").await;
    fixture_app(&db, "sonarr-4k", "tv-sonarr").await;
    fixture_app(&db, "radarr-main", "movies").await;

    let matched = db.apps_for_category("tv-sonarr").await.unwrap();
    assert_eq!(matched.len(), 2, "apps sharing a category fan out");
    assert!(db.apps_for_category("tv").await.unwrap().is_empty());

    // Disable one and it drops out
    let mut app = db.get_app_by_name("sonarr-4k").await.unwrap().unwrap();
    db.upsert_app(&NewApp {
        name: app.name.clone(),
        kind: app.kind.clone(),
        url: app.url.clone(),
        api_key: app.api_key.clone(),
        category: app.category.clone(),
        downloads_path: app.downloads_path.take(),
        cleanup_on_category_change: false,
        cleanup_on_remove: false,
        enabled: false,
    })
    .await
    .unwrap();

    assert_eq!(db.apps_for_category("tv-sonarr").await.unwrap().len(), 1);
}
