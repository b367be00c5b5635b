use super::test_db;
use crate::db::Database;

#[tokio::test]
async fn opening_twice_reruns_no_migrations() {
    let (db, temp_file) = test_db().await;
    db.close().await;

    // Reopen against the same file — migrations must be a no-op
    let db = Database::new(temp_file.path()).await.unwrap();
    let clients = db.list_clients().await.unwrap();
    assert!(clients.is_empty());
    db.close().await;
}

#[tokio::test]
async fn creates_database_file_in_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("state").join("seedreap.db");
    let db = Database::new(&nested).await.unwrap();
    assert!(nested.exists(), "database file must be created");
    db.close().await;
}

#[tokio::test]
async fn queries_after_close_return_errors() {
    let (db, _temp_file) = test_db().await;
    db.close().await;
    assert!(db.list_clients().await.is_err());
}
