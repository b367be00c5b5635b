//! Shared fixtures for the end-to-end pipeline tests.
//!
//! Each harness runs a real engine — real SQLite store, real controllers,
//! real filesystem — against a scripted torrent client, a local-copy
//! transfer backend, and passthrough app adapters. The "seedbox" is a
//! temp directory the transfer backend reads from.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use seedreap::client::mock::torrent_fixture;
use seedreap::client::{MockTorrentClient, TorrentFile, TorrentInfo};
use seedreap::config::{AppConfig, Config, DownloaderConfig, SshConfig};
use seedreap::events::{Event, EventKind, Subscription};
use seedreap::transfer::LocalTransferBackend;
use seedreap::types::{AppKind, ClientKind};
use seedreap::{Database, Seedreap};

pub const CLIENT: &str = "box1";

/// A running engine plus the scripted seedbox behind it
pub struct Harness {
    pub engine: Seedreap,
    pub client: MockTorrentClient,
    pub backend: Arc<LocalTransferBackend>,
    pub db: Arc<Database>,
    pub events: Subscription,
    /// Every event observed by the harness subscription, in arrival order
    pub log: Vec<Event>,
    /// The fake seedbox's download directory
    pub seedbox: PathBuf,
    pub downloads_path: PathBuf,
    pub syncing_path: PathBuf,
    _temp: tempfile::TempDir,
}

/// Declarative app entry for the harness config
pub struct HarnessApp {
    pub name: &'static str,
    pub kind: AppKind,
    pub category: &'static str,
    pub cleanup_on_category_change: bool,
    pub cleanup_on_remove: bool,
}

impl HarnessApp {
    pub fn new(name: &'static str, category: &'static str) -> Self {
        Self {
            name,
            kind: AppKind::Sonarr,
            category,
            cleanup_on_category_change: false,
            cleanup_on_remove: false,
        }
    }
}

pub async fn harness(apps: Vec<HarnessApp>) -> Harness {
    let temp = tempfile::tempdir().unwrap();
    let seedbox = temp.path().join("seedbox");
    let downloads_path = temp.path().join("library");
    let syncing_path = temp.path().join("staging");
    tokio::fs::create_dir_all(&seedbox).await.unwrap();

    let mut config = Config::default();
    config.server.listen = "127.0.0.1:0".parse().unwrap();
    config.server.swagger_ui = false;
    config.sync.downloads_path = downloads_path.clone();
    config.sync.syncing_path = syncing_path.clone();
    config.sync.poll_interval = Duration::from_millis(100);
    config.persistence.database_path = temp.path().join("seedreap.db");

    config.downloaders.insert(
        CLIENT.to_string(),
        DownloaderConfig {
            kind: ClientKind::Qbittorrent,
            url: "http://unused.invalid:8080".to_string(),
            username: None,
            password: None,
            enabled: true,
            timeout: Duration::from_secs(5),
            ssh: SshConfig {
                host: "unused.invalid".to_string(),
                port: 22,
                user: "sync".to_string(),
                key_file: None,
                known_hosts_file: None,
                ignore_host_key: true,
                timeout: Duration::from_secs(5),
            },
        },
    );

    let mut builder_apps = Vec::new();
    for app in &apps {
        config.apps.insert(
            app.name.to_string(),
            AppConfig {
                kind: app.kind,
                url: "http://unused.invalid:8989".to_string(),
                api_key: "unused".to_string(),
                category: app.category.to_string(),
                downloads_path: None,
                cleanup_on_category_change: app.cleanup_on_category_change,
                cleanup_on_remove: app.cleanup_on_remove,
                enabled: true,
                timeout: Duration::from_secs(5),
            },
        );
        builder_apps.push(app.name);
    }

    let client = MockTorrentClient::new();
    let backend = LocalTransferBackend::new();

    let mut builder = Seedreap::builder(config)
        .with_client(CLIENT, Arc::new(client.clone()))
        .with_transfer_backend(CLIENT, Arc::clone(&backend) as Arc<dyn seedreap::transfer::TransferBackend>);
    for name in builder_apps {
        builder = builder.with_app(name, Arc::new(seedreap::apps::PassthroughApp));
    }

    let engine = builder.build().await.unwrap();
    let events = engine.subscribe(&[]);
    let db = engine.db();

    Harness {
        engine,
        client,
        backend,
        db,
        events,
        log: Vec::new(),
        seedbox,
        downloads_path,
        syncing_path,
        _temp: temp,
    }
}

impl Harness {
    /// Put a torrent on the fake seedbox: metadata plus real file content
    pub async fn seed_torrent(
        &self,
        remote_id: &str,
        name: &str,
        category: &str,
        files: &[(&str, usize)],
    ) -> TorrentInfo {
        let mut torrent_files = Vec::new();
        let mut total = 0i64;
        for (path, size) in files {
            let full = self.seedbox.join(name).join(path);
            tokio::fs::create_dir_all(full.parent().unwrap()).await.unwrap();
            tokio::fs::write(&full, vec![0xABu8; *size]).await.unwrap();

            torrent_files.push(TorrentFile {
                relative_path: format!("{}/{}", name, path),
                size_bytes: *size as i64,
                progress: 0.0,
                priority: 1,
            });
            total += *size as i64;
        }

        let mut info = torrent_fixture(remote_id, name, category, total);
        info.save_path = self.seedbox.to_string_lossy().into_owned();
        info.content_path = self.seedbox.join(name).to_string_lossy().into_owned();

        self.client.upsert_torrent(info.clone(), torrent_files);
        info
    }

    /// Wait for the next event of the given kind (10s budget)
    pub async fn wait_for(&mut self, kind: EventKind) -> Event {
        self.wait_for_matching(kind, |_| true).await
    }

    /// Wait for an event of the kind satisfying the predicate
    pub async fn wait_for_matching(
        &mut self,
        kind: EventKind,
        predicate: impl Fn(&Event) -> bool,
    ) -> Event {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = tokio::time::timeout(remaining, self.events.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {kind:?}, saw {:?}",
                    self.log.iter().map(|e| e.kind).collect::<Vec<_>>()))
                .unwrap_or_else(|| panic!("event bus closed while waiting for {kind:?}"));
            let matched = event.kind == kind && predicate(&event);
            self.log.push(event);
            if matched {
                return self.log.last().cloned().unwrap_or_else(|| unreachable!());
            }
        }
    }

    /// Drain everything currently queued into the log
    pub fn drain(&mut self) {
        while let Some(event) = self.events.try_recv() {
            self.log.push(event);
        }
    }

    /// The expected default destination of a download
    pub fn destination(&self, category: &str, name: &str) -> PathBuf {
        self.downloads_path.join(CLIENT).join(category).join(name)
    }

    pub async fn shutdown(self) {
        self.engine.shutdown().await.unwrap();
    }
}

/// Poll until the tracked projection reaches the expected state
///
/// The projector runs on its own reactor, so store state can lag the
/// event the test just observed by a few handler turns.
pub async fn wait_until_tracked_state(
    db: &Database,
    download_id: seedreap::Id,
    expected: seedreap::TrackedState,
) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let tracked = db.get_tracked_for_download(download_id).await.unwrap();
        if let Some(tracked) = &tracked {
            if seedreap::TrackedState::from_i32(tracked.state) == expected {
                return;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "tracked state never reached {expected:?}, last seen {:?}",
            tracked.map(|t| seedreap::TrackedState::from_i32(t.state))
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll until the condition holds (5s budget)
pub async fn eventually<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if condition().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition never held: {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Assert that `kinds` appear in `events` in the given relative order
pub fn assert_ordered(events: &[Event], kinds: &[EventKind]) {
    let positions: Vec<Option<usize>> = kinds
        .iter()
        .map(|kind| events.iter().position(|e| e.kind == *kind))
        .collect();

    for (kind, position) in kinds.iter().zip(&positions) {
        assert!(
            position.is_some(),
            "expected {kind:?} among {:?}",
            events.iter().map(|e| e.kind).collect::<Vec<_>>()
        );
    }
    for window in positions.windows(2) {
        assert!(
            window[0] < window[1],
            "events out of order: expected {:?} in order, got {:?}",
            kinds,
            events.iter().map(|e| e.kind).collect::<Vec<_>>()
        );
    }
}

/// Convenience: the file path of one staged file
pub fn staging_file(harness: &Harness, download_id: seedreap::Id, relative: &str) -> PathBuf {
    harness
        .syncing_path
        .join(CLIENT)
        .join(download_id.to_string())
        .join(relative)
}
