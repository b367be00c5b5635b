//! The seedreap engine: wiring, startup, and shutdown.
//!
//! [`Seedreap`] owns everything long-lived — the store, the event bus,
//! the adapters, and the controllers. Construction validates the
//! configuration and syncs the declared clients and apps into the store;
//! [`Seedreap::start`] registers every subscriber before the first poll
//! so no event is missed, then starts the poller and the HTTP API.
//!
//! Shutdown order matters: the transfer backends are told to quiet down
//! first, then the root cancellation token fires, then the controllers
//! are given a bounded time to settle before connections close.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::apps::{MediaApp, build_app};
use crate::client::{QbitClient, TorrentClient};
use crate::config::Config;
use crate::db::{Database, NewApp, NewClient};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, EventKind, SubjectType, Subscription, publish_event};
use crate::mover::MoveController;
use crate::notifier::NotifyController;
use crate::poller::DownloadPoller;
use crate::speed_limiter::SpeedLimiter;
use crate::sync::{SpeedSampler, SyncController, SyncControllerConfig};
use crate::tracker::TrackedProjector;
use crate::transfer::{SftpTransferBackend, TransferBackend, sftp::SftpOptions};

/// Keep this many events in the history table
const EVENT_RETENTION: i64 = 10_000;

/// Prune the event history this often
const PRUNE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

/// Builder for a [`Seedreap`] engine
///
/// Adapter overrides exist for embedding and tests: a scripted torrent
/// client, a local transfer backend, or a recording app can stand in for
/// the real implementations.
pub struct SeedreapBuilder {
    config: Config,
    client_overrides: HashMap<String, Arc<dyn TorrentClient>>,
    app_overrides: HashMap<String, Arc<dyn MediaApp>>,
    backend_overrides: HashMap<String, Arc<dyn TransferBackend>>,
}

impl SeedreapBuilder {
    /// Start building from a configuration
    pub fn new(config: Config) -> Self {
        Self {
            config,
            client_overrides: HashMap::new(),
            app_overrides: HashMap::new(),
            backend_overrides: HashMap::new(),
        }
    }

    /// Replace the torrent-client adapter for one configured downloader
    pub fn with_client(mut self, name: &str, client: Arc<dyn TorrentClient>) -> Self {
        self.client_overrides.insert(name.to_string(), client);
        self
    }

    /// Replace the media-app adapter for one configured app
    pub fn with_app(mut self, name: &str, app: Arc<dyn MediaApp>) -> Self {
        self.app_overrides.insert(name.to_string(), app);
        self
    }

    /// Replace the transfer backend for one configured downloader
    pub fn with_transfer_backend(mut self, name: &str, backend: Arc<dyn TransferBackend>) -> Self {
        self.backend_overrides.insert(name.to_string(), backend);
        self
    }

    /// Validate, open the store, sync config entities, build adapters
    pub async fn build(self) -> Result<Seedreap> {
        let SeedreapBuilder {
            config,
            client_overrides,
            app_overrides,
            backend_overrides,
        } = self;

        config.validate()?;
        let config = Arc::new(config);

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        sync_config_entities(&db, &config).await?;

        let limiter = SpeedLimiter::new(config.sync.transfer_speed_max);

        let mut clients: HashMap<String, Arc<dyn TorrentClient>> = HashMap::new();
        let mut backends: HashMap<String, Arc<dyn TransferBackend>> = HashMap::new();
        for (name, downloader) in &config.downloaders {
            let adapter: Arc<dyn TorrentClient> = match client_overrides.get(name) {
                Some(adapter) => Arc::clone(adapter),
                None => Arc::new(QbitClient::new(
                    &downloader.url,
                    downloader.username.clone(),
                    downloader.password.clone(),
                    downloader.timeout,
                )?),
            };
            clients.insert(name.clone(), adapter);

            let backend: Arc<dyn TransferBackend> = match backend_overrides.get(name) {
                Some(backend) => Arc::clone(backend),
                None => Arc::new(SftpTransferBackend::new(
                    SftpOptions {
                        host: downloader.ssh.host.clone(),
                        port: downloader.ssh.port,
                        user: downloader.ssh.user.clone(),
                        key_file: downloader.ssh.key_file.clone(),
                        known_hosts_file: downloader.ssh.known_hosts_file.clone(),
                        ignore_host_key: downloader.ssh.ignore_host_key,
                        timeout: downloader.ssh.timeout,
                    },
                    config.sync.parallel_connections,
                    limiter.clone(),
                )),
            };
            backends.insert(name.clone(), backend);
        }

        let mut apps: HashMap<String, Arc<dyn MediaApp>> = HashMap::new();
        for (name, app) in &config.apps {
            let adapter: Arc<dyn MediaApp> = match app_overrides.get(name) {
                Some(adapter) => Arc::clone(adapter),
                None => build_app(app.kind, &app.url, &app.api_key, app.timeout)
                    .map_err(|e| Error::config(format!("apps.{}", name), e.to_string()))?,
            };
            apps.insert(name.clone(), adapter);
        }

        Ok(Seedreap {
            config,
            db,
            bus: EventBus::new(),
            clients,
            apps,
            backends,
            limiter,
            sampler: SpeedSampler::new(),
            cancel: CancellationToken::new(),
            handles: tokio::sync::Mutex::new(Vec::new()),
        })
    }
}

/// The seedreap engine
pub struct Seedreap {
    config: Arc<Config>,
    db: Arc<Database>,
    bus: EventBus,
    clients: HashMap<String, Arc<dyn TorrentClient>>,
    apps: HashMap<String, Arc<dyn MediaApp>>,
    backends: HashMap<String, Arc<dyn TransferBackend>>,
    limiter: SpeedLimiter,
    sampler: SpeedSampler,
    cancel: CancellationToken,
    handles: tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Seedreap {
    /// Build an engine with the default adapters
    pub async fn new(config: Config) -> Result<Self> {
        SeedreapBuilder::new(config).build().await
    }

    /// Builder with adapter overrides
    pub fn builder(config: Config) -> SeedreapBuilder {
        SeedreapBuilder::new(config)
    }

    /// The store handle (read access for embedders)
    pub fn db(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }

    /// The throughput sampler
    pub fn sampler(&self) -> SpeedSampler {
        self.sampler.clone()
    }

    /// The global transfer speed limiter
    pub fn limiter(&self) -> SpeedLimiter {
        self.limiter.clone()
    }

    /// The active configuration
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Subscribe to engine events (empty slice = every kind)
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        self.bus.subscribe("embedder", kinds)
    }

    /// Start the controllers, the poller, and the HTTP API
    ///
    /// Every reactor registers its subscription before the poller emits
    /// its first event.
    pub async fn start(&self) -> Result<()> {
        publish_event(
            &self.db,
            &self.bus,
            Event::new(EventKind::SystemStarted, SubjectType::System)
                .message(format!("seedreap {} started", env!("CARGO_PKG_VERSION"))),
        )
        .await;

        self.connect_adapters().await;

        let mut handles = self.handles.lock().await;

        let projector = TrackedProjector::new(
            Arc::clone(&self.db),
            self.bus.clone(),
            self.cancel.child_token(),
        );
        handles.push(projector.spawn());

        let sync_controller = SyncController::new(
            Arc::clone(&self.db),
            self.bus.clone(),
            SyncControllerConfig {
                syncing_path: self.config.sync.syncing_path.clone(),
                downloads_path: self.config.sync.downloads_path.clone(),
                max_concurrent: self.config.sync.max_concurrent,
            },
            self.backends.clone(),
            self.limiter.clone(),
            self.sampler.clone(),
            self.cancel.child_token(),
        );
        handles.push(sync_controller.spawn());

        let mover = MoveController::new(
            Arc::clone(&self.db),
            self.bus.clone(),
            self.config.sync.downloads_path.clone(),
            self.cancel.child_token(),
        );
        handles.push(mover.spawn());

        let notifier = NotifyController::new(
            Arc::clone(&self.db),
            self.bus.clone(),
            self.apps.clone(),
            self.cancel.child_token(),
        );
        handles.push(notifier.spawn());

        // The poller goes last: every subscriber above is registered
        let poller = DownloadPoller::new(
            Arc::clone(&self.db),
            self.bus.clone(),
            self.clients.clone(),
            self.config.sync.poll_interval,
            self.cancel.child_token(),
        );
        handles.push(poller.spawn());

        handles.push(self.spawn_event_pruner());
        handles.push(crate::api::serve(
            crate::api::AppState {
                db: Arc::clone(&self.db),
                bus: self.bus.clone(),
                sampler: self.sampler.clone(),
                config: Arc::clone(&self.config),
            },
            self.config.server.listen,
            self.config.server.swagger_ui,
            self.cancel.child_token(),
        ));

        tracing::info!(listen = %self.config.server.listen, "seedreap started");
        Ok(())
    }

    /// Validate every adapter connection, recording the outcomes
    ///
    /// Failures are logged and published, never fatal: a seedbox that is
    /// down at startup is polled again on the next cycle anyway.
    async fn connect_adapters(&self) {
        for (name, adapter) in &self.clients {
            match adapter.connect().await {
                Ok(()) => {
                    if let Ok(Some(client)) = self.db.get_client_by_name(name).await {
                        self.db.touch_client_connected(client.id).await.ok();
                        publish_event(
                            &self.db,
                            &self.bus,
                            Event::new(EventKind::DownloaderConnected, SubjectType::DownloadClient)
                                .subject(client.id)
                                .message(format!("connected to {}", name)),
                        )
                        .await;
                    }
                }
                Err(e) => {
                    tracing::warn!(client = %name, error = %e, "download client connection failed");
                }
            }
        }

        for (name, adapter) in &self.apps {
            match adapter.test_connection().await {
                Ok(()) => {
                    if let Ok(Some(app)) = self.db.get_app_by_name(name).await {
                        publish_event(
                            &self.db,
                            &self.bus,
                            Event::new(EventKind::AppConnected, SubjectType::App)
                                .subject(app.id)
                                .for_app(name.clone())
                                .message(format!("connected to {}", name)),
                        )
                        .await;
                    }
                }
                Err(e) => {
                    tracing::warn!(app = %name, error = %e, "app connection failed");
                }
            }
        }
    }

    fn spawn_event_pruner(&self) -> tokio::task::JoinHandle<()> {
        let db = Arc::clone(&self.db);
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PRUNE_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        match db.prune_events(EVENT_RETENTION).await {
                            Ok(0) => {}
                            Ok(removed) => tracing::debug!(removed, "pruned event history"),
                            Err(e) => tracing::warn!(error = %e, "event pruning failed"),
                        }
                    }
                }
            }
        })
    }

    /// Graceful shutdown: quiet the backends, cancel, wait, release
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("shutting down");

        for backend in self.backends.values() {
            backend.prepare_shutdown();
        }
        self.cancel.cancel();

        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            if tokio::time::timeout(std::time::Duration::from_secs(15), handle)
                .await
                .is_err()
            {
                tracing::warn!("a controller did not stop before the shutdown timeout");
            }
        }

        for backend in self.backends.values() {
            backend.close().await;
        }
        self.db.close().await;

        tracing::info!("shutdown complete");
        Ok(())
    }
}

/// Mirror the configured clients and apps into the store
///
/// Rows are matched by unique name; entries that disappeared from the
/// configuration are soft-deleted so their history survives.
async fn sync_config_entities(db: &Database, config: &Config) -> Result<()> {
    let mut client_names = Vec::new();
    for (name, downloader) in &config.downloaders {
        client_names.push(name.clone());
        db.upsert_client(&NewClient {
            name: name.clone(),
            kind: downloader.kind.as_str().to_string(),
            url: downloader.url.clone(),
            username: downloader.username.clone(),
            password: downloader.password.clone(),
            ssh_host: downloader.ssh.host.clone(),
            ssh_port: i64::from(downloader.ssh.port),
            ssh_user: downloader.ssh.user.clone(),
            ssh_key_file: downloader
                .ssh
                .key_file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            enabled: downloader.enabled,
        })
        .await?;
    }
    db.retire_clients_except(&client_names).await?;

    let mut app_names = Vec::new();
    for (name, app) in &config.apps {
        app_names.push(name.clone());
        db.upsert_app(&NewApp {
            name: name.clone(),
            kind: app.kind.as_str().to_string(),
            url: app.url.clone(),
            api_key: app.api_key.clone(),
            category: app.category.clone(),
            downloads_path: app
                .downloads_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            cleanup_on_category_change: app.cleanup_on_category_change,
            cleanup_on_remove: app.cleanup_on_remove,
            enabled: app.enabled,
        })
        .await?;
    }
    db.retire_apps_except(&app_names).await?;

    Ok(())
}
