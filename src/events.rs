//! Typed event bus and the event vocabulary
//!
//! In-process publish/subscribe used by the controllers. Each subscriber
//! registers interest in a set of [`EventKind`]s and receives matching
//! events over its own bounded FIFO queue. Publication never blocks the
//! publisher: when a subscriber's queue is full, that subscriber's copy of
//! the event is dropped and its drop counter incremented. There is no
//! back-pressure to producers — the store is the authoritative state, the
//! bus only signals.
//!
//! Ordering: events from a single publisher are observed by a single
//! subscriber in publish order. No cross-publisher guarantee is made; all
//! cross-controller coordination happens through the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use utoipa::ToSchema;

use crate::types::Id;

/// Default per-subscriber queue capacity
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Closed set of event types
///
/// The string forms are wire-stable: they are persisted in the event
/// history table and exposed over the API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The process started
    SystemStarted,
    /// A download client connection was validated
    DownloaderConnected,
    /// A media app connection was validated
    AppConnected,
    /// A torrent appeared on a client for the first time
    DownloadDiscovered,
    /// A tracked torrent changed (progress, size, paths)
    DownloadUpdated,
    /// A tracked torrent was paused on the client
    DownloadPaused,
    /// A paused torrent resumed downloading
    DownloadResumed,
    /// A tracked torrent finished downloading on the client
    DownloadComplete,
    /// The client reports the torrent as errored
    DownloadError,
    /// A tracked torrent disappeared from the client
    DownloadRemoved,
    /// A torrent's category changed on the client
    CategoryChanged,
    /// A file within a torrent finished downloading remotely
    FileCompleted,
    /// A sync job row was created
    SyncJobCreated,
    /// A sync file row was created
    SyncFileCreated,
    /// The first file transfer of a sync job started
    SyncStarted,
    /// A file transfer started
    SyncFileStarted,
    /// A file transfer completed
    SyncFileComplete,
    /// Every non-cancelled file of a sync job completed
    SyncComplete,
    /// A file transfer failed
    SyncFailed,
    /// A sync job was cancelled
    SyncCancelled,
    /// Promotion of a staging tree started
    MoveStarted,
    /// Promotion completed
    MoveComplete,
    /// Promotion failed
    MoveFailed,
    /// An app import notification started
    AppNotifyStarted,
    /// An app acknowledged the import notification
    AppNotifyComplete,
    /// An app import notification failed
    AppNotifyFailed,
    /// Local artifacts were removed
    Cleanup,
}

impl EventKind {
    /// All event kinds, in declaration order
    pub const ALL: [EventKind; 27] = [
        EventKind::SystemStarted,
        EventKind::DownloaderConnected,
        EventKind::AppConnected,
        EventKind::DownloadDiscovered,
        EventKind::DownloadUpdated,
        EventKind::DownloadPaused,
        EventKind::DownloadResumed,
        EventKind::DownloadComplete,
        EventKind::DownloadError,
        EventKind::DownloadRemoved,
        EventKind::CategoryChanged,
        EventKind::FileCompleted,
        EventKind::SyncJobCreated,
        EventKind::SyncFileCreated,
        EventKind::SyncStarted,
        EventKind::SyncFileStarted,
        EventKind::SyncFileComplete,
        EventKind::SyncComplete,
        EventKind::SyncFailed,
        EventKind::SyncCancelled,
        EventKind::MoveStarted,
        EventKind::MoveComplete,
        EventKind::MoveFailed,
        EventKind::AppNotifyStarted,
        EventKind::AppNotifyComplete,
        EventKind::AppNotifyFailed,
        EventKind::Cleanup,
    ];

    /// Stable dotted string form, as persisted in the event history
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SystemStarted => "system.started",
            EventKind::DownloaderConnected => "downloader.connected",
            EventKind::AppConnected => "app.connected",
            EventKind::DownloadDiscovered => "download.discovered",
            EventKind::DownloadUpdated => "download.updated",
            EventKind::DownloadPaused => "download.paused",
            EventKind::DownloadResumed => "download.resumed",
            EventKind::DownloadComplete => "download.complete",
            EventKind::DownloadError => "download.error",
            EventKind::DownloadRemoved => "download.removed",
            EventKind::CategoryChanged => "category.changed",
            EventKind::FileCompleted => "file.completed",
            EventKind::SyncJobCreated => "sync.job.created",
            EventKind::SyncFileCreated => "sync.file.created",
            EventKind::SyncStarted => "sync.started",
            EventKind::SyncFileStarted => "sync.file.started",
            EventKind::SyncFileComplete => "sync.file.complete",
            EventKind::SyncComplete => "sync.complete",
            EventKind::SyncFailed => "sync.failed",
            EventKind::SyncCancelled => "sync.cancelled",
            EventKind::MoveStarted => "move.started",
            EventKind::MoveComplete => "move.complete",
            EventKind::MoveFailed => "move.failed",
            EventKind::AppNotifyStarted => "app.notify.started",
            EventKind::AppNotifyComplete => "app.notify.complete",
            EventKind::AppNotifyFailed => "app.notify.failed",
            EventKind::Cleanup => "cleanup",
        }
    }

    /// Parse the dotted string form back to a kind
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity type an event is about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    /// Process-level event with no entity subject
    System,
    /// A configured download client
    DownloadClient,
    /// A configured media app
    App,
    /// A tracked torrent
    DownloadJob,
    /// A sync job
    SyncJob,
    /// A move job
    MoveJob,
    /// An app notification job
    AppJob,
}

impl SubjectType {
    /// Stable string form, as persisted in the event history
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::System => "system",
            SubjectType::DownloadClient => "download_client",
            SubjectType::App => "app",
            SubjectType::DownloadJob => "download_job",
            SubjectType::SyncJob => "sync_job",
            SubjectType::MoveJob => "move_job",
            SubjectType::AppJob => "app_job",
        }
    }

    /// Parse the string form back to a subject type
    pub fn parse(s: &str) -> Option<Self> {
        [
            SubjectType::System,
            SubjectType::DownloadClient,
            SubjectType::App,
            SubjectType::DownloadJob,
            SubjectType::SyncJob,
            SubjectType::MoveJob,
            SubjectType::AppJob,
        ]
        .into_iter()
        .find(|t| t.as_str() == s)
    }
}

/// One event as published on the bus and mirrored into the history table
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Event {
    /// Event type
    pub kind: EventKind,
    /// Entity type this event is about
    pub subject_type: SubjectType,
    /// Entity ID, absent for process-level events
    pub subject_id: Option<Id>,
    /// The download job this event belongs to, when one exists
    pub download_id: Option<Id>,
    /// App name for app-scoped events
    pub app: Option<String>,
    /// Human-readable one-liner for the UI timeline
    pub message: String,
    /// Free-form key→value details
    pub details: serde_json::Map<String, Value>,
    /// Publication timestamp
    pub at: DateTime<Utc>,
}

impl Event {
    /// Start building an event of the given kind and subject type
    pub fn new(kind: EventKind, subject_type: SubjectType) -> Self {
        Self {
            kind,
            subject_type,
            subject_id: None,
            download_id: None,
            app: None,
            message: String::new(),
            details: serde_json::Map::new(),
            at: Utc::now(),
        }
    }

    /// Set the subject entity ID
    pub fn subject(mut self, id: Id) -> Self {
        self.subject_id = Some(id);
        self
    }

    /// Set the owning download job ID
    pub fn download(mut self, id: Id) -> Self {
        self.download_id = Some(id);
        self
    }

    /// Set the app name
    pub fn for_app(mut self, name: impl Into<String>) -> Self {
        self.app = Some(name.into());
        self
    }

    /// Set the timeline message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Attach one detail entry
    pub fn detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Read a string detail by key
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }

    /// Read a boolean detail by key
    pub fn detail_bool(&self, key: &str) -> Option<bool> {
        self.details.get(key).and_then(Value::as_bool)
    }
}

/// Persist an event to the history table, then publish it on the bus
///
/// The store is written first: producers are the authoritative DB, the
/// bus only signals. A persistence failure is logged and the event is
/// still published so the pipeline keeps moving.
pub(crate) async fn publish_event(db: &crate::db::Database, bus: &EventBus, event: Event) {
    if let Err(e) = db.insert_event(&event).await {
        tracing::warn!(
            kind = event.kind.as_str(),
            error = %e,
            "failed to persist event to history"
        );
    }
    bus.publish(&event);
}

struct SubscriberEntry {
    name: String,
    kinds: Option<Vec<EventKind>>,
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

impl SubscriberEntry {
    fn wants(&self, kind: EventKind) -> bool {
        match &self.kinds {
            None => true,
            Some(kinds) => kinds.contains(&kind),
        }
    }
}

#[derive(Default)]
struct BusInner {
    subscribers: HashMap<u64, SubscriberEntry>,
}

/// In-process typed publish/subscribe bus
///
/// Cheap to clone; all clones publish to and subscribe from the same set
/// of queues. Created once per engine, torn down with it.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
    next_id: Arc<AtomicU64>,
    dropped_total: Arc<AtomicU64>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a set of event kinds with the default queue capacity
    ///
    /// An empty kind slice subscribes to every kind. The returned
    /// [`Subscription`] unsubscribes (draining and closing its queue)
    /// when dropped.
    pub fn subscribe(&self, name: &str, kinds: &[EventKind]) -> Subscription {
        self.subscribe_with_capacity(name, kinds, DEFAULT_QUEUE_CAPACITY)
    }

    /// Subscribe with an explicit queue capacity
    pub fn subscribe_with_capacity(
        &self,
        name: &str,
        kinds: &[EventKind],
        capacity: usize,
    ) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let entry = SubscriberEntry {
            name: name.to_string(),
            kinds: if kinds.is_empty() {
                None
            } else {
                Some(kinds.to_vec())
            },
            tx,
            dropped: dropped.clone(),
        };

        match self.inner.lock() {
            Ok(mut inner) => {
                inner.subscribers.insert(id, entry);
            }
            Err(poisoned) => {
                poisoned.into_inner().subscribers.insert(id, entry);
            }
        }

        Subscription {
            rx,
            guard: SubscriptionGuard {
                id,
                bus: self.inner.clone(),
                dropped,
            },
        }
    }

    /// Publish an event to every interested subscriber
    ///
    /// Never blocks. Subscribers with full queues lose this event and have
    /// their drop counter incremented; subscribers whose receiving half is
    /// gone are pruned.
    pub fn publish(&self, event: &Event) {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut closed = Vec::new();
        for (id, entry) in inner.subscribers.iter() {
            if !entry.wants(event.kind) {
                continue;
            }
            match entry.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    entry.dropped.fetch_add(1, Ordering::Relaxed);
                    self.dropped_total.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        subscriber = %entry.name,
                        kind = event.kind.as_str(),
                        "subscriber queue full, event dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed.push(*id);
                }
            }
        }
        for id in closed {
            inner.subscribers.remove(&id);
        }
    }

    /// Total events dropped across all subscribers since startup
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        match self.inner.lock() {
            Ok(inner) => inner.subscribers.len(),
            Err(poisoned) => poisoned.into_inner().subscribers.len(),
        }
    }
}

/// Unregisters the subscriber entry when dropped
struct SubscriptionGuard {
    id: u64,
    bus: Arc<Mutex<BusInner>>,
    dropped: Arc<AtomicU64>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let mut inner = match self.bus.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.subscribers.remove(&self.id);
    }
}

/// A registered subscription; receives matching events in publish order
pub struct Subscription {
    rx: mpsc::Receiver<Event>,
    guard: SubscriptionGuard,
}

impl Subscription {
    /// Receive the next matching event
    ///
    /// Returns `None` once the bus side has been dropped and the queue is
    /// drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Receive without waiting
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Events dropped for this subscriber because its queue was full
    pub fn dropped(&self) -> u64 {
        self.guard.dropped.load(Ordering::Relaxed)
    }

    /// Convert into a stream of events (for SSE plumbing)
    ///
    /// The subscription stays registered until the stream is dropped.
    pub fn into_stream(self) -> EventStream {
        let Subscription { rx, guard } = self;
        EventStream {
            inner: tokio_stream::wrappers::ReceiverStream::new(rx),
            _guard: guard,
        }
    }
}

/// Stream adapter over a subscription (see [`Subscription::into_stream`])
pub struct EventStream {
    inner: tokio_stream::wrappers::ReceiverStream<Event>,
    _guard: SubscriptionGuard,
}

impl futures::Stream for EventStream {
    type Item = Event;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Event>> {
        std::pin::Pin::new(&mut self.inner).poll_next(cx)
    }
}
