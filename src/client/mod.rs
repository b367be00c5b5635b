//! Download-client adapters
//!
//! The poller talks to seedboxes through the [`TorrentClient`] capability:
//! list every tracked torrent, fetch one, fetch its file list. Two
//! implementations are provided: [`qbittorrent::QbitClient`] for the
//! qBittorrent WebUI API v2, and [`mock::MockTorrentClient`], a scripted
//! double for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ClientError;
use crate::types::TorrentState;

pub mod mock;
pub mod qbittorrent;

pub use mock::MockTorrentClient;
pub use qbittorrent::QbitClient;

/// One torrent as reported by a download client
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TorrentInfo {
    /// Client-assigned identity (info hash)
    pub remote_id: String,
    /// Display name
    pub name: String,
    /// Category label (empty = uncategorized)
    pub category: String,
    /// Normalised state
    pub state: TorrentState,
    /// Progress (0.0 to 1.0)
    pub progress: f64,
    /// Total size in bytes
    pub size_bytes: i64,
    /// Downloaded bytes
    pub downloaded_bytes: i64,
    /// Directory the torrent's relative paths resolve against
    pub save_path: String,
    /// Root path of the torrent's content (file or directory)
    pub content_path: String,
}

/// One file within a torrent as reported by a download client
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TorrentFile {
    /// Path relative to the torrent's save path
    pub relative_path: String,
    /// Size in bytes
    pub size_bytes: i64,
    /// Per-file progress (0.0 to 1.0)
    pub progress: f64,
    /// Client priority; 0 means the user excluded the file
    pub priority: i64,
}

impl TorrentFile {
    /// Downloaded bytes derived from size and progress
    pub fn downloaded_bytes(&self) -> i64 {
        (self.size_bytes as f64 * self.progress.clamp(0.0, 1.0)) as i64
    }
}

/// Capability exposed to the download controller
#[async_trait]
pub trait TorrentClient: Send + Sync {
    /// Establish and validate credentials
    async fn connect(&self) -> Result<(), ClientError>;

    /// Every tracked torrent, optionally filtered to the given categories
    async fn list_downloads(
        &self,
        categories: Option<&[String]>,
    ) -> Result<Vec<TorrentInfo>, ClientError>;

    /// One torrent by identity, or [`ClientError::NotFound`]
    async fn get_download(&self, remote_id: &str) -> Result<TorrentInfo, ClientError>;

    /// The torrent's file list with sizes, per-file progress, and priority
    async fn get_files(&self, remote_id: &str) -> Result<Vec<TorrentFile>, ClientError>;
}

/// Collapse a client-specific state string to the four-value state
///
/// Rules, in order:
/// 1. progress ≥ 1.0 forces `complete` regardless of the string —
///    seedboxes report `uploading` (seeding) or even `paused` for a
///    finished download;
/// 2. explicit error / missing-files strings map to `error`;
/// 3. a paused/stopped string with progress < 1.0 is `paused`;
/// 4. everything else defaults to `downloading`.
pub fn normalize_state(raw: &str, progress: f64) -> TorrentState {
    if progress >= 1.0 {
        return TorrentState::Complete;
    }

    let lowered = raw.to_ascii_lowercase();
    if lowered.contains("error") || lowered.contains("missingfiles") {
        return TorrentState::Error;
    }
    if lowered.contains("paused") || lowered.contains("stopped") {
        return TorrentState::Paused;
    }

    TorrentState::Downloading
}
