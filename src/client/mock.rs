//! Scripted download-client double for tests.
//!
//! Keeps an in-memory torrent table that test code mutates between poll
//! cycles; the poller observes the changes exactly as it would against a
//! live seedbox. Failure modes can be injected per capability.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::ClientError;
use crate::types::TorrentState;

use super::{TorrentClient, TorrentFile, TorrentInfo, normalize_state};

/// Injected failure mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockFailure {
    /// Credentials rejected
    Auth,
    /// Client unreachable
    Network,
}

impl MockFailure {
    fn to_error(self) -> ClientError {
        match self {
            MockFailure::Auth => ClientError::Auth("mock credentials rejected".to_string()),
            MockFailure::Network => ClientError::Network("mock client unreachable".to_string()),
        }
    }
}

#[derive(Default)]
struct MockState {
    torrents: BTreeMap<String, TorrentInfo>,
    files: BTreeMap<String, Vec<TorrentFile>>,
    raw_states: BTreeMap<String, String>,
    fail_connect: Option<MockFailure>,
    fail_list: Option<MockFailure>,
    list_calls: u64,
}

/// In-memory torrent client for tests
#[derive(Clone, Default)]
pub struct MockTorrentClient {
    state: Arc<Mutex<MockState>>,
}

impl MockTorrentClient {
    /// Create an empty mock client
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Add (or replace) a torrent together with its file list
    pub fn upsert_torrent(&self, info: TorrentInfo, files: Vec<TorrentFile>) {
        let mut state = self.lock();
        state.files.insert(info.remote_id.clone(), files);
        state.torrents.insert(info.remote_id.clone(), info);
    }

    /// Remove a torrent, as if deleted on the seedbox
    pub fn remove_torrent(&self, remote_id: &str) {
        let mut state = self.lock();
        state.torrents.remove(remote_id);
        state.files.remove(remote_id);
        state.raw_states.remove(remote_id);
    }

    /// Set the raw state string and overall progress of a torrent
    ///
    /// The normalised state is recomputed with the same rules as a real
    /// adapter.
    pub fn set_state(&self, remote_id: &str, raw_state: &str, progress: f64) {
        let mut state = self.lock();
        state
            .raw_states
            .insert(remote_id.to_string(), raw_state.to_string());
        if let Some(info) = state.torrents.get_mut(remote_id) {
            info.progress = progress;
            info.downloaded_bytes = (info.size_bytes as f64 * progress.clamp(0.0, 1.0)) as i64;
            info.state = normalize_state(raw_state, progress);
        }
    }

    /// Change a torrent's category
    pub fn set_category(&self, remote_id: &str, category: &str) {
        if let Some(info) = self.lock().torrents.get_mut(remote_id) {
            info.category = category.to_string();
        }
    }

    /// Set one file's progress; recomputes the torrent-level aggregate
    pub fn set_file_progress(&self, remote_id: &str, relative_path: &str, progress: f64) {
        let mut state = self.lock();
        let Some(files) = state.files.get_mut(remote_id) else {
            return;
        };
        for file in files.iter_mut() {
            if file.relative_path == relative_path {
                file.progress = progress;
            }
        }

        let (size, downloaded): (i64, i64) = files.iter().fold((0, 0), |(s, d), f| {
            (s + f.size_bytes, d + f.downloaded_bytes())
        });
        let overall = if size > 0 {
            downloaded as f64 / size as f64
        } else {
            0.0
        };

        let raw = state
            .raw_states
            .get(remote_id)
            .cloned()
            .unwrap_or_else(|| "downloading".to_string());
        if let Some(info) = state.torrents.get_mut(remote_id) {
            info.downloaded_bytes = downloaded;
            info.progress = overall;
            info.state = normalize_state(&raw, overall);
        }
    }

    /// Mark the whole torrent (and every file) complete
    pub fn complete_torrent(&self, remote_id: &str) {
        {
            let mut state = self.lock();
            if let Some(files) = state.files.get_mut(remote_id) {
                for file in files.iter_mut() {
                    file.progress = 1.0;
                }
            }
        }
        self.set_state(remote_id, "uploading", 1.0);
    }

    /// Inject a connect failure (None clears it)
    pub fn fail_connect(&self, failure: Option<MockFailure>) {
        self.lock().fail_connect = failure;
    }

    /// Inject a list/get failure (None clears it)
    pub fn fail_list(&self, failure: Option<MockFailure>) {
        self.lock().fail_list = failure;
    }

    /// Number of list calls observed
    pub fn list_calls(&self) -> u64 {
        self.lock().list_calls
    }
}

#[async_trait]
impl TorrentClient for MockTorrentClient {
    async fn connect(&self) -> Result<(), ClientError> {
        if let Some(failure) = self.lock().fail_connect {
            return Err(failure.to_error());
        }
        Ok(())
    }

    async fn list_downloads(
        &self,
        categories: Option<&[String]>,
    ) -> Result<Vec<TorrentInfo>, ClientError> {
        let mut state = self.lock();
        state.list_calls += 1;
        if let Some(failure) = state.fail_list {
            return Err(failure.to_error());
        }

        let mut torrents: Vec<TorrentInfo> = state.torrents.values().cloned().collect();
        if let Some(categories) = categories {
            if !categories.is_empty() {
                torrents.retain(|t| categories.iter().any(|c| c == &t.category));
            }
        }
        Ok(torrents)
    }

    async fn get_download(&self, remote_id: &str) -> Result<TorrentInfo, ClientError> {
        let state = self.lock();
        if let Some(failure) = state.fail_list {
            return Err(failure.to_error());
        }
        state
            .torrents
            .get(remote_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(remote_id.to_string()))
    }

    async fn get_files(&self, remote_id: &str) -> Result<Vec<TorrentFile>, ClientError> {
        let state = self.lock();
        if let Some(failure) = state.fail_list {
            return Err(failure.to_error());
        }
        state
            .files
            .get(remote_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(remote_id.to_string()))
    }
}

/// Convenience constructor for a torrent fixture
///
/// Starts as `downloading` at zero progress; drive it with the mutators.
pub fn torrent_fixture(remote_id: &str, name: &str, category: &str, size_bytes: i64) -> TorrentInfo {
    TorrentInfo {
        remote_id: remote_id.to_string(),
        name: name.to_string(),
        category: category.to_string(),
        state: TorrentState::Downloading,
        progress: 0.0,
        size_bytes,
        downloaded_bytes: 0,
        save_path: "/seedbox/downloads".to_string(),
        content_path: format!("/seedbox/downloads/{}", name),
    }
}
