//! Local-filesystem transfer backend.
//!
//! Interprets the remote path as a path on the local filesystem and
//! streams it to the destination in chunks, honoring cancellation and
//! progress callbacks exactly like the SFTP backend. Used as the test
//! double and for same-host setups.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::TransferError;

use super::{TransferBackend, TransferRequest};

const CHUNK_SIZE: usize = 64 * 1024;

/// Filesystem-to-filesystem transfer backend
#[derive(Default)]
pub struct LocalTransferBackend {
    fail_substrings: Mutex<HashSet<String>>,
    chunk_delay: Mutex<Option<Duration>>,
    quiet: AtomicBool,
}

impl LocalTransferBackend {
    /// Create a backend with no failure injection
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail any transfer whose remote path contains the given substring
    pub fn fail_on(&self, substring: &str) {
        if let Ok(mut set) = self.fail_substrings.lock() {
            set.insert(substring.to_string());
        }
    }

    /// Clear injected failures
    pub fn clear_failures(&self) {
        if let Ok(mut set) = self.fail_substrings.lock() {
            set.clear();
        }
    }

    /// Sleep this long after every chunk (lets tests exercise cancellation
    /// mid-transfer)
    pub fn set_chunk_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.chunk_delay.lock() {
            *slot = delay;
        }
    }

    fn injected_failure(&self, remote_path: &str) -> bool {
        self.fail_substrings
            .lock()
            .map(|set| set.iter().any(|s| remote_path.contains(s.as_str())))
            .unwrap_or(false)
    }
}

#[async_trait]
impl TransferBackend for LocalTransferBackend {
    async fn transfer(&self, request: TransferRequest) -> Result<(), TransferError> {
        if self.injected_failure(&request.remote_path) {
            return Err(TransferError::Protocol(format!(
                "injected failure for {}",
                request.remote_path
            )));
        }

        let delay = self.chunk_delay.lock().ok().and_then(|slot| *slot);

        let mut source = tokio::fs::File::open(&request.remote_path)
            .await
            .map_err(|e| TransferError::RemoteFile(format!("{}: {}", request.remote_path, e)))?;
        let mut dest = tokio::fs::File::create(&request.local_path)
            .await
            .map_err(|e| {
                TransferError::LocalFile(format!("{}: {}", request.local_path.display(), e))
            })?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            if request.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            let n = source
                .read(&mut buf)
                .await
                .map_err(|e| TransferError::RemoteFile(e.to_string()))?;
            if n == 0 {
                break;
            }

            dest.write_all(&buf[..n])
                .await
                .map_err(|e| TransferError::LocalFile(e.to_string()))?;
            (request.progress)(n as u64);

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }

        dest.flush()
            .await
            .map_err(|e| TransferError::LocalFile(e.to_string()))?;
        Ok(())
    }

    fn prepare_shutdown(&self) {
        self.quiet.store(true, Ordering::Relaxed);
    }

    async fn close(&self) {}
}
