//! Transfer backends
//!
//! The file-sync controller copies one remote path to one local path
//! through the [`TransferBackend`] capability: progress callbacks,
//! cancellation, and a quiet-shutdown hook. [`sftp::SftpTransferBackend`]
//! is the production implementation (multi-stream SFTP over ssh2);
//! [`local::LocalTransferBackend`] copies from the local filesystem and
//! serves as the test double.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;

pub mod local;
pub mod sftp;

pub use local::LocalTransferBackend;
pub use sftp::SftpTransferBackend;

/// Progress callback, invoked with the byte delta of each chunk
///
/// Called from transfer worker threads; implementations must be cheap and
/// non-blocking.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// One file transfer: remote source, local destination, bookkeeping
pub struct TransferRequest {
    /// Path on the remote side (backend-specific interpretation)
    pub remote_path: String,
    /// Local destination file; parent directories must already exist
    pub local_path: PathBuf,
    /// Expected file size in bytes
    pub size_bytes: u64,
    /// Cancellation for this transfer (child of the root token)
    pub cancel: CancellationToken,
    /// Chunk-delta progress callback
    pub progress: ProgressFn,
}

/// Capability: copy one remote path to one local path
#[async_trait]
pub trait TransferBackend: Send + Sync {
    /// Perform the transfer; blocks until done, failed, or cancelled
    async fn transfer(&self, request: TransferRequest) -> Result<(), TransferError>;

    /// Imminent-shutdown notice: quiet the backend's error logging before
    /// the cancellation token fires
    fn prepare_shutdown(&self);

    /// Release remote connections
    async fn close(&self);
}
