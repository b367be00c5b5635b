//! Error types for seedreap
//!
//! The taxonomy mirrors the failure model of the pipeline:
//! - configuration errors abort startup,
//! - adapter errors (auth / network / remote) are logged, surfaced as
//!   failure events, and never terminal to the pipeline,
//! - store errors abort the current unit of work only,
//! - transfer errors fail one sync file without touching its siblings,
//! - cancellation unwinds quickly and cleans up scoped resources.

use thiserror::Error;

/// Result type alias for seedreap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for seedreap
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing configuration at startup; the embedding process
    /// should exit non-zero
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable description of the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "sync.downloadsPath")
        key: Option<String>,
    },

    /// Store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// SQLx database error
    #[error("store error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Download-client adapter error
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// Media-app adapter error
    #[error("app error: {0}")]
    App(#[from] AppError),

    /// File transfer error
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation cancelled by the root shutdown token
    #[error("operation cancelled")]
    Cancelled,

    /// API server error
    #[error("API server error: {0}")]
    ApiServer(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Store-related errors
///
/// Transient errors are surfaced to callers; there is no automatic retry
/// at this layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to open or connect to the database file
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Schema migration failed
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A uniqueness or foreign-key constraint was violated
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Row not found where one was required
    #[error("row not found: {0}")]
    RowNotFound(String),
}

/// Download-client adapter errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Credentials were rejected by the remote client
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The remote client was unreachable
    #[error("network error: {0}")]
    Network(String),

    /// The remote client answered with a non-success status
    #[error("remote error (status {status}): {body}")]
    Remote {
        /// HTTP status code returned by the client
        status: u16,
        /// Response body (truncated to a reasonable length)
        body: String,
    },

    /// The requested torrent does not exist on the client
    ///
    /// Expected after removal; used as a signal, not an error.
    #[error("torrent not found: {0}")]
    NotFound(String),

    /// The client returned a payload the adapter could not parse
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl ClientError {
    /// Whether this error means the torrent is simply gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

/// Media-app adapter errors
#[derive(Debug, Error)]
pub enum AppError {
    /// The app was unreachable
    #[error("network error: {0}")]
    Network(String),

    /// The app answered with a non-success status
    #[error("remote error (status {status}): {body}")]
    Remote {
        /// HTTP status code returned by the app
        status: u16,
        /// Response body (truncated to a reasonable length)
        body: String,
    },

    /// The API key was rejected
    #[error("authentication failed: {0}")]
    Auth(String),
}

/// File transfer errors (SFTP or local I/O)
///
/// A transfer error fails the affected sync file only; other sync files
/// of the same job are unaffected.
#[derive(Debug, Error)]
pub enum TransferError {
    /// SSH/SFTP session could not be established
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The remote host key did not match the known-hosts file
    #[error("host key verification failed: {0}")]
    HostKey(String),

    /// The remote path does not exist or could not be opened
    #[error("remote file error: {0}")]
    RemoteFile(String),

    /// Local filesystem failure while writing the staged file
    #[error("local file error: {0}")]
    LocalFile(String),

    /// The transfer was cancelled before completion
    #[error("transfer cancelled")]
    Cancelled,

    /// Protocol-level SFTP failure mid-transfer
    #[error("transfer failed: {0}")]
    Protocol(String),
}

impl TransferError {
    /// Whether this error is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}
