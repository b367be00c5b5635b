//! Multi-stream SFTP transfer backend over ssh2.
//!
//! Each transfer splits the file into contiguous ranges and fans out to
//! worker threads, one SSH session per stream. Sessions are pooled and
//! reused across transfers; a failed stream's session is considered
//! poisoned and dropped. ssh2 is a blocking library, so every stream runs
//! under `spawn_blocking` and polls its cancellation token between
//! chunks.

use std::io::{Read, Seek, SeekFrom, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;
use crate::retry::{RetryPolicy, with_retry};
use crate::speed_limiter::SpeedLimiter;

use super::{ProgressFn, TransferBackend, TransferRequest};

/// Read chunk per round trip
const CHUNK_SIZE: usize = 256 * 1024;

/// Below this size a file is not worth splitting across streams
const MIN_STREAM_BYTES: u64 = 4 * 1024 * 1024;

/// Connection parameters for one seedbox
#[derive(Clone, Debug)]
pub struct SftpOptions {
    /// SSH host
    pub host: String,
    /// SSH port
    pub port: u16,
    /// SSH user
    pub user: String,
    /// Private key file; ssh-agent is tried when absent
    pub key_file: Option<PathBuf>,
    /// known_hosts file; host key verification is skipped when absent
    pub known_hosts_file: Option<PathBuf>,
    /// Skip host key verification entirely
    pub ignore_host_key: bool,
    /// Dial timeout (also applied to blocking SSH operations)
    pub timeout: Duration,
}

/// SFTP transfer backend with parallel streams and a session pool
pub struct SftpTransferBackend {
    options: SftpOptions,
    parallel_streams: usize,
    limiter: SpeedLimiter,
    retry: RetryPolicy,
    pool: Arc<Mutex<Vec<ssh2::Session>>>,
    quiet: Arc<AtomicBool>,
}

impl SftpTransferBackend {
    /// Build a backend for one seedbox
    pub fn new(options: SftpOptions, parallel_streams: usize, limiter: SpeedLimiter) -> Self {
        Self {
            options,
            parallel_streams: parallel_streams.max(1),
            limiter,
            retry: RetryPolicy::default(),
            pool: Arc::new(Mutex::new(Vec::new())),
            quiet: Arc::new(AtomicBool::new(false)),
        }
    }

    fn checkout(&self) -> Option<ssh2::Session> {
        self.pool.lock().ok().and_then(|mut pool| pool.pop())
    }

    /// A pooled session, or a fresh dial with retry on transient failures
    async fn session(&self) -> Result<ssh2::Session, TransferError> {
        if let Some(session) = self.checkout() {
            return Ok(session);
        }

        let options = self.options.clone();
        with_retry(&self.retry, move || {
            let options = options.clone();
            async move {
                tokio::task::spawn_blocking(move || dial(&options))
                    .await
                    .map_err(|e| TransferError::ConnectionFailed(e.to_string()))?
            }
        })
        .await
    }
}

#[async_trait]
impl TransferBackend for SftpTransferBackend {
    async fn transfer(&self, request: TransferRequest) -> Result<(), TransferError> {
        if request.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        // Pre-size the destination so every stream can write at its offset
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&request.local_path)
            .await
            .map_err(|e| {
                TransferError::LocalFile(format!("{}: {}", request.local_path.display(), e))
            })?;
        file.set_len(request.size_bytes)
            .await
            .map_err(|e| TransferError::LocalFile(e.to_string()))?;
        drop(file);

        if request.size_bytes == 0 {
            (request.progress)(0);
            return Ok(());
        }

        let ranges = split_ranges(request.size_bytes, self.parallel_streams);

        let mut sessions = Vec::with_capacity(ranges.len());
        for _ in 0..ranges.len() {
            sessions.push(self.session().await?);
        }

        // One shared child token: a failed stream cancels its siblings
        let stream_cancel = request.cancel.child_token();

        let mut handles = Vec::with_capacity(ranges.len());
        for ((offset, len), session) in ranges.into_iter().zip(sessions) {
            let remote_path = request.remote_path.clone();
            let local_path = request.local_path.clone();
            let cancel = stream_cancel.clone();
            let limiter = self.limiter.clone();
            let progress = Arc::clone(&request.progress);
            let pool = Arc::clone(&self.pool);

            handles.push(tokio::task::spawn_blocking(move || {
                let result = run_stream(StreamJob {
                    session: &session,
                    remote_path: &remote_path,
                    local_path: &local_path,
                    offset,
                    len,
                    cancel: &cancel,
                    limiter: &limiter,
                    progress: &progress,
                });
                match result {
                    Ok(()) => {
                        // Healthy session goes back to the pool
                        if let Ok(mut pool) = pool.lock() {
                            pool.push(session);
                        }
                        Ok(())
                    }
                    Err(e) => {
                        // Poisoned session is dropped; stop the siblings
                        if !matches!(e, TransferError::Cancelled) {
                            cancel.cancel();
                        }
                        Err(e)
                    }
                }
            }));
        }

        let mut first_error: Option<TransferError> = None;
        let mut saw_cancelled = false;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(TransferError::Cancelled)) => saw_cancelled = true,
                Ok(Err(e)) => first_error = first_error.or(Some(e)),
                Err(join_err) => {
                    first_error =
                        first_error.or(Some(TransferError::Protocol(join_err.to_string())));
                }
            }
        }

        if let Some(e) = first_error {
            if !self.quiet.load(Ordering::Relaxed) {
                tracing::warn!(
                    remote = %request.remote_path,
                    error = %e,
                    "sftp transfer failed"
                );
            }
            return Err(e);
        }
        if saw_cancelled || request.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        Ok(())
    }

    fn prepare_shutdown(&self) {
        self.quiet.store(true, Ordering::Relaxed);
    }

    async fn close(&self) {
        let sessions: Vec<ssh2::Session> = match self.pool.lock() {
            Ok(mut pool) => pool.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        if sessions.is_empty() {
            return;
        }
        tokio::task::spawn_blocking(move || {
            for session in sessions {
                session.disconnect(None, "shutting down", None).ok();
            }
        })
        .await
        .ok();
    }
}

struct StreamJob<'a> {
    session: &'a ssh2::Session,
    remote_path: &'a str,
    local_path: &'a std::path::Path,
    offset: u64,
    len: u64,
    cancel: &'a CancellationToken,
    limiter: &'a SpeedLimiter,
    progress: &'a ProgressFn,
}

/// Copy one contiguous range of the remote file (blocking)
fn run_stream(job: StreamJob<'_>) -> Result<(), TransferError> {
    let sftp = job
        .session
        .sftp()
        .map_err(|e| TransferError::ConnectionFailed(format!("sftp channel: {}", e)))?;

    let mut remote = sftp
        .open(std::path::Path::new(job.remote_path))
        .map_err(|e| TransferError::RemoteFile(format!("{}: {}", job.remote_path, e)))?;
    remote
        .seek(SeekFrom::Start(job.offset))
        .map_err(|e| TransferError::RemoteFile(e.to_string()))?;

    let mut local = std::fs::OpenOptions::new()
        .write(true)
        .open(job.local_path)
        .map_err(|e| TransferError::LocalFile(format!("{}: {}", job.local_path.display(), e)))?;
    local
        .seek(SeekFrom::Start(job.offset))
        .map_err(|e| TransferError::LocalFile(e.to_string()))?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = job.len;

    while remaining > 0 {
        if job.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = remote
            .read(&mut buf[..want])
            .map_err(|e| TransferError::Protocol(format!("read: {}", e)))?;
        if n == 0 {
            return Err(TransferError::Protocol(format!(
                "unexpected EOF with {} bytes remaining",
                remaining
            )));
        }

        local
            .write_all(&buf[..n])
            .map_err(|e| TransferError::LocalFile(e.to_string()))?;

        job.limiter.acquire_blocking(n as u64);
        (job.progress)(n as u64);
        remaining -= n as u64;
    }

    local
        .flush()
        .map_err(|e| TransferError::LocalFile(e.to_string()))?;
    Ok(())
}

/// Establish, verify, and authenticate one SSH session (blocking)
fn dial(options: &SftpOptions) -> Result<ssh2::Session, TransferError> {
    let addr = (options.host.as_str(), options.port)
        .to_socket_addrs()
        .map_err(|e| TransferError::ConnectionFailed(format!("resolve {}: {}", options.host, e)))?
        .next()
        .ok_or_else(|| {
            TransferError::ConnectionFailed(format!("no address for {}", options.host))
        })?;

    let tcp = TcpStream::connect_timeout(&addr, options.timeout)
        .map_err(|e| TransferError::ConnectionFailed(format!("connect {}: {}", addr, e)))?;

    let mut session = ssh2::Session::new()
        .map_err(|e| TransferError::ConnectionFailed(format!("session init: {}", e)))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(options.timeout.as_millis() as u32);
    session
        .handshake()
        .map_err(|e| TransferError::ConnectionFailed(format!("handshake: {}", e)))?;

    verify_host_key(&session, options)?;
    authenticate(&session, options)?;

    Ok(session)
}

fn verify_host_key(session: &ssh2::Session, options: &SftpOptions) -> Result<(), TransferError> {
    if options.ignore_host_key {
        return Ok(());
    }
    let Some(path) = &options.known_hosts_file else {
        tracing::debug!(host = %options.host, "no known_hosts file configured, skipping host key check");
        return Ok(());
    };

    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| TransferError::HostKey(e.to_string()))?;
    known_hosts
        .read_file(path, ssh2::KnownHostFileKind::OpenSSH)
        .map_err(|e| TransferError::HostKey(format!("{}: {}", path.display(), e)))?;

    let (key, _key_type) = session
        .host_key()
        .ok_or_else(|| TransferError::HostKey("server sent no host key".to_string()))?;

    use ssh2::CheckResult;
    match known_hosts.check_port(&options.host, options.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::NotFound => Err(TransferError::HostKey(format!(
            "{} is not in the known hosts file",
            options.host
        ))),
        CheckResult::Mismatch => Err(TransferError::HostKey(format!(
            "host key for {} does not match the known hosts file",
            options.host
        ))),
        CheckResult::Failure => Err(TransferError::HostKey("host key check failed".to_string())),
    }
}

fn authenticate(session: &ssh2::Session, options: &SftpOptions) -> Result<(), TransferError> {
    if let Some(key_file) = &options.key_file {
        session
            .userauth_pubkey_file(&options.user, None, key_file, None)
            .map_err(|e| {
                TransferError::ConnectionFailed(format!(
                    "key auth with {}: {}",
                    key_file.display(),
                    e
                ))
            })?;
    } else {
        let mut agent = session
            .agent()
            .map_err(|e| TransferError::ConnectionFailed(format!("agent: {}", e)))?;
        agent
            .connect()
            .map_err(|e| TransferError::ConnectionFailed(format!("agent connect: {}", e)))?;
        agent
            .list_identities()
            .map_err(|e| TransferError::ConnectionFailed(format!("agent identities: {}", e)))?;

        let identities = agent
            .identities()
            .map_err(|e| TransferError::ConnectionFailed(format!("agent identities: {}", e)))?;
        let accepted = identities
            .iter()
            .any(|identity| agent.userauth(&options.user, identity).is_ok());
        if !accepted {
            return Err(TransferError::ConnectionFailed(
                "no ssh-agent identity was accepted".to_string(),
            ));
        }
    }

    if !session.authenticated() {
        return Err(TransferError::ConnectionFailed(
            "authentication did not complete".to_string(),
        ));
    }
    Ok(())
}

/// Split `size` bytes into at most `streams` contiguous (offset, len) ranges
fn split_ranges(size: u64, streams: usize) -> Vec<(u64, u64)> {
    let streams = streams.max(1) as u64;
    let count = (size / MIN_STREAM_BYTES).clamp(1, streams);
    let base = size / count;
    let remainder = size % count;

    let mut ranges = Vec::with_capacity(count as usize);
    let mut offset = 0;
    for i in 0..count {
        // Spread the remainder over the first ranges
        let len = base + u64::from(i < remainder);
        ranges.push((offset, len));
        offset += len;
    }
    ranges
}
