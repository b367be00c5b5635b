//! # seedreap
//!
//! Library-first daemon that mirrors completed torrents from remote
//! seedboxes into a local media library: it polls download clients,
//! transfers finished files over multi-stream SFTP into a staging tree,
//! promotes them atomically into the destination tree, and asks
//! Sonarr/Radarr-style apps to import them.
//!
//! ## Design Philosophy
//!
//! - **Event-driven** - one periodic poller; every other controller
//!   reacts to typed events and re-reads the store
//! - **Store-coordinated** - all durable state lives in SQLite; events
//!   signal, the database decides
//! - **Library-first** - no CLI or UI, purely a Rust crate for embedding
//! - **Contained failure** - one broken seedbox, torrent, or app never
//!   stalls the rest of the pipeline
//!
//! ## Quick Start
//!
//! ```no_run
//! use seedreap::{Config, Seedreap, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(Some(std::path::Path::new("seedreap.yaml"))).await?;
//!
//!     let engine = Seedreap::new(config).await?;
//!     engine.start().await?;
//!
//!     // Subscribe to events
//!     let mut events = engine.subscribe(&[]);
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("{}: {}", event.kind, event.message);
//!         }
//!     });
//!
//!     run_with_shutdown(engine).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Read-only REST API
pub mod api;
/// Media-app adapters (Sonarr, Radarr, passthrough)
pub mod apps;
/// Download-client adapters (qBittorrent, mock)
pub mod client;
/// Configuration types and loading
pub mod config;
/// SQLite store
pub mod db;
/// The engine: wiring, startup, shutdown
pub mod engine;
/// Error types
pub mod error;
/// Typed event bus and the event vocabulary
pub mod events;
/// Filesystem layout and tree operations
pub mod fsops;
/// Move controller (staging → destination promotion)
pub mod mover;
/// App-notify controller
pub mod notifier;
/// Download controller (client polling)
pub mod poller;
/// Retry logic with exponential backoff
pub mod retry;
/// Transfer speed limiting
pub mod speed_limiter;
/// File-sync controller and throughput sampling
pub mod sync;
/// Tracked-download projector
pub mod tracker;
/// Transfer backends (SFTP, local)
pub mod transfer;
/// Core types and identifiers
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use engine::{Seedreap, SeedreapBuilder};
pub use error::{AppError, ClientError, Error, Result, StoreError, TransferError};
pub use events::{Event, EventBus, EventKind, SubjectType, Subscription};
pub use types::{
    AppJobStatus, AppKind, ClientKind, Id, MoveStatus, SyncFileStatus, SyncStatus, TorrentState,
    TrackedState,
};

/// Helper function to run the engine with graceful signal handling.
///
/// Waits for a termination signal and then calls the engine's
/// `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(engine: Seedreap) -> Result<()> {
    wait_for_signal().await;
    engine.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM");
                }
                _ = sigint.recv() => {
                    tracing::info!("received SIGINT (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("received SIGINT (Ctrl+C)");
            } else {
                tracing::error!("could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("received SIGTERM");
            } else {
                tracing::error!("could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("received Ctrl+C");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
        }
    }
}
