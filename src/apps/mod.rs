//! Media-app adapters
//!
//! The notify controller asks downstream apps to import a finished path
//! through the [`MediaApp`] capability. Sonarr and Radarr share one REST
//! implementation (they differ only in the command name); `passthrough`
//! participates in the pipeline without calling anything.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AppError;
use crate::types::AppKind;

pub mod arr;
pub mod passthrough;

pub use arr::ArrApp;
pub use passthrough::PassthroughApp;

/// Capability exposed to the app-notify controller
///
/// Adapters carry no state between calls.
#[async_trait]
pub trait MediaApp: Send + Sync {
    /// Request a media scan of `path`
    async fn trigger_import(&self, path: &Path) -> Result<(), AppError>;

    /// Validate endpoint and credentials
    async fn test_connection(&self) -> Result<(), AppError>;
}

/// Build the adapter for a configured app
pub fn build_app(
    kind: AppKind,
    url: &str,
    api_key: &str,
    timeout: Duration,
) -> Result<Arc<dyn MediaApp>, AppError> {
    Ok(match kind {
        AppKind::Sonarr | AppKind::Radarr => Arc::new(ArrApp::new(kind, url, api_key, timeout)?),
        AppKind::Passthrough => Arc::new(PassthroughApp),
    })
}
