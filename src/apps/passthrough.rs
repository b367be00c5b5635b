//! Passthrough app: a zero-op participant.
//!
//! Lets a category ride the pipeline (sync, move, tracking) without
//! notifying any external system.

use async_trait::async_trait;
use std::path::Path;

use crate::error::AppError;

use super::MediaApp;

/// No-op app adapter; every call succeeds immediately
pub struct PassthroughApp;

#[async_trait]
impl MediaApp for PassthroughApp {
    async fn trigger_import(&self, path: &Path) -> Result<(), AppError> {
        tracing::debug!(path = %path.display(), "passthrough import, nothing to do");
        Ok(())
    }

    async fn test_connection(&self) -> Result<(), AppError> {
        Ok(())
    }
}
