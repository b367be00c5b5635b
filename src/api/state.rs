//! Application state for the API server

use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::events::EventBus;
use crate::sync::SpeedSampler;

/// Shared application state accessible to all route handlers
///
/// Cloned per request (cheap Arc clones). The API is a read-only
/// projection: handlers query the store and the sampler, never mutate.
#[derive(Clone)]
pub struct AppState {
    /// Store handle
    pub db: Arc<Database>,
    /// Event bus (for the live stream endpoint)
    pub bus: EventBus,
    /// Throughput sampler
    pub sampler: SpeedSampler,
    /// Active configuration
    pub config: Arc<Config>,
}
