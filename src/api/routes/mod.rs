//! Route handlers, organized by resource.

pub mod apps;
pub mod downloaders;
pub mod downloads;
pub mod system;

pub use apps::{AppView, list_apps};
pub use downloaders::{DownloaderView, list_downloaders};
pub use downloads::{
    AppJobView, DownloadDetail, DownloadSummary, FileView, MoveJobView, SyncJobView, get_download,
    list_downloads,
};
pub use system::{
    EventView, StatsResponse, event_stream, health_check, list_events, speed_history, stats,
};
