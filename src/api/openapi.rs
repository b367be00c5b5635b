//! OpenAPI document for the read-only API.

use utoipa::OpenApi;

use super::routes;

/// OpenAPI 3.1 document covering every endpoint
#[derive(OpenApi)]
#[openapi(
    info(
        title = "seedreap API",
        description = "Read-only projections of the seedbox sync pipeline",
        license(name = "MIT OR Apache-2.0")
    ),
    paths(
        routes::system::health_check,
        routes::system::stats,
        routes::system::list_events,
        routes::system::event_stream,
        routes::system::speed_history,
        routes::downloads::list_downloads,
        routes::downloads::get_download,
        routes::downloaders::list_downloaders,
        routes::apps::list_apps,
    ),
    components(schemas(
        routes::StatsResponse,
        routes::EventView,
        routes::DownloadSummary,
        routes::DownloadDetail,
        routes::FileView,
        routes::SyncJobView,
        routes::MoveJobView,
        routes::AppJobView,
        routes::DownloaderView,
        routes::AppView,
        crate::api::error_response::ErrorBody,
        crate::sync::SpeedSample,
        crate::types::Id,
        crate::types::TorrentState,
        crate::types::SyncStatus,
        crate::types::SyncFileStatus,
        crate::types::MoveStatus,
        crate::types::AppJobStatus,
        crate::types::TrackedState,
    )),
    tags(
        (name = "system", description = "Health, stats, events"),
        (name = "downloads", description = "Download pipeline views"),
        (name = "downloaders", description = "Configured clients"),
        (name = "apps", description = "Configured apps"),
    )
)]
pub struct ApiDoc;
