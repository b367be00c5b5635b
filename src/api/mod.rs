//! Read-only REST API
//!
//! Every endpoint is a projection of store state plus the speed sampler;
//! none mutate. Serves an OpenAPI document and (optionally) the Swagger
//! UI, plus a live server-sent event stream fed by the bus.

use axum::{Router, routing::get};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Build the router with every route definition
///
/// # Routes
///
/// - `GET /api/v1/health` - Health check
/// - `GET /api/v1/stats` - Pipeline statistics
/// - `GET /api/v1/downloads` - List downloads
/// - `GET /api/v1/downloads/{id}` - Download detail
/// - `GET /api/v1/downloaders` - Configured clients
/// - `GET /api/v1/apps` - Configured apps
/// - `GET /api/v1/events` - Event history
/// - `GET /api/v1/events/stream` - Live SSE stream
/// - `GET /api/v1/speed/history` - Throughput samples
/// - `GET /api/v1/openapi.json` - OpenAPI document
/// - `GET /swagger-ui` - Interactive documentation (if enabled)
pub fn create_router(state: AppState, swagger_ui: bool) -> Router {
    let mut router = Router::new()
        .route("/api/v1/health", get(routes::health_check))
        .route("/api/v1/stats", get(routes::stats))
        .route("/api/v1/downloads", get(routes::list_downloads))
        .route("/api/v1/downloads/:id", get(routes::get_download))
        .route("/api/v1/downloaders", get(routes::list_downloaders))
        .route("/api/v1/apps", get(routes::list_apps))
        .route("/api/v1/events", get(routes::list_events))
        .route("/api/v1/events/stream", get(routes::event_stream))
        .route("/api/v1/speed/history", get(routes::speed_history))
        .route(
            "/api/v1/openapi.json",
            get(|| async { axum::Json(ApiDoc::openapi()) }),
        );

    if swagger_ui {
        router = router
            .merge(SwaggerUi::new("/swagger-ui").url("/api/v1/openapi.json", ApiDoc::openapi()));
    }

    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve the API until the token fires
pub fn serve(
    state: AppState,
    listen: SocketAddr,
    swagger_ui: bool,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let router = create_router(state, swagger_ui);

        let listener = match TcpListener::bind(listen).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(listen = %listen, error = %e, "cannot bind API listener");
                return;
            }
        };

        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "API server failed");
        }
        tracing::debug!("API server stopped");
    })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
