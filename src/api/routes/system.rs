//! System handlers: health, stats, events, speed history.

use axum::Json;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use utoipa::ToSchema;

use crate::api::AppState;
use crate::api::error_response::ApiError;
use crate::sync::SpeedSample;
use crate::types::TrackedState;

/// GET /health - Health check
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "system",
    responses(
        (status = 200, description = "Service is healthy")
    )
)]
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Pipeline statistics
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatsResponse {
    /// Live downloads known to the store
    pub downloads: i64,
    /// Tracked downloads per workflow state
    pub tracked: HashMap<String, i64>,
    /// Current aggregate transfer rate in bytes per second
    pub current_speed_bps: u64,
    /// Events dropped because a subscriber queue was full
    pub events_dropped: u64,
}

/// GET /stats - Pipeline statistics
#[utoipa::path(
    get,
    path = "/api/v1/stats",
    tag = "system",
    responses(
        (status = 200, description = "Pipeline statistics", body = StatsResponse),
        (status = 500, description = "Store failure")
    )
)]
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let downloads = state.db.list_download_jobs().await?.len() as i64;
    let tracked = state
        .db
        .count_tracked_by_state()
        .await?
        .into_iter()
        .map(|(code, count)| {
            let name = serde_json::to_value(TrackedState::from_i32(code))
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| code.to_string());
            (name, count)
        })
        .collect();

    Ok(Json(StatsResponse {
        downloads,
        tracked,
        current_speed_bps: state.sampler.current_bps(),
        events_dropped: state.bus.dropped_total(),
    }))
}

/// Query options for the event history
#[derive(Debug, Deserialize)]
pub struct EventQuery {
    /// Maximum rows to return (default 100, capped at 1000)
    pub limit: Option<i64>,
    /// Restrict to one download's timeline
    pub download_id: Option<String>,
}

/// One persisted event
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EventView {
    /// Dotted event type
    pub kind: String,
    /// Timeline message
    pub message: String,
    /// Subject entity type
    pub subject_type: String,
    /// Subject entity ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    /// Owning download
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_id: Option<String>,
    /// App name for app-scoped events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    /// Details map
    pub details: serde_json::Value,
    /// Unix timestamp
    pub at: i64,
}

/// GET /events - Event history, newest first
#[utoipa::path(
    get,
    path = "/api/v1/events",
    tag = "system",
    responses(
        (status = 200, description = "Recent events", body = [EventView]),
        (status = 500, description = "Store failure")
    )
)]
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Result<Json<Vec<EventView>>, ApiError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);

    let rows = match query.download_id {
        Some(raw) => {
            let id = raw
                .parse()
                .map_err(|_| ApiError::bad_request("malformed download ID"))?;
            state.db.list_events_for_download(id, limit).await?
        }
        None => state.db.list_events(limit).await?,
    };

    Ok(Json(
        rows.into_iter()
            .map(|row| EventView {
                kind: row.kind,
                message: row.message,
                subject_type: row.subject_type,
                subject_id: row.subject_id,
                download_id: row.download_id,
                app: row.app_name,
                details: serde_json::from_str(&row.details).unwrap_or(serde_json::Value::Null),
                at: row.created_at,
            })
            .collect(),
    ))
}

/// GET /events/stream - Live server-sent event stream
#[utoipa::path(
    get,
    path = "/api/v1/events/stream",
    tag = "system",
    responses(
        (status = 200, description = "Live events (text/event-stream)", content_type = "text/event-stream")
    )
)]
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let subscription = state.bus.subscribe("sse-stream", &[]);

    let stream = subscription.into_stream().filter_map(|event| async move {
        match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(SseEvent::default()
                .event(event.kind.as_str())
                .data(json))),
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize event for SSE");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// GET /speed/history - Per-second aggregate throughput samples
#[utoipa::path(
    get,
    path = "/api/v1/speed/history",
    tag = "system",
    responses(
        (status = 200, description = "Throughput ring buffer, oldest first", body = [SpeedSample])
    )
)]
pub async fn speed_history(State(state): State<AppState>) -> Json<Vec<SpeedSample>> {
    Json(state.sampler.history())
}
