//! Configured media-app handlers.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::AppState;
use crate::api::error_response::ApiError;
use crate::types::Id;

/// One configured media app (API key redacted)
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AppView {
    /// Entity ID
    pub id: Id,
    /// Unique name
    pub name: String,
    /// App kind tag
    pub kind: String,
    /// API endpoint
    pub url: String,
    /// Claimed category
    pub category: String,
    /// Destination override, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloads_path: Option<String>,
    /// Remove artifacts when the category moves away
    pub cleanup_on_category_change: bool,
    /// Remove the destination when the torrent is removed
    pub cleanup_on_remove: bool,
    /// Whether the app participates in the pipeline
    pub enabled: bool,
}

/// GET /apps - Configured media apps
#[utoipa::path(
    get,
    path = "/api/v1/apps",
    tag = "apps",
    responses(
        (status = 200, description = "Configured apps", body = [AppView]),
        (status = 500, description = "Store failure")
    )
)]
pub async fn list_apps(State(state): State<AppState>) -> Result<Json<Vec<AppView>>, ApiError> {
    let rows = state.db.list_apps().await?;
    Ok(Json(
        rows.into_iter()
            .map(|row| AppView {
                id: row.id,
                name: row.name,
                kind: row.kind,
                url: row.url,
                category: row.category,
                downloads_path: row.downloads_path,
                cleanup_on_category_change: row.cleanup_on_category_change,
                cleanup_on_remove: row.cleanup_on_remove,
                enabled: row.enabled,
            })
            .collect(),
    ))
}
