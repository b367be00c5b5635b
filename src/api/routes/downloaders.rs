//! Configured download-client handlers.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::AppState;
use crate::api::error_response::ApiError;
use crate::types::Id;

/// One configured download client (credentials redacted)
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloaderView {
    /// Entity ID
    pub id: Id,
    /// Unique name
    pub name: String,
    /// Client kind tag
    pub kind: String,
    /// WebUI endpoint
    pub url: String,
    /// SSH host used for transfers
    pub ssh_host: String,
    /// Whether the client is polled
    pub enabled: bool,
    /// Unix timestamp of the last validated connection
    pub last_connected_at: Option<i64>,
}

/// GET /downloaders - Configured download clients
#[utoipa::path(
    get,
    path = "/api/v1/downloaders",
    tag = "downloaders",
    responses(
        (status = 200, description = "Configured clients", body = [DownloaderView]),
        (status = 500, description = "Store failure")
    )
)]
pub async fn list_downloaders(
    State(state): State<AppState>,
) -> Result<Json<Vec<DownloaderView>>, ApiError> {
    let rows = state.db.list_clients().await?;
    Ok(Json(
        rows.into_iter()
            .map(|row| DownloaderView {
                id: row.id,
                name: row.name,
                kind: row.kind,
                url: row.url,
                ssh_host: row.ssh_host,
                enabled: row.enabled,
                last_connected_at: row.last_connected_at,
            })
            .collect(),
    ))
}
