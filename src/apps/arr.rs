//! Sonarr / Radarr adapter.
//!
//! Both apps accept a command document POSTed to `/api/v3/command` with
//! an `X-Api-Key` header; only the command name differs.

use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::AppError;
use crate::types::AppKind;

use super::MediaApp;

const MAX_ERROR_BODY: usize = 256;

/// REST adapter for the *arr family
pub struct ArrApp {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    command: &'static str,
}

impl ArrApp {
    /// Build an adapter for a Sonarr or Radarr endpoint
    pub fn new(kind: AppKind, url: &str, api_key: &str, timeout: Duration) -> Result<Self, AppError> {
        let command = match kind {
            AppKind::Sonarr => "DownloadedEpisodesScan",
            AppKind::Radarr => "DownloadedMoviesScan",
            AppKind::Passthrough => {
                return Err(AppError::Remote {
                    status: 0,
                    body: "passthrough apps have no endpoint".to_string(),
                });
            }
        };

        let base_url = Url::parse(url).map_err(|e| AppError::Network(format!("invalid app URL: {}", e)))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            api_key: api_key.to_string(),
            command,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AppError> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::Network(format!("invalid endpoint path: {}", e)))
    }

    async fn check(response: reqwest::Response) -> Result<(), AppError> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AppError::Auth(format!(
                "API key rejected (status {})",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = if body.len() > MAX_ERROR_BODY {
                let mut end = MAX_ERROR_BODY;
                while !body.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}…", &body[..end])
            } else {
                body
            };
            return Err(AppError::Remote {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MediaApp for ArrApp {
    async fn trigger_import(&self, path: &Path) -> Result<(), AppError> {
        let response = self
            .http
            .post(self.endpoint("api/v3/command")?)
            .header("X-Api-Key", &self.api_key)
            .json(&json!({
                "name": self.command,
                "path": path.to_string_lossy(),
            }))
            .send()
            .await
            .map_err(|e| AppError::Network(e.to_string()))?;

        Self::check(response).await
    }

    async fn test_connection(&self) -> Result<(), AppError> {
        let response = self
            .http
            .get(self.endpoint("api/v3/system/status")?)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| AppError::Network(e.to_string()))?;

        Self::check(response).await
    }
}
