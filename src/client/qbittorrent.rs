//! qBittorrent WebUI API v2 adapter.
//!
//! Stateful cookie session: when credentials are supplied, `connect`
//! performs the forms login and the reqwest cookie store carries the SID
//! cookie afterwards. A 403 mid-session triggers one transparent re-login
//! before the call is surfaced as an auth failure.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::error::ClientError;

use super::{TorrentClient, TorrentFile, TorrentInfo, normalize_state};

const MAX_ERROR_BODY: usize = 256;

/// qBittorrent WebUI client
pub struct QbitClient {
    http: reqwest::Client,
    base_url: Url,
    username: Option<String>,
    password: Option<String>,
}

/// Torrent document from `/api/v2/torrents/info`
#[derive(Debug, Deserialize)]
struct QbTorrent {
    hash: String,
    name: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    downloaded: i64,
    #[serde(default)]
    save_path: String,
    #[serde(default)]
    content_path: String,
}

/// File document from `/api/v2/torrents/files`
#[derive(Debug, Deserialize)]
struct QbFile {
    name: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    priority: i64,
}

impl From<QbTorrent> for TorrentInfo {
    fn from(t: QbTorrent) -> Self {
        let state = normalize_state(&t.state, t.progress);
        let content_path = if t.content_path.is_empty() {
            t.save_path.clone()
        } else {
            t.content_path
        };
        TorrentInfo {
            remote_id: t.hash,
            name: t.name,
            category: t.category,
            state,
            progress: t.progress,
            size_bytes: t.size,
            downloaded_bytes: t.downloaded,
            save_path: t.save_path,
            content_path,
        }
    }
}

impl QbitClient {
    /// Build a client for the given WebUI endpoint
    pub fn new(
        url: &str,
        username: Option<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let base_url = Url::parse(url)
            .map_err(|e| ClientError::UnexpectedResponse(format!("invalid client URL: {}", e)))?;

        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            username,
            password,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::UnexpectedResponse(format!("invalid endpoint path: {}", e)))
    }

    /// Forms login; the SID cookie lands in the cookie store
    async fn login(&self) -> Result<(), ClientError> {
        let (Some(username), Some(password)) = (&self.username, &self.password) else {
            return Ok(());
        };

        let response = self
            .http
            .post(self.endpoint("api/v2/auth/login")?)
            .form(&[("username", username.as_str()), ("password", password.as_str())])
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        // qBittorrent answers 200 with a literal "Fails." on bad credentials
        if !status.is_success() || body.trim() == "Fails." {
            return Err(ClientError::Auth(format!(
                "login rejected (status {})",
                status.as_u16()
            )));
        }

        Ok(())
    }

    /// GET a JSON document, re-logging in once on a 403
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ClientError> {
        let mut relogged = false;

        loop {
            let response = self
                .http
                .get(self.endpoint(path)?)
                .query(query)
                .send()
                .await
                .map_err(|e| ClientError::Network(e.to_string()))?;

            let status = response.status();
            if status == reqwest::StatusCode::FORBIDDEN {
                if !relogged && self.username.is_some() {
                    // Session expired; refresh the cookie and retry once
                    relogged = true;
                    self.login().await?;
                    continue;
                }
                return Err(ClientError::Auth("session rejected (403)".to_string()));
            }
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(ClientError::NotFound(path.to_string()));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ClientError::Remote {
                    status: status.as_u16(),
                    body: truncate(&body),
                });
            }

            return response
                .json::<T>()
                .await
                .map_err(|e| ClientError::UnexpectedResponse(e.to_string()));
        }
    }
}

#[async_trait]
impl TorrentClient for QbitClient {
    async fn connect(&self) -> Result<(), ClientError> {
        self.login().await?;
        // Validate the session against a cheap authenticated endpoint
        let _version: String = {
            let response = self
                .http
                .get(self.endpoint("api/v2/app/version")?)
                .send()
                .await
                .map_err(|e| ClientError::Network(e.to_string()))?;

            let status = response.status();
            if status == reqwest::StatusCode::FORBIDDEN {
                return Err(ClientError::Auth("version check rejected (403)".to_string()));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ClientError::Remote {
                    status: status.as_u16(),
                    body: truncate(&body),
                });
            }
            response
                .text()
                .await
                .map_err(|e| ClientError::Network(e.to_string()))?
        };
        Ok(())
    }

    async fn list_downloads(
        &self,
        categories: Option<&[String]>,
    ) -> Result<Vec<TorrentInfo>, ClientError> {
        let torrents: Vec<QbTorrent> = self.get_json("api/v2/torrents/info", &[]).await?;

        let mut infos: Vec<TorrentInfo> = torrents.into_iter().map(TorrentInfo::from).collect();
        if let Some(categories) = categories {
            if !categories.is_empty() {
                infos.retain(|t| categories.iter().any(|c| c == &t.category));
            }
        }
        Ok(infos)
    }

    async fn get_download(&self, remote_id: &str) -> Result<TorrentInfo, ClientError> {
        let torrents: Vec<QbTorrent> = self
            .get_json("api/v2/torrents/info", &[("hashes", remote_id)])
            .await?;

        torrents
            .into_iter()
            .next()
            .map(TorrentInfo::from)
            .ok_or_else(|| ClientError::NotFound(remote_id.to_string()))
    }

    async fn get_files(&self, remote_id: &str) -> Result<Vec<TorrentFile>, ClientError> {
        let files: Vec<QbFile> = self
            .get_json("api/v2/torrents/files", &[("hash", remote_id)])
            .await
            .map_err(|e| match e {
                // qBittorrent answers 404 for an unknown hash here
                ClientError::NotFound(_) => ClientError::NotFound(remote_id.to_string()),
                other => other,
            })?;

        Ok(files
            .into_iter()
            .map(|f| TorrentFile {
                relative_path: f.name,
                size_bytes: f.size,
                progress: f.progress,
                priority: f.priority,
            })
            .collect())
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        body.to_string()
    } else {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}
