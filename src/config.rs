//! Configuration types for seedreap
//!
//! Configuration is read from a YAML document, then overridden by
//! environment variables (`SEEDREAP_` + dotted-path-with-underscores,
//! uppercased). Map entries (downloaders, apps) are declared via
//! `SEEDREAP_DOWNLOADERS=<csv>` / `SEEDREAP_APPS=<csv>` and populated from
//! per-name variables. Environment always wins over the file.

use crate::error::{Error, Result};
use crate::types::{AppKind, ClientKind};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, net::SocketAddr, path::PathBuf, time::Duration};

/// HTTP bind address and API server behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Bind address (default `[::]:8423`)
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Serve the Swagger UI at `/swagger-ui` (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            swagger_ui: true,
        }
    }
}

/// Transfer pipeline settings (staging, destination, concurrency)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Destination root for completed downloads (required)
    #[serde(default)]
    pub downloads_path: PathBuf,

    /// Staging root for in-flight transfers (required)
    ///
    /// Same filesystem as `downloadsPath` strongly preferred, so the
    /// promotion is an atomic rename.
    #[serde(default)]
    pub syncing_path: PathBuf,

    /// Concurrent transfer slots across all sync jobs (default: 2)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Parallel streams per file transfer (default: 8)
    #[serde(default = "default_parallel_connections")]
    pub parallel_connections: usize,

    /// Interval between download-client polls (default: 30s)
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Transfer speed cap in bytes per second, 0 = unlimited
    #[serde(default)]
    pub transfer_speed_max: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            downloads_path: PathBuf::new(),
            syncing_path: PathBuf::new(),
            max_concurrent: default_max_concurrent(),
            parallel_connections: default_parallel_connections(),
            poll_interval: default_poll_interval(),
            transfer_speed_max: 0,
        }
    }
}

/// Database file location
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceConfig {
    /// Path to the SQLite database file (default: "seedreap.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// SSH parameters for the SFTP transfer backend of one seedbox
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    /// SSH host (required)
    #[serde(default)]
    pub host: String,

    /// SSH port (default: 22)
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// SSH user (required)
    #[serde(default)]
    pub user: String,

    /// Private key file; ssh-agent is tried when absent
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    /// known_hosts file for host key verification
    #[serde(default)]
    pub known_hosts_file: Option<PathBuf>,

    /// Skip host key verification entirely
    #[serde(default)]
    pub ignore_host_key: bool,

    /// Dial timeout (default: 30s)
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// One configured seedbox download client
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloaderConfig {
    /// Client kind tag
    #[serde(rename = "type")]
    pub kind: ClientKind,

    /// WebUI endpoint URL (required)
    #[serde(default)]
    pub url: String,

    /// WebUI username
    #[serde(default)]
    pub username: Option<String>,

    /// WebUI password
    #[serde(default)]
    pub password: Option<String>,

    /// Whether this client is polled (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-call HTTP timeout (default: 30s)
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// SSH parameters for file transfers from this seedbox
    #[serde(default)]
    pub ssh: SshConfig,
}

/// One configured media app
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// App kind tag
    #[serde(rename = "type")]
    pub kind: AppKind,

    /// API endpoint URL (required unless passthrough)
    #[serde(default)]
    pub url: String,

    /// API key (required unless passthrough)
    #[serde(default)]
    pub api_key: String,

    /// Torrent category this app claims (required)
    ///
    /// Multiple apps may share a category (fan-out).
    #[serde(default)]
    pub category: String,

    /// Destination override for downloads of this app's category
    #[serde(default)]
    pub downloads_path: Option<PathBuf>,

    /// Remove staging and destination trees when the category moves away
    #[serde(default)]
    pub cleanup_on_category_change: bool,

    /// Remove the destination tree when the torrent is removed remotely
    #[serde(default)]
    pub cleanup_on_remove: bool,

    /// Whether this app participates in the pipeline (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-call HTTP timeout (default: 30s)
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Main configuration for the seedreap engine
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP API server
    #[serde(default)]
    pub server: ServerConfig,

    /// Transfer pipeline
    #[serde(default)]
    pub sync: SyncConfig,

    /// Database location
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Configured seedboxes, keyed by unique name
    #[serde(default)]
    pub downloaders: HashMap<String, DownloaderConfig>,

    /// Configured media apps, keyed by unique name
    #[serde(default)]
    pub apps: HashMap<String, AppConfig>,
}

fn default_listen() -> SocketAddr {
    "[::]:8423".parse().unwrap_or_else(|_| {
        // Unreachable for a literal, but avoid a panic path in library code
        SocketAddr::from(([0, 0, 0, 0], 8423))
    })
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    2
}

fn default_parallel_connections() -> usize {
    8
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_ssh_port() -> u16 {
    22
}

fn default_database_path() -> PathBuf {
    PathBuf::from("seedreap.db")
}

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "SEEDREAP_";

impl Config {
    /// Parse a YAML document into a Config (no env overlay, no validation)
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::Config {
            message: format!("invalid YAML configuration: {}", e),
            key: None,
        })
    }

    /// Load configuration: optional YAML file, then environment overlay,
    /// then validation
    pub async fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                    Error::Config {
                        message: format!("cannot read {}: {}", path.display(), e),
                        key: None,
                    }
                })?;
                Self::from_yaml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using the supplied lookup
    ///
    /// The lookup indirection keeps this testable without mutating the
    /// process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));

        if let Some(v) = get("SERVER_LISTEN") {
            self.server.listen = v
                .parse()
                .map_err(|e| Error::config("server.listen", format!("invalid address: {}", e)))?;
        }
        if let Some(v) = get("SYNC_DOWNLOADSPATH") {
            self.sync.downloads_path = PathBuf::from(v);
        }
        if let Some(v) = get("SYNC_SYNCINGPATH") {
            self.sync.syncing_path = PathBuf::from(v);
        }
        if let Some(v) = get("SYNC_MAXCONCURRENT") {
            self.sync.max_concurrent = parse_number(&v, "sync.maxConcurrent")?;
        }
        if let Some(v) = get("SYNC_PARALLELCONNECTIONS") {
            self.sync.parallel_connections = parse_number(&v, "sync.parallelConnections")?;
        }
        if let Some(v) = get("SYNC_POLLINTERVAL") {
            self.sync.poll_interval = parse_duration(&v, "sync.pollInterval")?;
        }
        if let Some(v) = get("SYNC_TRANSFERSPEEDMAX") {
            self.sync.transfer_speed_max = parse_number(&v, "sync.transferSpeedMax")?;
        }
        if let Some(v) = get("PERSISTENCE_DATABASEPATH") {
            self.persistence.database_path = PathBuf::from(v);
        }

        if let Some(names) = get("DOWNLOADERS") {
            for name in split_csv(&names) {
                let entry = self
                    .downloaders
                    .entry(name.clone())
                    .or_insert_with(|| DownloaderConfig {
                        kind: ClientKind::Qbittorrent,
                        url: String::new(),
                        username: None,
                        password: None,
                        enabled: true,
                        timeout: default_timeout(),
                        ssh: SshConfig {
                            port: default_ssh_port(),
                            timeout: default_timeout(),
                            ..SshConfig::default()
                        },
                    });
                apply_downloader_env(entry, &name, &get)?;
            }
        } else {
            // Env may still override fields of file-declared downloaders
            let names: Vec<String> = self.downloaders.keys().cloned().collect();
            for name in names {
                if let Some(entry) = self.downloaders.get_mut(&name) {
                    apply_downloader_env(entry, &name, &get)?;
                }
            }
        }

        if let Some(names) = get("APPS") {
            for name in split_csv(&names) {
                let entry = self.apps.entry(name.clone()).or_insert_with(|| AppConfig {
                    kind: AppKind::Passthrough,
                    url: String::new(),
                    api_key: String::new(),
                    category: String::new(),
                    downloads_path: None,
                    cleanup_on_category_change: false,
                    cleanup_on_remove: false,
                    enabled: true,
                    timeout: default_timeout(),
                });
                apply_app_env(entry, &name, &get)?;
            }
        } else {
            let names: Vec<String> = self.apps.keys().cloned().collect();
            for name in names {
                if let Some(entry) = self.apps.get_mut(&name) {
                    apply_app_env(entry, &name, &get)?;
                }
            }
        }

        Ok(())
    }

    /// Validate the configuration, returning the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.sync.downloads_path.as_os_str().is_empty() {
            return Err(Error::config("sync.downloadsPath", "is required"));
        }
        if self.sync.syncing_path.as_os_str().is_empty() {
            return Err(Error::config("sync.syncingPath", "is required"));
        }
        if self.sync.max_concurrent == 0 {
            return Err(Error::config("sync.maxConcurrent", "must be at least 1"));
        }
        if self.sync.parallel_connections == 0 {
            return Err(Error::config("sync.parallelConnections", "must be at least 1"));
        }
        if self.sync.poll_interval.is_zero() {
            return Err(Error::config("sync.pollInterval", "must be non-zero"));
        }

        for (name, dl) in &self.downloaders {
            if dl.url.is_empty() {
                return Err(Error::config(
                    format!("downloaders.{}.url", name),
                    "is required",
                ));
            }
            if dl.ssh.host.is_empty() {
                return Err(Error::config(
                    format!("downloaders.{}.ssh.host", name),
                    "is required",
                ));
            }
            if dl.ssh.user.is_empty() {
                return Err(Error::config(
                    format!("downloaders.{}.ssh.user", name),
                    "is required",
                ));
            }
        }

        for (name, app) in &self.apps {
            if app.category.is_empty() {
                return Err(Error::config(
                    format!("apps.{}.category", name),
                    "is required",
                ));
            }
            if app.kind != AppKind::Passthrough {
                if app.url.is_empty() {
                    return Err(Error::config(format!("apps.{}.url", name), "is required"));
                }
                if app.api_key.is_empty() {
                    return Err(Error::config(format!("apps.{}.apiKey", name), "is required"));
                }
            }
        }

        Ok(())
    }

    /// All enabled apps whose category matches, as (name, config) pairs
    pub fn apps_for_category<'a>(
        &'a self,
        category: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a AppConfig)> {
        self.apps
            .iter()
            .filter(move |(_, app)| app.enabled && app.category == category)
    }
}

fn apply_downloader_env(
    entry: &mut DownloaderConfig,
    name: &str,
    get: &impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let upper = env_name(name);
    let field = |f: &str| get(&format!("DOWNLOADERS_{}_{}", upper, f));

    if let Some(v) = field("TYPE") {
        entry.kind = match v.to_lowercase().as_str() {
            "qbittorrent" => ClientKind::Qbittorrent,
            other => {
                return Err(Error::config(
                    format!("downloaders.{}.type", name),
                    format!("unknown client type '{}'", other),
                ));
            }
        };
    }
    if let Some(v) = field("URL") {
        entry.url = v;
    }
    if let Some(v) = field("USERNAME") {
        entry.username = Some(v);
    }
    if let Some(v) = field("PASSWORD") {
        entry.password = Some(v);
    }
    if let Some(v) = field("ENABLED") {
        entry.enabled = parse_bool(&v, &format!("downloaders.{}.enabled", name))?;
    }
    if let Some(v) = field("TIMEOUT") {
        entry.timeout = parse_duration(&v, &format!("downloaders.{}.timeout", name))?;
    }
    if let Some(v) = field("SSH_HOST") {
        entry.ssh.host = v;
    }
    if let Some(v) = field("SSH_PORT") {
        entry.ssh.port = parse_number(&v, &format!("downloaders.{}.ssh.port", name))?;
    }
    if let Some(v) = field("SSH_USER") {
        entry.ssh.user = v;
    }
    if let Some(v) = field("SSH_KEYFILE") {
        entry.ssh.key_file = Some(PathBuf::from(v));
    }
    if let Some(v) = field("SSH_KNOWNHOSTSFILE") {
        entry.ssh.known_hosts_file = Some(PathBuf::from(v));
    }
    if let Some(v) = field("SSH_IGNOREHOSTKEY") {
        entry.ssh.ignore_host_key = parse_bool(&v, &format!("downloaders.{}.ssh.ignoreHostKey", name))?;
    }
    if let Some(v) = field("SSH_TIMEOUT") {
        entry.ssh.timeout = parse_duration(&v, &format!("downloaders.{}.ssh.timeout", name))?;
    }

    Ok(())
}

fn apply_app_env(
    entry: &mut AppConfig,
    name: &str,
    get: &impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let upper = env_name(name);
    let field = |f: &str| get(&format!("APPS_{}_{}", upper, f));

    if let Some(v) = field("TYPE") {
        entry.kind = match v.to_lowercase().as_str() {
            "sonarr" => AppKind::Sonarr,
            "radarr" => AppKind::Radarr,
            "passthrough" => AppKind::Passthrough,
            other => {
                return Err(Error::config(
                    format!("apps.{}.type", name),
                    format!("unknown app type '{}'", other),
                ));
            }
        };
    }
    if let Some(v) = field("URL") {
        entry.url = v;
    }
    if let Some(v) = field("APIKEY") {
        entry.api_key = v;
    }
    if let Some(v) = field("CATEGORY") {
        entry.category = v;
    }
    if let Some(v) = field("DOWNLOADSPATH") {
        entry.downloads_path = Some(PathBuf::from(v));
    }
    if let Some(v) = field("CLEANUPONCATEGORYCHANGE") {
        entry.cleanup_on_category_change =
            parse_bool(&v, &format!("apps.{}.cleanupOnCategoryChange", name))?;
    }
    if let Some(v) = field("CLEANUPONREMOVE") {
        entry.cleanup_on_remove = parse_bool(&v, &format!("apps.{}.cleanupOnRemove", name))?;
    }
    if let Some(v) = field("ENABLED") {
        entry.enabled = parse_bool(&v, &format!("apps.{}.enabled", name))?;
    }
    if let Some(v) = field("TIMEOUT") {
        entry.timeout = parse_duration(&v, &format!("apps.{}.timeout", name))?;
    }

    Ok(())
}

/// Map key → environment name segment (uppercased, non-alphanumerics to '_')
fn env_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(value: &str, key: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(Error::config(key, format!("invalid boolean '{}'", other))),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, key: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::config(key, format!("invalid number '{}': {}", value, e)))
}

fn parse_duration(value: &str, key: &str) -> Result<Duration> {
    // Accept both humantime forms ("30s", "5m") and bare seconds
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(value)
        .map_err(|e| Error::config(key, format!("invalid duration '{}': {}", value, e)))
}
