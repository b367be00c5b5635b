//! Core types for seedreap

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Unique identifier for a persisted entity
///
/// Wraps a v7 UUID: time-ordered, so the hyphenated text form sorts
/// lexicographically in creation order. Stored as TEXT in SQLite.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct Id(pub Uuid);

impl Id {
    /// Generate a fresh time-ordered identifier
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the inner UUID
    pub fn get(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Id {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode so IDs bind as TEXT columns
impl sqlx::Type<sqlx::Sqlite> for Id {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for Id {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode(self.0.to_string(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for Id {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let text = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(text.parse()?))
    }
}

/// Normalised state of a torrent on the remote client
///
/// Download clients report a zoo of client-specific state strings; the
/// adapter layer collapses them to these four values. See
/// [`crate::client::normalize_state`] for the rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TorrentState {
    /// Actively downloading on the seedbox
    Downloading,
    /// Paused or stopped with incomplete data
    Paused,
    /// All data present on the seedbox (includes seeding states)
    Complete,
    /// The client reports an error or missing files
    Error,
}

impl TorrentState {
    /// Convert integer status code to TorrentState
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => TorrentState::Downloading,
            1 => TorrentState::Paused,
            2 => TorrentState::Complete,
            _ => TorrentState::Error,
        }
    }

    /// Convert TorrentState to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            TorrentState::Downloading => 0,
            TorrentState::Paused => 1,
            TorrentState::Complete => 2,
            TorrentState::Error => 3,
        }
    }
}

/// Status of a sync job (the commitment to mirror one download locally)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Created, no file transfer has started yet
    Pending,
    /// At least one file transfer is running or has run
    Syncing,
    /// Every non-cancelled file is complete
    Complete,
    /// Cancelled (torrent removed or category moved away)
    Cancelled,
    /// Failed with no file still pending or syncing
    Error,
}

impl SyncStatus {
    /// Convert integer status code to SyncStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => SyncStatus::Pending,
            1 => SyncStatus::Syncing,
            2 => SyncStatus::Complete,
            3 => SyncStatus::Cancelled,
            _ => SyncStatus::Error,
        }
    }

    /// Convert SyncStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            SyncStatus::Pending => 0,
            SyncStatus::Syncing => 1,
            SyncStatus::Complete => 2,
            SyncStatus::Cancelled => 3,
            SyncStatus::Error => 4,
        }
    }
}

/// Status of a single file transfer within a sync job
///
/// Terminal transitions (complete, cancelled, error) are monotone: once a
/// sync file reaches one of them, only an explicit retry creates a new row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SyncFileStatus {
    /// Queued, waiting for a worker slot
    Pending,
    /// Transfer in flight
    Syncing,
    /// Transferred in full
    Complete,
    /// Transfer failed
    Error,
    /// Transfer cancelled before completion
    Cancelled,
}

impl SyncFileStatus {
    /// Convert integer status code to SyncFileStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => SyncFileStatus::Pending,
            1 => SyncFileStatus::Syncing,
            2 => SyncFileStatus::Complete,
            3 => SyncFileStatus::Error,
            _ => SyncFileStatus::Cancelled,
        }
    }

    /// Convert SyncFileStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            SyncFileStatus::Pending => 0,
            SyncFileStatus::Syncing => 1,
            SyncFileStatus::Complete => 2,
            SyncFileStatus::Error => 3,
            SyncFileStatus::Cancelled => 4,
        }
    }

    /// Whether this status is terminal (no further transition except retry)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncFileStatus::Complete | SyncFileStatus::Error | SyncFileStatus::Cancelled
        )
    }
}

/// Status of a move job (promotion of a staging tree to its destination)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MoveStatus {
    /// Created, not yet started
    Pending,
    /// Move in progress
    Moving,
    /// Destination populated, staging removed
    Complete,
    /// Move failed, staging retained for retry
    Error,
}

impl MoveStatus {
    /// Convert integer status code to MoveStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => MoveStatus::Pending,
            1 => MoveStatus::Moving,
            2 => MoveStatus::Complete,
            _ => MoveStatus::Error,
        }
    }

    /// Convert MoveStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            MoveStatus::Pending => 0,
            MoveStatus::Moving => 1,
            MoveStatus::Complete => 2,
            MoveStatus::Error => 3,
        }
    }
}

/// Status of one app notification for one download
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AppJobStatus {
    /// Created, not yet sent
    Pending,
    /// Import request in flight
    Processing,
    /// App accepted the import request
    Complete,
    /// App rejected the request or was unreachable
    Error,
}

impl AppJobStatus {
    /// Convert integer status code to AppJobStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => AppJobStatus::Pending,
            1 => AppJobStatus::Processing,
            2 => AppJobStatus::Complete,
            _ => AppJobStatus::Error,
        }
    }

    /// Convert AppJobStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            AppJobStatus::Pending => 0,
            AppJobStatus::Processing => 1,
            AppJobStatus::Complete => 2,
            AppJobStatus::Error => 3,
        }
    }
}

/// User-visible workflow state of a tracked download
///
/// One flat enum covering the whole pipeline, including hybrid states
/// (`DownloadingSyncing`): the UI needs a single sortable field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrackedState {
    /// Remote download in progress, nothing synced yet
    Downloading,
    /// Remote download paused
    Paused,
    /// Remote complete, sync not started
    Pending,
    /// Remote still downloading while completed files sync
    DownloadingSyncing,
    /// Remote complete, files syncing
    Syncing,
    /// All selected files mirrored locally
    Synced,
    /// A file transfer failed
    SyncError,
    /// Sync cancelled
    Cancelled,
    /// Staging tree being promoted to the destination
    Moving,
    /// Destination populated
    Moved,
    /// Promotion failed
    MoveError,
    /// Apps are being notified
    Importing,
    /// All matching apps acknowledged the import
    Imported,
    /// An app notification failed
    ImportError,
    /// The remote client reports an error
    Error,
}

impl TrackedState {
    /// Convert integer state code to TrackedState
    pub fn from_i32(state: i32) -> Self {
        match state {
            0 => TrackedState::Downloading,
            1 => TrackedState::Paused,
            2 => TrackedState::Pending,
            3 => TrackedState::DownloadingSyncing,
            4 => TrackedState::Syncing,
            5 => TrackedState::Synced,
            6 => TrackedState::SyncError,
            7 => TrackedState::Cancelled,
            8 => TrackedState::Moving,
            9 => TrackedState::Moved,
            10 => TrackedState::MoveError,
            11 => TrackedState::Importing,
            12 => TrackedState::Imported,
            13 => TrackedState::ImportError,
            _ => TrackedState::Error,
        }
    }

    /// Convert TrackedState to integer state code
    pub fn to_i32(&self) -> i32 {
        match self {
            TrackedState::Downloading => 0,
            TrackedState::Paused => 1,
            TrackedState::Pending => 2,
            TrackedState::DownloadingSyncing => 3,
            TrackedState::Syncing => 4,
            TrackedState::Synced => 5,
            TrackedState::SyncError => 6,
            TrackedState::Cancelled => 7,
            TrackedState::Moving => 8,
            TrackedState::Moved => 9,
            TrackedState::MoveError => 10,
            TrackedState::Importing => 11,
            TrackedState::Imported => 12,
            TrackedState::ImportError => 13,
            TrackedState::Error => 14,
        }
    }
}

/// Kind tag of a configured download client
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    /// qBittorrent WebUI API v2
    Qbittorrent,
}

impl ClientKind {
    /// Stable string tag used in config and the store
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientKind::Qbittorrent => "qbittorrent",
        }
    }
}

/// Kind tag of a configured media app
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AppKind {
    /// Sonarr (TV) — `DownloadedEpisodesScan` command
    Sonarr,
    /// Radarr (movies) — `DownloadedMoviesScan` command
    Radarr,
    /// No-op participant in the pipeline
    Passthrough,
}

impl AppKind {
    /// Stable string tag used in config and the store
    pub fn as_str(&self) -> &'static str {
        match self {
            AppKind::Sonarr => "sonarr",
            AppKind::Radarr => "radarr",
            AppKind::Passthrough => "passthrough",
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn torrent_state_round_trips_through_i32_for_all_variants() {
        let cases = [
            (TorrentState::Downloading, 0),
            (TorrentState::Paused, 1),
            (TorrentState::Complete, 2),
            (TorrentState::Error, 3),
        ];

        for (variant, expected_int) in cases {
            assert_eq!(variant.to_i32(), expected_int);
            assert_eq!(TorrentState::from_i32(expected_int), variant);
        }
    }

    #[test]
    fn torrent_state_from_unknown_integer_defaults_to_error() {
        assert_eq!(
            TorrentState::from_i32(99),
            TorrentState::Error,
            "unknown state must fall back to Error so corrupted rows surface visibly"
        );
    }

    #[test]
    fn sync_file_status_terminal_classification() {
        assert!(!SyncFileStatus::Pending.is_terminal());
        assert!(!SyncFileStatus::Syncing.is_terminal());
        assert!(SyncFileStatus::Complete.is_terminal());
        assert!(SyncFileStatus::Error.is_terminal());
        assert!(SyncFileStatus::Cancelled.is_terminal());
    }

    #[test]
    fn sync_status_round_trips_through_i32() {
        for status in [
            SyncStatus::Pending,
            SyncStatus::Syncing,
            SyncStatus::Complete,
            SyncStatus::Cancelled,
            SyncStatus::Error,
        ] {
            assert_eq!(SyncStatus::from_i32(status.to_i32()), status);
        }
    }

    #[test]
    fn tracked_state_round_trips_through_i32_for_all_variants() {
        for code in 0..=14 {
            let state = TrackedState::from_i32(code);
            assert_eq!(state.to_i32(), code, "{state:?} should encode to {code}");
        }
    }

    #[test]
    fn ids_generated_later_sort_lexicographically_after_earlier_ones() {
        let a = Id::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = Id::generate();
        assert!(
            a.to_string() < b.to_string(),
            "v7 IDs must sort by creation time in text form"
        );
    }

    #[test]
    fn id_parses_its_own_display_form() {
        let id = Id::generate();
        let parsed: Id = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn id_rejects_non_uuid_text() {
        assert!("not-a-uuid".parse::<Id>().is_err());
    }
}
