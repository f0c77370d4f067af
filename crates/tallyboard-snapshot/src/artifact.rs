//! The on-disk artifact format and its identifiers.
//!
//! An artifact is a pretty-printed JSON document named
//! `snapshot-<micros>.json`, where `<micros>` is the save instant in
//! microseconds since the Unix epoch, zero-padded to 16 digits. The name
//! alone orders artifacts; the same instant is repeated inside the
//! document as `saved_at`.
//!
//! # Defaulting rules
//!
//! Readers fill anything missing instead of failing:
//!
//! | Field | Default when absent |
//! |-------|---------------------|
//! | `format_version` | `1` |
//! | `saved_at` | none (the file name still orders it) |
//! | `items`, `consumptions`, `markers`, `participants`, `predictions` | empty |
//! | `settings` | no passcode, predictions unlocked |
//! | `participants[].self_estimate` | `0` |
//! | optional entity fields (`emoji`, `image_ref`, `avatar_ref`, `participant_id`) | none |
//!
//! Unknown fields are ignored, so a newer writer's artifact still loads in
//! an older reader.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tallyboard_core::EventStore;

use crate::error::SnapshotError;

/// Format version written by this build.
pub const FORMAT_VERSION: u32 = 2;

const PREFIX: &str = "snapshot-";
const EXTENSION: &str = ".json";

/// Identifier of one artifact, derived from its save instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId(i64);

impl SnapshotId {
    /// Identifier for an instant given in microseconds since the epoch.
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Microseconds since the epoch.
    pub const fn micros(self) -> i64 {
        self.0
    }

    /// The save instant.
    pub fn saved_at(self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// File name of the finished artifact.
    pub fn file_name(self) -> String {
        format!("{self}{EXTENSION}")
    }

    /// File name used while the artifact is being written.
    pub fn temp_file_name(self) -> String {
        format!(".{self}{EXTENSION}.tmp")
    }

    /// Parse a finished artifact's file name. Anything else yields `None`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        name.strip_suffix(EXTENSION)?.parse().ok()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{:016}", self.0)
    }
}

impl FromStr for SnapshotId {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix(PREFIX)
            .filter(|d| !d.is_empty() && d.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(|| SnapshotError::InvalidId(s.to_owned()))?;
        digits
            .parse::<i64>()
            .map(Self)
            .map_err(|e| SnapshotError::InvalidId(format!("{s}: {e}")))
    }
}

impl Serialize for SnapshotId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Listing entry for one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotInfo {
    /// Artifact identifier.
    pub id: SnapshotId,
    /// Save instant derived from the identifier.
    pub saved_at: DateTime<Utc>,
    /// File size on disk.
    pub size_bytes: u64,
}

/// Borrowing form of the document, used when writing.
#[derive(Debug, Serialize)]
pub(crate) struct DocumentRef<'a> {
    pub format_version: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(flatten)]
    pub store: &'a EventStore,
}

/// Owning form of the document, used when reading.
#[derive(Debug, Deserialize)]
pub struct SnapshotDocument {
    /// Format version the writer used.
    #[serde(default = "legacy_version")]
    pub format_version: u32,
    /// When the writer took the snapshot, if recorded.
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    /// The full store contents.
    #[serde(flatten)]
    pub store: EventStore,
}

impl SnapshotDocument {
    /// Decode an artifact body, applying the defaulting rules.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

const fn legacy_version() -> u32 {
    1
}
