//! Error types for snapshot persistence.
//!
//! Every failure here is recoverable: a failed save leaves earlier
//! artifacts untouched, and a failed restore falls back to an older
//! artifact or an empty store.

use std::path::PathBuf;

/// Errors that can occur while saving, listing, or loading snapshots.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// A filesystem operation failed.
    #[error("{action} {path}: {source}")]
    Io {
        /// What was being attempted (`write`, `rename`, `read`, ...).
        action: &'static str,
        /// The path involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// An artifact could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A snapshot identifier was malformed.
    #[error("invalid snapshot id: {0}")]
    InvalidId(String),

    /// No artifact exists with the given identifier.
    #[error("snapshot not found: {0}")]
    NotFound(String),
}

impl SnapshotError {
    pub(crate) fn io(
        action: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}
