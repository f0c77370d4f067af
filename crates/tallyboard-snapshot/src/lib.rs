//! Durable snapshots of the Tallyboard event store.
//!
//! The [`SnapshotManager`] writes the whole store as a self-describing
//! JSON artifact on a timer and on request, keeps the newest N, and
//! restores the newest readable one at startup. See [`artifact`] for the
//! file format and its field defaulting rules.

pub mod artifact;
pub mod error;
pub mod manager;

pub use artifact::{FORMAT_VERSION, SnapshotDocument, SnapshotId, SnapshotInfo};
pub use error::SnapshotError;
pub use manager::SnapshotManager;
