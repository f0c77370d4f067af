//! Derived, read-only views computed from the event store.
//!
//! These are the shapes the aggregator and the award engine produce and
//! the dashboards render. None of them are persisted.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::ParticipantId;
use crate::structs::{CatalogItem, Marker};

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Consumption counts for one fixed-width time interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Bucket {
    /// Inclusive start of the interval.
    pub start: DateTime<Utc>,
    /// Count per catalog item name. Items with no records are absent.
    pub counts: BTreeMap<String, u64>,
}

impl Bucket {
    /// Sum of all counts in this bucket.
    pub fn total(&self) -> u64 {
        self.counts.values().fold(0_u64, |acc, n| acc.saturating_add(*n))
    }
}

/// Output of the trailing-window aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WindowedStats {
    /// Dense, ascending buckets covering the whole window.
    pub buckets: Vec<Bucket>,
    /// Markers inside the window, ascending by time.
    pub recent_markers: Vec<Marker>,
}

/// Full payload of the `stats` stream message and `GET /api/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct DashboardStats {
    /// When this view was computed.
    pub generated_at: DateTime<Utc>,
    /// Windowed, bucketed view.
    pub window: WindowedStats,
    /// Per-item counts inside the window.
    pub window_totals: BTreeMap<String, u64>,
    /// Per-item counts since the first record.
    pub totals: BTreeMap<String, u64>,
    /// Sum of `totals`.
    pub total_consumed: u64,
    /// The catalog, so a cold client can render legends.
    pub items: Vec<CatalogItem>,
}

/// Historical aggregation: the same bucketing applied to the whole log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct HistorySeries {
    /// Dense, ascending buckets from the first record's bucket to now.
    pub buckets: Vec<Bucket>,
    /// Per-item counts over the whole log.
    pub totals: BTreeMap<String, u64>,
}

// ---------------------------------------------------------------------------
// Awards
// ---------------------------------------------------------------------------

/// The four independently ranked awards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum AwardKind {
    /// Highest own consumption count.
    MostConsumed,
    /// Lowest mean absolute prediction error among eligible predictors.
    BestPredictor,
    /// Highest crowd mean absolute error as a target.
    HardestToPredict,
    /// Highest mean absolute prediction error among eligible predictors.
    WorstPredictor,
}

/// One winner of an award. Ties produce several winners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AwardWinner {
    /// The winning participant.
    pub participant_id: ParticipantId,
    /// Participant name at computation time.
    pub name: String,
    /// Count for [`AwardKind::MostConsumed`], mean absolute error otherwise.
    pub value: f64,
}

/// A computed award with its tied winners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Award {
    /// Which award this is.
    pub kind: AwardKind,
    /// All winners tied for the best value, in participant order.
    pub winners: Vec<AwardWinner>,
    /// Coverage threshold the predictor awards settled on, if applicable.
    #[serde(default)]
    pub coverage_threshold: Option<f64>,
}

/// One row of the participant listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ParticipantStanding {
    /// The participant.
    pub participant: crate::structs::Participant,
    /// Number of consumption records attributed to them.
    pub consumed: u32,
}
