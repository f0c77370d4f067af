//! Core entity structs owned by the event store.
//!
//! Every field that was added after the first artifact format carries a
//! serde default so older snapshots still deserialize.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{ParticipantId, PredictionId};

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// A kind of thing that can be consumed (a drink on the menu).
///
/// Created once and never mutated. The name is unique under
/// case-insensitive comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CatalogItem {
    /// Display name, also the key consumption records reference.
    pub name: String,
    /// Optional emoji shown next to the name.
    #[serde(default)]
    pub emoji: Option<String>,
    /// Optional reference to an uploaded image.
    #[serde(default)]
    pub image_ref: Option<String>,
    /// Chart color as a `#rrggbb` hex string.
    pub color: String,
}

impl CatalogItem {
    /// Whether `name` refers to this item under case-insensitive comparison.
    pub fn matches(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }
}

// ---------------------------------------------------------------------------
// Append-only logs
// ---------------------------------------------------------------------------

/// One consumption of a catalog item, optionally attributed to a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ConsumptionRecord {
    /// Name of the consumed [`CatalogItem`], stored in its canonical casing.
    pub item_name: String,
    /// Participant who consumed it, if attributed.
    #[serde(default)]
    pub participant_id: Option<ParticipantId>,
    /// When the consumption happened.
    pub occurred_at: DateTime<Utc>,
}

/// A labeled point in time drawn on the chart (e.g. "pizza arrived").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Marker {
    /// Text shown on the chart.
    pub label: String,
    /// Line color as a `#rrggbb` hex string.
    pub color: String,
    /// When the marker was placed.
    pub occurred_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Participants and predictions
// ---------------------------------------------------------------------------

/// A person taking part in the evening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Participant {
    /// Stable generated identifier.
    pub id: ParticipantId,
    /// Display name, unique under case-insensitive comparison.
    pub name: String,
    /// Optional reference to an uploaded avatar image.
    #[serde(default)]
    pub avatar_ref: Option<String>,
    /// How many drinks the participant expects to have.
    #[serde(default)]
    pub self_estimate: u32,
}

impl Participant {
    /// Whether `name` refers to this participant under case-insensitive comparison.
    pub fn matches(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }
}

/// A guess by one participant of how many drinks another will have.
///
/// At most one prediction exists per `(predictor_id, target_id)` pair and
/// the two IDs always differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Prediction {
    /// Stable generated identifier.
    pub id: PredictionId,
    /// Participant who made the guess.
    pub predictor_id: ParticipantId,
    /// Participant the guess is about.
    pub target_id: ParticipantId,
    /// Predicted number of drinks.
    pub predicted_drinks: u32,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Singleton settings record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Lowercase hex SHA-256 digest of the admin passcode. Write-once.
    #[serde(default)]
    pub passcode_hash: Option<String>,
    /// While `true`, predictions and self-estimates cannot change.
    #[serde(default)]
    pub predictions_locked: bool,
}

/// Public projection of [`Settings`] that never exposes the passcode hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SettingsView {
    /// Whether a passcode has been configured.
    pub passcode_set: bool,
    /// Whether predictions are currently locked.
    pub predictions_locked: bool,
}

impl From<&Settings> for SettingsView {
    fn from(settings: &Settings) -> Self {
        Self {
            passcode_set: settings.passcode_hash.is_some(),
            predictions_locked: settings.predictions_locked,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn item_name_matching_ignores_case() {
        let item = CatalogItem {
            name: String::from("Beer"),
            emoji: None,
            image_ref: None,
            color: String::from("#f5a623"),
        };
        assert!(item.matches("beer"));
        assert!(item.matches("BEER"));
        assert!(!item.matches("bee"));
    }

    #[test]
    fn participant_without_optional_fields_deserializes() {
        let id = ParticipantId::new();
        let json = serde_json::json!({ "id": id, "name": "Ada" });
        let participant: Participant = serde_json::from_value(json).unwrap();
        assert_eq!(participant.self_estimate, 0);
        assert!(participant.avatar_ref.is_none());
    }

    #[test]
    fn settings_view_hides_hash() {
        let settings = Settings {
            passcode_hash: Some(String::from("abc")),
            predictions_locked: true,
        };
        let view = SettingsView::from(&settings);
        assert!(view.passcode_set);
        assert!(view.predictions_locked);
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("abc"));
    }
}
