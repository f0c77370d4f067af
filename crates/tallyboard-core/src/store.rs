//! The event store: the single authoritative owner of every entity.
//!
//! All writes go through [`EventStore::apply`], which validates a
//! [`Mutation`] against the store invariants before touching anything.
//! A rejected mutation leaves the store exactly as it was.
//!
//! The store is a plain value. Serializing access between concurrent
//! writers is the job of [`SharedStore`](crate::shared::SharedStore).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tallyboard_types::{
    CatalogItem, ConsumptionRecord, Marker, Participant, ParticipantId, Prediction, PredictionId,
    Settings,
};

/// Longest accepted item or participant name, in characters.
pub const MAX_NAME_LEN: usize = 64;

/// Longest accepted marker label, in characters.
pub const MAX_LABEL_LEN: usize = 120;

/// Colors handed out to catalog items created without one.
pub const ITEM_PALETTE: [&str; 8] = [
    "#f5a623", "#d0021b", "#7ed321", "#4a90e2", "#bd10e0", "#50e3c2", "#f8e71c", "#9b9b9b",
];

/// Color used for markers created without one.
pub const DEFAULT_MARKER_COLOR: &str = "#ffffff";

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

/// Why a mutation was refused. A rejected mutation has no effect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// A required field is missing or malformed.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// A unique name is already taken (case-insensitive).
    #[error("{entity} named {name:?} already exists")]
    DuplicateName {
        /// Entity kind (`item`, `participant`).
        entity: &'static str,
        /// The colliding name as submitted.
        name: String,
    },

    /// A referenced entity does not exist.
    #[error("{entity} {key} not found")]
    NotFound {
        /// Entity kind (`item`, `participant`).
        entity: &'static str,
        /// The key that missed.
        key: String,
    },

    /// Predictions and self-estimates are locked.
    #[error("predictions are locked")]
    LockedForWrites,

    /// A participant tried to predict themselves.
    #[error("a participant cannot predict their own drinks")]
    SelfReferenceRejected,

    /// A write-once value has already been written.
    #[error("{0} is already set")]
    AlreadySet(&'static str),
}

/// Coarse error taxonomy shared with the ingress boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// Missing or malformed input.
    Validation,
    /// Foreign-key-like lookup miss.
    Reference,
    /// Duplicate key, write-once violation, or write while locked.
    Conflict,
}

impl Rejection {
    /// Classify this rejection.
    pub const fn kind(&self) -> RejectionKind {
        match self {
            Self::Validation { .. } | Self::SelfReferenceRejected => RejectionKind::Validation,
            Self::NotFound { .. } => RejectionKind::Reference,
            Self::DuplicateName { .. } | Self::LockedForWrites | Self::AlreadySet(_) => {
                RejectionKind::Conflict
            }
        }
    }

    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// Payload for creating a catalog item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewItem {
    /// Unique display name.
    pub name: String,
    /// Optional emoji.
    #[serde(default)]
    pub emoji: Option<String>,
    /// Optional image reference.
    #[serde(default)]
    pub image_ref: Option<String>,
    /// Chart color; picked from [`ITEM_PALETTE`] when absent.
    #[serde(default)]
    pub color: Option<String>,
}

/// Payload for recording a consumption.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewConsumption {
    /// Name of an existing catalog item (any casing).
    pub item_name: String,
    /// Optional participant the drink is attributed to.
    #[serde(default)]
    pub participant_id: Option<ParticipantId>,
    /// When it happened; the commit time when absent.
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Payload for placing a marker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewMarker {
    /// Marker text.
    pub label: String,
    /// Line color; [`DEFAULT_MARKER_COLOR`] when absent.
    #[serde(default)]
    pub color: Option<String>,
    /// When it happened; the commit time when absent.
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Payload for creating or updating a participant by name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParticipantUpsert {
    /// Name used as the upsert key (case-insensitive).
    pub name: String,
    /// Replaces the avatar when present.
    #[serde(default)]
    pub avatar_ref: Option<String>,
    /// Replaces the self-estimate when present. Refused while locked.
    #[serde(default)]
    pub self_estimate: Option<u32>,
}

/// Payload for creating or overwriting a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PredictionUpsert {
    /// Who is guessing.
    pub predictor_id: ParticipantId,
    /// Who the guess is about.
    pub target_id: ParticipantId,
    /// Predicted number of drinks.
    pub predicted_drinks: u32,
}

/// One write against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Create a catalog item.
    AddItem(NewItem),
    /// Append a consumption record.
    AddConsumption(NewConsumption),
    /// Append a marker.
    AddMarker(NewMarker),
    /// Create or update a participant keyed by name.
    UpsertParticipant(ParticipantUpsert),
    /// Change a participant's self-estimate.
    UpdateSelfEstimate {
        /// Target participant.
        participant_id: ParticipantId,
        /// New estimate.
        self_estimate: u32,
    },
    /// Create or overwrite the prediction for a `(predictor, target)` pair.
    UpsertPrediction(PredictionUpsert),
    /// Set the passcode hash. Write-once.
    SetPasscode {
        /// Lowercase hex digest computed by the caller.
        passcode_hash: String,
    },
    /// Set the prediction lock, or flip it when `locked` is `None`.
    SetPredictionsLocked {
        /// Desired state; `None` toggles.
        locked: Option<bool>,
    },
}

/// What a successful mutation changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A catalog item was created.
    ItemAdded(CatalogItem),
    /// A consumption record was appended.
    ConsumptionAdded(ConsumptionRecord),
    /// A marker was appended.
    MarkerAdded(Marker),
    /// A new participant was created.
    ParticipantAdded(Participant),
    /// An existing participant was updated.
    ParticipantUpdated(Participant),
    /// A new prediction was created.
    PredictionAdded(Prediction),
    /// An existing prediction was overwritten.
    PredictionUpdated(Prediction),
    /// The passcode hash was stored.
    PasscodeSet,
    /// The prediction lock now has this value.
    PredictionsLockChanged(bool),
}

impl Applied {
    /// Whether the change affects the aggregated chart view.
    pub const fn affects_stats(&self) -> bool {
        matches!(
            self,
            Self::ItemAdded(_) | Self::ConsumptionAdded(_) | Self::MarkerAdded(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// All entities. Serializes to the snapshot artifact body; every
/// collection defaults to empty so older artifacts still load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStore {
    items: Vec<CatalogItem>,
    consumptions: Vec<ConsumptionRecord>,
    markers: Vec<Marker>,
    participants: Vec<Participant>,
    predictions: Vec<Prediction>,
    settings: Settings,
}

impl EventStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog items in creation order.
    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    /// Consumption log in insertion order (not necessarily chronological).
    pub fn consumptions(&self) -> &[ConsumptionRecord] {
        &self.consumptions
    }

    /// Marker log in insertion order.
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Participants in creation order.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// All predictions.
    pub fn predictions(&self) -> &[Prediction] {
        &self.predictions
    }

    /// The settings singleton.
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Look up a catalog item by name, ignoring case.
    pub fn item(&self, name: &str) -> Option<&CatalogItem> {
        self.items.iter().find(|item| item.matches(name))
    }

    /// Look up a participant by ID.
    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// Number of consumption records attributed to each participant.
    ///
    /// Participants with no records are present with a count of zero.
    pub fn consumption_counts(&self) -> HashMap<ParticipantId, u32> {
        let mut counts: HashMap<ParticipantId, u32> =
            self.participants.iter().map(|p| (p.id, 0)).collect();
        for record in &self.consumptions {
            if let Some(id) = record.participant_id
                && let Some(count) = counts.get_mut(&id)
            {
                *count = count.saturating_add(1);
            }
        }
        counts
    }

    /// Validate and commit one mutation.
    ///
    /// `now` stamps records submitted without an explicit time.
    pub fn apply(&mut self, mutation: Mutation, now: DateTime<Utc>) -> Result<Applied, Rejection> {
        match mutation {
            Mutation::AddItem(new) => self.add_item(new),
            Mutation::AddConsumption(new) => self.add_consumption(new, now),
            Mutation::AddMarker(new) => self.add_marker(new, now),
            Mutation::UpsertParticipant(upsert) => self.upsert_participant(upsert),
            Mutation::UpdateSelfEstimate {
                participant_id,
                self_estimate,
            } => self.update_self_estimate(participant_id, self_estimate),
            Mutation::UpsertPrediction(upsert) => self.upsert_prediction(upsert),
            Mutation::SetPasscode { passcode_hash } => self.set_passcode(passcode_hash),
            Mutation::SetPredictionsLocked { locked } => {
                let locked = locked.unwrap_or(!self.settings.predictions_locked);
                self.settings.predictions_locked = locked;
                Ok(Applied::PredictionsLockChanged(locked))
            }
        }
    }

    fn add_item(&mut self, new: NewItem) -> Result<Applied, Rejection> {
        let name = clean_name("name", &new.name, MAX_NAME_LEN)?;
        if self.item(&name).is_some() {
            return Err(Rejection::DuplicateName {
                entity: "item",
                name,
            });
        }
        let color = match new.color {
            Some(color) => clean_color(&color)?,
            None => {
                let slot = self.items.len().checked_rem(ITEM_PALETTE.len()).unwrap_or(0);
                ITEM_PALETTE.get(slot).copied().unwrap_or("#9b9b9b").to_owned()
            }
        };
        let item = CatalogItem {
            name,
            emoji: non_blank(new.emoji),
            image_ref: non_blank(new.image_ref),
            color,
        };
        self.items.push(item.clone());
        Ok(Applied::ItemAdded(item))
    }

    fn add_consumption(
        &mut self,
        new: NewConsumption,
        now: DateTime<Utc>,
    ) -> Result<Applied, Rejection> {
        let requested = new.item_name.trim();
        if requested.is_empty() {
            return Err(Rejection::invalid("item_name", "must not be empty"));
        }
        let item_name = self
            .item(requested)
            .map(|item| item.name.clone())
            .ok_or_else(|| Rejection::NotFound {
                entity: "item",
                key: requested.to_owned(),
            })?;
        if let Some(id) = new.participant_id
            && self.participant(id).is_none()
        {
            return Err(Rejection::NotFound {
                entity: "participant",
                key: id.to_string(),
            });
        }
        let record = ConsumptionRecord {
            item_name,
            participant_id: new.participant_id,
            occurred_at: new.occurred_at.unwrap_or(now),
        };
        self.consumptions.push(record.clone());
        Ok(Applied::ConsumptionAdded(record))
    }

    fn add_marker(&mut self, new: NewMarker, now: DateTime<Utc>) -> Result<Applied, Rejection> {
        let label = clean_name("label", &new.label, MAX_LABEL_LEN)?;
        let color = match new.color {
            Some(color) => clean_color(&color)?,
            None => DEFAULT_MARKER_COLOR.to_owned(),
        };
        let marker = Marker {
            label,
            color,
            occurred_at: new.occurred_at.unwrap_or(now),
        };
        self.markers.push(marker.clone());
        Ok(Applied::MarkerAdded(marker))
    }

    fn upsert_participant(&mut self, upsert: ParticipantUpsert) -> Result<Applied, Rejection> {
        let name = clean_name("name", &upsert.name, MAX_NAME_LEN)?;
        let locked = self.settings.predictions_locked;
        let avatar_ref = non_blank(upsert.avatar_ref);

        if let Some(existing) = self.participants.iter_mut().find(|p| p.matches(&name)) {
            if let Some(estimate) = upsert.self_estimate
                && estimate != existing.self_estimate
                && locked
            {
                return Err(Rejection::LockedForWrites);
            }
            if avatar_ref.is_some() {
                existing.avatar_ref = avatar_ref;
            }
            if let Some(estimate) = upsert.self_estimate {
                existing.self_estimate = estimate;
            }
            return Ok(Applied::ParticipantUpdated(existing.clone()));
        }

        if upsert.self_estimate.is_some() && locked {
            return Err(Rejection::LockedForWrites);
        }
        let participant = Participant {
            id: ParticipantId::new(),
            name,
            avatar_ref,
            self_estimate: upsert.self_estimate.unwrap_or(0),
        };
        self.participants.push(participant.clone());
        Ok(Applied::ParticipantAdded(participant))
    }

    fn update_self_estimate(
        &mut self,
        participant_id: ParticipantId,
        self_estimate: u32,
    ) -> Result<Applied, Rejection> {
        if self.settings.predictions_locked {
            return Err(Rejection::LockedForWrites);
        }
        let participant = self
            .participants
            .iter_mut()
            .find(|p| p.id == participant_id)
            .ok_or_else(|| Rejection::NotFound {
                entity: "participant",
                key: participant_id.to_string(),
            })?;
        participant.self_estimate = self_estimate;
        Ok(Applied::ParticipantUpdated(participant.clone()))
    }

    fn upsert_prediction(&mut self, upsert: PredictionUpsert) -> Result<Applied, Rejection> {
        if upsert.predictor_id == upsert.target_id {
            return Err(Rejection::SelfReferenceRejected);
        }
        if self.settings.predictions_locked {
            return Err(Rejection::LockedForWrites);
        }
        for id in [upsert.predictor_id, upsert.target_id] {
            if self.participant(id).is_none() {
                return Err(Rejection::NotFound {
                    entity: "participant",
                    key: id.to_string(),
                });
            }
        }

        if let Some(existing) = self.predictions.iter_mut().find(|p| {
            p.predictor_id == upsert.predictor_id && p.target_id == upsert.target_id
        }) {
            existing.predicted_drinks = upsert.predicted_drinks;
            return Ok(Applied::PredictionUpdated(existing.clone()));
        }

        let prediction = Prediction {
            id: PredictionId::new(),
            predictor_id: upsert.predictor_id,
            target_id: upsert.target_id,
            predicted_drinks: upsert.predicted_drinks,
        };
        self.predictions.push(prediction.clone());
        Ok(Applied::PredictionAdded(prediction))
    }

    fn set_passcode(&mut self, passcode_hash: String) -> Result<Applied, Rejection> {
        if self.settings.passcode_hash.is_some() {
            return Err(Rejection::AlreadySet("passcode"));
        }
        let hash = passcode_hash.trim();
        if hash.is_empty() {
            return Err(Rejection::invalid("passcode", "must not be empty"));
        }
        self.settings.passcode_hash = Some(hash.to_owned());
        Ok(Applied::PasscodeSet)
    }
}

// ---------------------------------------------------------------------------
// Field validation
// ---------------------------------------------------------------------------

fn clean_name(field: &'static str, raw: &str, max_len: usize) -> Result<String, Rejection> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Rejection::invalid(field, "must not be empty"));
    }
    if trimmed.chars().count() > max_len {
        return Err(Rejection::invalid(
            field,
            format!("must be at most {max_len} characters"),
        ));
    }
    Ok(trimmed.to_owned())
}

/// Accept `#rgb` or `#rrggbb`, normalized to lowercase.
fn clean_color(raw: &str) -> Result<String, Rejection> {
    let trimmed = raw.trim();
    let valid = trimmed.strip_prefix('#').is_some_and(|hex| {
        matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit())
    });
    if valid {
        Ok(trimmed.to_ascii_lowercase())
    } else {
        Err(Rejection::invalid("color", format!("{trimmed:?} is not a hex color")))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}
