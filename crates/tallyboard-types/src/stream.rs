//! Messages pushed to live dashboard subscribers.
//!
//! Each message is a type tag plus a structured payload. The tag doubles
//! as the SSE `event:` name; WebSocket clients receive
//! `{"type": tag, "data": payload}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::structs::{CatalogItem, ConsumptionRecord, Marker, Participant, Prediction};
use crate::views::DashboardStats;

/// Audience a message is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Every subscriber receives it.
    Public,
    /// Only subscribers the session layer authorized receive it.
    Private,
}

/// A message on the live event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
#[ts(export, export_to = "bindings/")]
pub enum StreamEvent {
    /// Full aggregate view.
    Stats(Box<DashboardStats>),
    /// A consumption was recorded.
    Consumption(ConsumptionRecord),
    /// A catalog item was created.
    ItemAdded(CatalogItem),
    /// A marker was placed.
    MarkerAdded(Marker),
    /// A participant joined.
    ParticipantAdded(Participant),
    /// A participant's avatar or self-estimate changed.
    ParticipantUpdated(Participant),
    /// A new prediction was made.
    PredictionAdded(Prediction),
    /// An existing prediction was overwritten.
    PredictionUpdated(Prediction),
    /// The prediction lock flipped.
    PredictionsLockChanged {
        /// New lock state.
        locked: bool,
    },
    /// Liveness signal independent of data events.
    Heartbeat {
        /// Server time when the heartbeat was sent.
        at: DateTime<Utc>,
    },
}

impl StreamEvent {
    /// The message type tag.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Stats(_) => "stats",
            Self::Consumption(_) => "consumption",
            Self::ItemAdded(_) => "item-added",
            Self::MarkerAdded(_) => "marker-added",
            Self::ParticipantAdded(_) => "participant-added",
            Self::ParticipantUpdated(_) => "participant-updated",
            Self::PredictionAdded(_) => "prediction-added",
            Self::PredictionUpdated(_) => "prediction-updated",
            Self::PredictionsLockChanged { .. } => "predictions-lock-changed",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }

    /// Which audience may receive this message.
    pub const fn topic(&self) -> Topic {
        match self {
            Self::ParticipantAdded(_)
            | Self::ParticipantUpdated(_)
            | Self::PredictionAdded(_)
            | Self::PredictionUpdated(_) => Topic::Private,
            _ => Topic::Public,
        }
    }

    /// Serialize only the payload part, without the type tag.
    pub fn payload_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Stats(stats) => serde_json::to_string(stats),
            Self::Consumption(record) => serde_json::to_string(record),
            Self::ItemAdded(item) => serde_json::to_string(item),
            Self::MarkerAdded(marker) => serde_json::to_string(marker),
            Self::ParticipantAdded(p) | Self::ParticipantUpdated(p) => serde_json::to_string(p),
            Self::PredictionAdded(p) | Self::PredictionUpdated(p) => serde_json::to_string(p),
            Self::PredictionsLockChanged { locked } => {
                serde_json::to_string(&serde_json::json!({ "locked": locked }))
            }
            Self::Heartbeat { at } => serde_json::to_string(&serde_json::json!({ "at": at })),
        }
    }
}
