//! Shared type definitions for Tallyboard.
//!
//! This crate is the single source of truth for the entities the event
//! store owns, the views derived from them, and the messages pushed to
//! live dashboards. Types flow downstream to `TypeScript` via `ts-rs`.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for participant and prediction IDs
//! - [`structs`] -- Catalog items, consumption and marker logs, participants,
//!   predictions, settings
//! - [`views`] -- Aggregated stats, history series, awards
//! - [`stream`] -- Live stream message enum and audience topics

pub mod ids;
pub mod stream;
pub mod structs;
pub mod views;

// Re-export all public types at crate root for convenience.
pub use ids::{ParticipantId, PredictionId};
pub use stream::{StreamEvent, Topic};
pub use structs::{
    CatalogItem, ConsumptionRecord, Marker, Participant, Prediction, Settings, SettingsView,
};
pub use views::{
    Award, AwardKind, AwardWinner, Bucket, DashboardStats, HistorySeries, ParticipantStanding,
    WindowedStats,
};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        // Calling export_all writes the `.ts` files to `bindings/`
        // relative to the crate root.
        use ts_rs::TS;

        let _ = crate::ParticipantId::export_all();
        let _ = crate::PredictionId::export_all();
        let _ = crate::CatalogItem::export_all();
        let _ = crate::ConsumptionRecord::export_all();
        let _ = crate::Marker::export_all();
        let _ = crate::Participant::export_all();
        let _ = crate::Prediction::export_all();
        let _ = crate::SettingsView::export_all();
        let _ = crate::DashboardStats::export_all();
        let _ = crate::HistorySeries::export_all();
        let _ = crate::Award::export_all();
        let _ = crate::ParticipantStanding::export_all();
        let _ = crate::StreamEvent::export_all();
    }
}
