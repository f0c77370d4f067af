//! REST endpoint handlers for the Ingress API.
//!
//! Each mutating endpoint maps to exactly one [`Mutation`] and goes
//! through [`AppState::commit`]; read endpoints compute from a consistent
//! read view of the store.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/health` | Liveness probe |
//! | `GET` | `/api/items` | Catalog |
//! | `POST` | `/api/items` | Create a catalog item |
//! | `POST` | `/api/consumptions` | Record a consumption |
//! | `POST` | `/api/markers` | Place a marker |
//! | `GET` | `/api/stats` | Current dashboard stats |
//! | `GET` | `/api/stats/history` | Full bucketed history |
//! | `GET` | `/api/awards` | Current awards |
//! | `GET` | `/api/participants` | Participants with counts (protected) |
//! | `POST` | `/api/participants` | Create or update a participant by name |
//! | `PUT` | `/api/participants/{id}/estimate` | Change a self-estimate |
//! | `GET` | `/api/predictions` | All predictions (protected) |
//! | `POST` | `/api/predictions` | Create or overwrite a prediction |
//! | `GET` | `/api/settings` | Public settings view |
//! | `POST` | `/api/settings/passcode` | Set the passcode (once) |
//! | `POST` | `/api/settings/verify` | Check a passcode |
//! | `POST` | `/api/settings/lock` | Set or toggle the prediction lock (protected) |

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use tallyboard_core::store::{
    NewConsumption, NewItem, NewMarker, ParticipantUpsert, PredictionUpsert,
};
use tallyboard_core::{Applied, Mutation, Rejection, aggregate, awards};
use tallyboard_types::{CatalogItem, ParticipantId, ParticipantStanding, Prediction, SettingsView};
use tracing::info;

use crate::auth::hash_passcode;
use crate::error::ApiError;
use crate::state::AppState;

/// Body of a JSON request, with malformed bodies mapped to 400.
type Body<T> = Result<Json<T>, JsonRejection>;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Body for `PUT /api/participants/{id}/estimate`.
#[derive(Debug, Deserialize)]
pub struct EstimateRequest {
    /// New self-estimate.
    pub self_estimate: u32,
}

/// Body for `POST /api/settings/passcode` and `POST /api/settings/verify`.
#[derive(Debug, Deserialize)]
pub struct PasscodeRequest {
    /// Plain-text passcode. Only its hash is kept.
    pub passcode: String,
}

/// Body for `POST /api/settings/lock`.
#[derive(Debug, Default, Deserialize)]
pub struct LockRequest {
    /// Desired lock state; omitted to toggle.
    #[serde(default)]
    pub locked: Option<bool>,
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Liveness probe.
#[allow(clippy::unused_async)]
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// The catalog in creation order.
pub async fn list_items(State(state): State<Arc<AppState>>) -> Json<Vec<CatalogItem>> {
    Json(state.store.read(|store| store.items().to_vec()).await)
}

/// Current dashboard stats (same payload as the `stats` stream message).
pub async fn get_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.current_stats().await)
}

/// Dense history from the first record's bucket to now.
pub async fn get_history(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let now = Utc::now();
    let history = state
        .store
        .read(|store| aggregate::history(store, now, state.window()))
        .await;
    Json(history)
}

/// Current awards.
pub async fn get_awards(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.read(awards::awards_for).await)
}

/// Participants with their consumption counts. Protected.
pub async fn list_participants(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ParticipantStanding>>, ApiError> {
    state.require_authorized(&headers).await?;
    let standings: Vec<ParticipantStanding> = state
        .store
        .read(|store| {
            let counts = store.consumption_counts();
            store
                .participants()
                .iter()
                .map(|p| ParticipantStanding {
                    participant: p.clone(),
                    consumed: counts.get(&p.id).copied().unwrap_or(0),
                })
                .collect()
        })
        .await;
    Ok(Json(standings))
}

/// All predictions. Protected.
pub async fn list_predictions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Prediction>>, ApiError> {
    state.require_authorized(&headers).await?;
    Ok(Json(
        state.store.read(|store| store.predictions().to_vec()).await,
    ))
}

/// Public view of the settings; never exposes the hash.
pub async fn get_settings(State(state): State<Arc<AppState>>) -> Json<SettingsView> {
    Json(
        state
            .store
            .read(|store| SettingsView::from(store.settings()))
            .await,
    )
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// Create a catalog item.
pub async fn create_item(
    State(state): State<Arc<AppState>>,
    body: Body<NewItem>,
) -> Result<Response, ApiError> {
    let Json(new) = body?;
    let (applied, _) = state.commit(Mutation::AddItem(new)).await?;
    Ok(applied_response(applied))
}

/// Record a consumption.
pub async fn record_consumption(
    State(state): State<Arc<AppState>>,
    body: Body<NewConsumption>,
) -> Result<Response, ApiError> {
    let Json(new) = body?;
    let (applied, _) = state.commit(Mutation::AddConsumption(new)).await?;
    Ok(applied_response(applied))
}

/// Place a marker on the timeline.
pub async fn add_marker(
    State(state): State<Arc<AppState>>,
    body: Body<NewMarker>,
) -> Result<Response, ApiError> {
    let Json(new) = body?;
    let (applied, _) = state.commit(Mutation::AddMarker(new)).await?;
    Ok(applied_response(applied))
}

/// Create a participant, or update the one with the same name.
pub async fn upsert_participant(
    State(state): State<Arc<AppState>>,
    body: Body<ParticipantUpsert>,
) -> Result<Response, ApiError> {
    let Json(upsert) = body?;
    let (applied, _) = state.commit(Mutation::UpsertParticipant(upsert)).await?;
    Ok(applied_response(applied))
}

/// Change a participant's self-estimate.
pub async fn update_estimate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Body<EstimateRequest>,
) -> Result<Response, ApiError> {
    let participant_id: ParticipantId = id
        .parse()
        .map_err(|e| ApiError::InvalidPath(format!("{id}: {e}")))?;
    let Json(request) = body?;
    let (applied, _) = state
        .commit(Mutation::UpdateSelfEstimate {
            participant_id,
            self_estimate: request.self_estimate,
        })
        .await?;
    Ok(applied_response(applied))
}

/// Create or overwrite the prediction for a `(predictor, target)` pair.
pub async fn upsert_prediction(
    State(state): State<Arc<AppState>>,
    body: Body<PredictionUpsert>,
) -> Result<Response, ApiError> {
    let Json(upsert) = body?;
    let (applied, _) = state.commit(Mutation::UpsertPrediction(upsert)).await?;
    Ok(applied_response(applied))
}

/// Set the passcode. Write-once.
pub async fn set_passcode(
    State(state): State<Arc<AppState>>,
    body: Body<PasscodeRequest>,
) -> Result<Response, ApiError> {
    let Json(request) = body?;
    if request.passcode.trim().is_empty() {
        return Err(Rejection::Validation {
            field: "passcode",
            reason: "must not be empty".to_owned(),
        }
        .into());
    }
    let (applied, _) = state
        .commit(Mutation::SetPasscode {
            passcode_hash: hash_passcode(&request.passcode),
        })
        .await?;
    info!("Passcode set");
    Ok(applied_response(applied))
}

/// Check a passcode against the stored hash without changing anything.
pub async fn verify_passcode(
    State(state): State<Arc<AppState>>,
    body: Body<PasscodeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(request) = body?;
    let candidate = hash_passcode(&request.passcode);
    let valid = state
        .store
        .read(|store| store.settings().passcode_hash.as_deref() == Some(candidate.as_str()))
        .await;
    Ok(Json(serde_json::json!({ "valid": valid })))
}

/// Set or toggle the prediction lock. Protected.
pub async fn set_lock(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body<LockRequest>,
) -> Result<Response, ApiError> {
    state.require_authorized(&headers).await?;
    let Json(request) = body?;
    let (applied, _) = state
        .commit(Mutation::SetPredictionsLocked {
            locked: request.locked,
        })
        .await?;
    if let Applied::PredictionsLockChanged(locked) = applied {
        info!(locked, "Prediction lock changed");
    }
    Ok(applied_response(applied))
}

/// HTTP response for a committed change: `201` for new entities, `200`
/// for updates.
fn applied_response(applied: Applied) -> Response {
    match applied {
        Applied::ItemAdded(item) => (StatusCode::CREATED, Json(item)).into_response(),
        Applied::ConsumptionAdded(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Applied::MarkerAdded(marker) => (StatusCode::CREATED, Json(marker)).into_response(),
        Applied::ParticipantAdded(p) => (StatusCode::CREATED, Json(p)).into_response(),
        Applied::ParticipantUpdated(p) => Json(p).into_response(),
        Applied::PredictionAdded(p) => (StatusCode::CREATED, Json(p)).into_response(),
        Applied::PredictionUpdated(p) => Json(p).into_response(),
        Applied::PasscodeSet => Json(serde_json::json!({ "passcode_set": true })).into_response(),
        Applied::PredictionsLockChanged(locked) => {
            Json(serde_json::json!({ "predictions_locked": locked })).into_response()
        }
    }
}
