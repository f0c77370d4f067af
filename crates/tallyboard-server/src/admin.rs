//! Snapshot administration endpoints. All of them are protected.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/snapshots` | List artifacts, newest first |
//! | `POST` | `/api/snapshots` | Save one now |
//! | `GET` | `/api/snapshots/{id}` | Download the raw artifact |
//! | `POST` | `/api/snapshots/{id}/restore` | Replace the live store with it |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tallyboard_snapshot::{SnapshotId, SnapshotInfo};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// List artifacts, newest first.
pub async fn list_snapshots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<SnapshotInfo>>, ApiError> {
    state.require_authorized(&headers).await?;
    Ok(Json(state.snapshots.list().await?))
}

/// Save a snapshot now and report its identifier.
pub async fn force_snapshot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    state.require_authorized(&headers).await?;
    let id = state.save_snapshot().await.inspect_err(|e| {
        warn!(error = %e, "Requested snapshot failed");
    })?;
    info!(snapshot = %id, "Snapshot saved on request");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": id, "saved_at": id.saved_at() })),
    )
        .into_response())
}

/// Download one artifact as stored on disk.
pub async fn download_snapshot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    state.require_authorized(&headers).await?;
    let id: SnapshotId = id.parse()?;
    let bytes = state.snapshots.read_raw(id).await?;
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", id.file_name()))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// Replace the live store with one artifact.
pub async fn restore_snapshot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.require_authorized(&headers).await?;
    let id: SnapshotId = id.parse()?;
    state.restore_snapshot(id).await?;
    Ok(Json(serde_json::json!({ "restored": id })))
}
