//! Axum router construction for the Ingress API.
//!
//! Assembles all routes (REST, SSE, `WebSocket`) into a single [`Router`]
//! with CORS enabled so dashboards served from elsewhere can connect.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{admin, handlers, sse, ws};

/// Build the complete Axum router.
///
/// See [`handlers`] and [`admin`] for the endpoint tables; the live
/// stream is served at `GET /api/stream` (SSE) and `GET /ws/stream`
/// (`WebSocket`).
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handlers::health))
        // Streams
        .route("/api/stream", get(sse::sse_stream))
        .route("/ws/stream", get(ws::ws_stream))
        // Catalog and logs
        .route(
            "/api/items",
            get(handlers::list_items).post(handlers::create_item),
        )
        .route("/api/consumptions", post(handlers::record_consumption))
        .route("/api/markers", post(handlers::add_marker))
        // Derived views
        .route("/api/stats", get(handlers::get_stats))
        .route("/api/stats/history", get(handlers::get_history))
        .route("/api/awards", get(handlers::get_awards))
        // Participants and predictions
        .route(
            "/api/participants",
            get(handlers::list_participants).post(handlers::upsert_participant),
        )
        .route(
            "/api/participants/{id}/estimate",
            put(handlers::update_estimate),
        )
        .route(
            "/api/predictions",
            get(handlers::list_predictions).post(handlers::upsert_prediction),
        )
        // Settings
        .route("/api/settings", get(handlers::get_settings))
        .route("/api/settings/passcode", post(handlers::set_passcode))
        .route("/api/settings/verify", post(handlers::verify_passcode))
        .route("/api/settings/lock", post(handlers::set_lock))
        // Snapshot administration
        .route(
            "/api/snapshots",
            get(admin::list_snapshots).post(admin::force_snapshot),
        )
        .route("/api/snapshots/{id}", get(admin::download_snapshot))
        .route("/api/snapshots/{id}/restore", post(admin::restore_snapshot))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
