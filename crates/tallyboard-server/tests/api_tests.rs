//! Integration tests for the Ingress API endpoints.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server. Snapshots go to a per-test temporary directory.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use futures::StreamExt;
use serde_json::{Value, json};
use tallyboard_core::aggregate::WindowSpec;
use tallyboard_server::{
    AccessPolicy, AllowAll, AppState, DenyAll, PASSCODE_HEADER, PasscodeHeader, build_router,
};
use tallyboard_snapshot::SnapshotManager;
use tower::ServiceExt;

fn make_state(dir: &Path, access: Arc<dyn AccessPolicy>) -> Arc<AppState> {
    Arc::new(AppState::new(
        SnapshotManager::new(dir, 30),
        WindowSpec::default(),
        16,
        access,
    ))
}

fn make_app(dir: &Path, access: Arc<dyn AccessPolicy>) -> Router {
    build_router(make_state(dir, access))
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    passcode: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(passcode) = passcode {
        builder = builder.header(PASSCODE_HEADER, passcode);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    call(app, "GET", uri, None, None).await
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    call(app, "POST", uri, Some(body), None).await
}

async fn join(app: &Router, name: &str) -> String {
    let (status, body) = post(app, "/api/participants", json!({ "name": name })).await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_owned()
}

// =========================================================================
// Catalog, consumptions, markers
// =========================================================================

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(dir.path(), Arc::new(AllowAll));
    let request = Request::builder()
        .uri("/api/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_to_json(response.into_body()).await["status"], "ok");
}

#[tokio::test]
async fn item_names_are_unique_ignoring_case() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(dir.path(), Arc::new(AllowAll));

    let (status, item) = post(&app, "/api/items", json!({ "name": "Beer", "emoji": "🍺" })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(item["name"], "Beer");
    assert!(item["color"].as_str().unwrap().starts_with('#'));

    let (status, err) = post(&app, "/api/items", json!({ "name": "BEER" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["status"], 409);

    let (_, items) = get(&app, "/api/items").await;
    assert_eq!(items.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(dir.path(), Arc::new(AllowAll));

    let (status, _) = post(&app, "/api/consumptions", json!({ "participant_id": null })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(&app, "/api/items", json!({ "name": "   " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(&app, "/api/items", json!({ "name": "Wine", "color": "red" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn consumption_requires_a_known_item() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(dir.path(), Arc::new(AllowAll));

    let (status, _) = post(&app, "/api/consumptions", json!({ "item_name": "Mead" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    post(&app, "/api/items", json!({ "name": "Mead" })).await;
    let (status, record) = post(&app, "/api/consumptions", json!({ "item_name": "mead" })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(record["item_name"], "Mead");
}

#[tokio::test]
async fn stats_reflect_recorded_consumptions_and_markers() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(dir.path(), Arc::new(AllowAll));
    post(&app, "/api/items", json!({ "name": "Beer" })).await;
    for _ in 0..3 {
        post(&app, "/api/consumptions", json!({ "item_name": "Beer" })).await;
    }
    let (status, _) = post(&app, "/api/markers", json!({ "label": "Kickoff" })).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, stats) = get(&app, "/api/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["window"]["buckets"].as_array().unwrap().len(), 60);
    assert_eq!(stats["total_consumed"], 3);
    assert_eq!(stats["totals"]["Beer"], 3);
    assert_eq!(stats["window_totals"]["Beer"], 3);
    assert_eq!(stats["window"]["recent_markers"][0]["label"], "Kickoff");

    let (status, history) = get(&app, "/api/stats/history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["totals"]["Beer"], 3);
    assert!(!history["buckets"].as_array().unwrap().is_empty());
}

// =========================================================================
// Participants, predictions, lock
// =========================================================================

#[tokio::test]
async fn participant_upsert_by_name_updates_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(dir.path(), Arc::new(AllowAll));
    let id = join(&app, "Ada").await;

    let (status, updated) = post(
        &app,
        "/api/participants",
        json!({ "name": "ada", "self_estimate": 4 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["id"], id.as_str());
    assert_eq!(updated["self_estimate"], 4);

    let (status, list) = get(&app, "/api/participants").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["consumed"], 0);
}

#[tokio::test]
async fn self_estimate_endpoint_checks_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(dir.path(), Arc::new(AllowAll));
    let id = join(&app, "Ada").await;

    let (status, p) = call(
        &app,
        "PUT",
        &format!("/api/participants/{id}/estimate"),
        Some(json!({ "self_estimate": 7 })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(p["self_estimate"], 7);

    let (status, _) = call(
        &app,
        "PUT",
        "/api/participants/not-a-uuid/estimate",
        Some(json!({ "self_estimate": 1 })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        "PUT",
        "/api/participants/0190b5d4-0000-7000-8000-000000000000/estimate",
        Some(json!({ "self_estimate": 1 })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn self_prediction_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(dir.path(), Arc::new(AllowAll));
    let a = join(&app, "Ada").await;

    let (status, _) = post(
        &app,
        "/api/predictions",
        json!({ "predictor_id": a, "target_id": a, "predicted_drinks": 3 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn lock_blocks_prediction_writes_until_toggled_back() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(dir.path(), Arc::new(AllowAll));
    let a = join(&app, "Ada").await;
    let b = join(&app, "Bo").await;
    let guess = json!({ "predictor_id": a, "target_id": b, "predicted_drinks": 3 });

    let (status, body) = post(&app, "/api/settings/lock", json!({ "locked": true })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["predictions_locked"], true);

    let (status, _) = post(&app, "/api/predictions", guess.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Omitting `locked` toggles.
    let (_, body) = post(&app, "/api/settings/lock", json!({})).await;
    assert_eq!(body["predictions_locked"], false);

    let (status, prediction) = post(&app, "/api/predictions", guess).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(prediction["predicted_drinks"], 3);

    let (status, again) = post(
        &app,
        "/api/predictions",
        json!({ "predictor_id": a, "target_id": b, "predicted_drinks": 5 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["id"], prediction["id"]);

    let (_, predictions) = get(&app, "/api/predictions").await;
    assert_eq!(predictions.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn awards_follow_predictions_and_counts() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(dir.path(), Arc::new(AllowAll));
    post(&app, "/api/items", json!({ "name": "Beer" })).await;
    let a = join(&app, "A").await;
    let b = join(&app, "B").await;
    post(
        &app,
        "/api/predictions",
        json!({ "predictor_id": a, "target_id": b, "predicted_drinks": 5 }),
    )
    .await;
    post(
        &app,
        "/api/predictions",
        json!({ "predictor_id": b, "target_id": a, "predicted_drinks": 3 }),
    )
    .await;
    for (who, n) in [(&a, 4), (&b, 5)] {
        for _ in 0..n {
            post(
                &app,
                "/api/consumptions",
                json!({ "item_name": "Beer", "participant_id": who }),
            )
            .await;
        }
    }

    let (status, awards) = get(&app, "/api/awards").await;
    assert_eq!(status, StatusCode::OK);
    let find = |kind: &str| {
        awards
            .as_array()
            .unwrap()
            .iter()
            .find(|award| award["kind"] == kind)
            .unwrap()
            .clone()
    };
    assert_eq!(find("best_predictor")["winners"][0]["participant_id"], a.as_str());
    assert_eq!(find("worst_predictor")["winners"][0]["participant_id"], b.as_str());
    assert_eq!(find("most_consumed")["winners"][0]["participant_id"], b.as_str());
}

// =========================================================================
// Session gate and passcode
// =========================================================================

#[tokio::test]
async fn protected_reads_need_authorization() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(dir.path(), Arc::new(DenyAll));

    for uri in ["/api/participants", "/api/predictions", "/api/snapshots"] {
        let (status, body) = get(&app, uri).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(body["status"], 401);
    }
    let (status, _) = post(&app, "/api/settings/lock", json!({ "locked": true })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Public reads stay open.
    let (status, _) = get(&app, "/api/awards").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn passcode_is_write_once_and_gates_protected_calls() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(dir.path(), Arc::new(PasscodeHeader));

    let (_, settings) = get(&app, "/api/settings").await;
    assert_eq!(settings["passcode_set"], false);

    // Setup mode: no passcode yet, so protected reads are open.
    let (status, _) = get(&app, "/api/participants").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(&app, "/api/settings/passcode", json!({ "passcode": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(&app, "/api/settings/passcode", json!({ "passcode": "hunter2" })).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post(&app, "/api/settings/passcode", json!({ "passcode": "other" })).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, settings) = get(&app, "/api/settings").await;
    assert_eq!(settings["passcode_set"], true);
    assert!(settings.get("passcode_hash").is_none());

    let (status, _) = get(&app, "/api/participants").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = call(&app, "GET", "/api/participants", None, Some("hunter2")).await;
    assert_eq!(status, StatusCode::OK);

    let (_, verdict) = post(&app, "/api/settings/verify", json!({ "passcode": "hunter2" })).await;
    assert_eq!(verdict["valid"], true);
    let (_, verdict) = post(&app, "/api/settings/verify", json!({ "passcode": "nope" })).await;
    assert_eq!(verdict["valid"], false);
}

// =========================================================================
// Snapshot administration
// =========================================================================

#[tokio::test]
async fn snapshot_save_list_download_restore() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(dir.path(), Arc::new(AllowAll));
    post(&app, "/api/items", json!({ "name": "Beer" })).await;
    post(&app, "/api/consumptions", json!({ "item_name": "Beer" })).await;

    let (status, saved) = call(&app, "POST", "/api/snapshots", None, None).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = saved["id"].as_str().unwrap().to_owned();
    assert!(id.starts_with("snapshot-"));

    let (_, listed) = get(&app, "/api/snapshots").await;
    assert_eq!(listed[0]["id"], id.as_str());
    assert!(listed[0]["size_bytes"].as_u64().unwrap() > 0);

    let (status, artifact) = get(&app, &format!("/api/snapshots/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(artifact["format_version"], 2);
    assert_eq!(artifact["consumptions"].as_array().unwrap().len(), 1);

    // More drinks after the save are rolled back by the restore.
    post(&app, "/api/consumptions", json!({ "item_name": "Beer" })).await;
    let (status, _) = call(&app, "POST", &format!("/api/snapshots/{id}/restore"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, stats) = get(&app, "/api/stats").await;
    assert_eq!(stats["total_consumed"], 1);
}

#[tokio::test]
async fn snapshot_ids_are_validated() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(dir.path(), Arc::new(AllowAll));

    let (status, _) = get(&app, "/api/snapshots/passwd").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&app, "/api/snapshots/snapshot-0000000000000001").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =========================================================================
// Streams
// =========================================================================

#[tokio::test]
async fn sse_stream_opens_with_stats() {
    let dir = tempfile::tempdir().unwrap();
    let state = make_state(dir.path(), Arc::new(AllowAll));
    let app = build_router(Arc::clone(&state));

    let request = Request::builder()
        .uri("/api/stream")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    assert_eq!(state.hub.subscriber_count(), 1);

    let mut chunks = response.into_body().into_data_stream();
    let first = chunks.next().await.unwrap().unwrap();
    let text = String::from_utf8(first.to_vec()).unwrap();
    assert!(text.contains("event: stats"), "{text}");
    assert!(text.contains("\"total_consumed\":0"), "{text}");

    drop(chunks);
    assert_eq!(state.hub.subscriber_count(), 0);
}
