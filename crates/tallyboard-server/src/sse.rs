//! Server-Sent Events transport for the live stream.
//!
//! Clients connect to `GET /api/stream`. Each hub frame becomes one SSE
//! event whose `event:` is the message type and whose `data:` is the JSON
//! payload. When the client goes away Axum drops the stream, which drops
//! the [`Subscription`](crate::hub::Subscription) and unregisters it.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::response::sse::{Event, Sse};
use futures::stream;

use crate::state::AppState;

/// Open an SSE stream. The first event is always `stats`.
///
/// # Route
///
/// `GET /api/stream`
pub async fn sse_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let subscription = state.subscribe(&headers).await;

    let events = stream::unfold(subscription, |mut subscription| async move {
        let frame = subscription.recv().await?;
        let event = Event::default().event(frame.name).data(frame.data.as_str());
        Some((Ok::<_, Infallible>(event), subscription))
    });

    Sse::new(events)
}
