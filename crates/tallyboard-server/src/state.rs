//! Shared application state for the Ingress API.
//!
//! [`AppState`] owns the one [`SharedStore`] for the process together
//! with the hub, the snapshot manager, and the historical baseline. It is
//! built once at startup and handed to handlers and background tasks as
//! an `Arc`; nothing here is a global.
//!
//! Every write goes through [`AppState::commit`], which validates,
//! mutates, recomputes, and publishes while holding the store's write
//! lock, so subscribers see messages in commit order.

use std::sync::{Arc, PoisonError, RwLock};

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use tallyboard_core::aggregate::{self, Baseline, WindowSpec};
use tallyboard_core::{Applied, EventStore, Mutation, Rejection, SharedStore, TallyConfig};
use tallyboard_snapshot::{SnapshotError, SnapshotId, SnapshotManager};
use tallyboard_types::{DashboardStats, StreamEvent};
use tracing::{debug, info};

use crate::auth::{AccessPolicy, PasscodeHeader};
use crate::error::ApiError;
use crate::hub::{Hub, Subscription};

/// Shared state for the Axum application.
pub struct AppState {
    /// The event store and its serialization point.
    pub store: SharedStore,
    /// Live subscriber registry.
    pub hub: Hub,
    /// Snapshot persistence.
    pub snapshots: SnapshotManager,
    window: WindowSpec,
    baseline: RwLock<Baseline>,
    access: Arc<dyn AccessPolicy>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("hub", &self.hub)
            .field("snapshots", &self.snapshots)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// State with an empty store.
    pub fn new(
        snapshots: SnapshotManager,
        window: WindowSpec,
        subscriber_buffer: usize,
        access: Arc<dyn AccessPolicy>,
    ) -> Self {
        Self {
            store: SharedStore::default(),
            hub: Hub::new(subscriber_buffer),
            snapshots,
            window,
            baseline: RwLock::new(Baseline::empty()),
            access,
        }
    }

    /// State wired from configuration with the passcode-header gate.
    pub fn from_config(config: &TallyConfig) -> Self {
        let retention = usize::try_from(config.snapshots.retention).unwrap_or(usize::MAX);
        Self::new(
            SnapshotManager::new(config.snapshots.directory.clone(), retention),
            config.aggregation.window_spec(),
            config.stream.subscriber_buffer,
            Arc::new(PasscodeHeader),
        )
    }

    /// Bucketing parameters in use.
    pub const fn window(&self) -> &WindowSpec {
        &self.window
    }

    /// Full dashboard stats for `store` at `now`.
    pub fn stats_for(&self, store: &EventStore, now: DateTime<Utc>) -> DashboardStats {
        let baseline = self.baseline.read().unwrap_or_else(PoisonError::into_inner);
        aggregate::dashboard_stats(store, now, &self.window, &baseline)
    }

    /// Current dashboard stats.
    pub async fn current_stats(&self) -> DashboardStats {
        let now = Utc::now();
        self.store.read(|store| self.stats_for(store, now)).await
    }

    /// Validate and commit one mutation, then publish what changed.
    ///
    /// Returns the applied change and how many subscribers the resulting
    /// messages were queued for.
    pub async fn commit(&self, mutation: Mutation) -> Result<(Applied, usize), Rejection> {
        self.store
            .commit(mutation, |store, applied, now| {
                match applied {
                    Applied::ConsumptionAdded(record) => self
                        .baseline
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .absorb(&self.window, record),
                    // Streams authorized under setup mode must not outlive it.
                    Applied::PasscodeSet => {
                        let closed = self.hub.close_private();
                        info!(subscribers = closed, "Passcode set, private streams closed");
                    }
                    _ => {}
                }
                let mut delivered = 0_usize;
                if let Some(event) = change_event(applied) {
                    delivered = self.hub.publish(&event);
                }
                if applied.affects_stats() {
                    let stats = self.stats_for(store, now);
                    delivered = delivered.saturating_add(
                        self.hub.publish(&StreamEvent::Stats(Box::new(stats))),
                    );
                }
                delivered
            })
            .await
    }

    /// Recompute and push the full stats view to every subscriber.
    pub async fn publish_stats(&self) -> usize {
        let now = Utc::now();
        self.store
            .read(|store| {
                let stats = self.stats_for(store, now);
                self.hub.publish(&StreamEvent::Stats(Box::new(stats)))
            })
            .await
    }

    /// Recompute the historical baseline from the whole log.
    pub async fn refresh_baseline(&self) {
        let now = Utc::now();
        self.store
            .read(|store| {
                let fresh = aggregate::compute_baseline(store, now, &self.window);
                *self.baseline.write().unwrap_or_else(PoisonError::into_inner) = fresh;
            })
            .await;
        debug!("Historical baseline refreshed");
    }

    /// Whether the caller behind `headers` may use protected operations.
    pub async fn is_authorized(&self, headers: &HeaderMap) -> bool {
        self.store
            .read(|store| self.access.is_authorized(headers, store.settings()))
            .await
    }

    /// Fail with [`ApiError::Unauthorized`] unless the caller is authorized.
    pub async fn require_authorized(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        if self.is_authorized(headers).await {
            Ok(())
        } else {
            Err(ApiError::Unauthorized)
        }
    }

    /// Register a live subscriber whose first message is the current stats.
    pub async fn subscribe(&self, headers: &HeaderMap) -> Subscription {
        let now = Utc::now();
        self.store
            .read(|store| {
                let authorized = self.access.is_authorized(headers, store.settings());
                let stats = self.stats_for(store, now);
                self.hub
                    .subscribe(authorized, &StreamEvent::Stats(Box::new(stats)))
            })
            .await
    }

    /// Save a point-in-time copy of the store.
    pub async fn save_snapshot(&self) -> Result<SnapshotId, SnapshotError> {
        let copy = self.store.snapshot().await;
        self.snapshots.save(&copy).await
    }

    /// Replace the live store with artifact `id` and push fresh stats.
    pub async fn restore_snapshot(&self, id: SnapshotId) -> Result<(), SnapshotError> {
        let restored = self.snapshots.load(id).await?;
        let now = Utc::now();
        let delivered = self
            .store
            .replace(restored, |store| {
                let fresh = aggregate::compute_baseline(store, now, &self.window);
                *self.baseline.write().unwrap_or_else(PoisonError::into_inner) = fresh;
                let stats = self.stats_for(store, now);
                self.hub.publish(&StreamEvent::Stats(Box::new(stats)))
            })
            .await;
        info!(snapshot = %id, subscribers = delivered, "Live store replaced from snapshot");
        Ok(())
    }
}

/// The stream message announcing a committed change, if it has one.
fn change_event(applied: &Applied) -> Option<StreamEvent> {
    match applied {
        Applied::ItemAdded(item) => Some(StreamEvent::ItemAdded(item.clone())),
        Applied::ConsumptionAdded(record) => Some(StreamEvent::Consumption(record.clone())),
        Applied::MarkerAdded(marker) => Some(StreamEvent::MarkerAdded(marker.clone())),
        Applied::ParticipantAdded(p) => Some(StreamEvent::ParticipantAdded(p.clone())),
        Applied::ParticipantUpdated(p) => Some(StreamEvent::ParticipantUpdated(p.clone())),
        Applied::PredictionAdded(p) => Some(StreamEvent::PredictionAdded(p.clone())),
        Applied::PredictionUpdated(p) => Some(StreamEvent::PredictionUpdated(p.clone())),
        Applied::PredictionsLockChanged(locked) => {
            Some(StreamEvent::PredictionsLockChanged { locked: *locked })
        }
        Applied::PasscodeSet => None,
    }
}
