//! Timer-driven background work.
//!
//! Each task is an independent Tokio task that touches the store only
//! through [`AppState`], so it queues at the same serialization point as
//! requests and never calls into a handler.
//!
//! | Task | Default period | Effect |
//! |------|----------------|--------|
//! | heartbeat | 15 s | publishes `heartbeat` |
//! | stats refresh | 30 s | publishes `stats` so the window slides |
//! | baseline refresh | 60 s | recomputes cumulative totals before the window |
//! | snapshot | 120 s | saves and prunes artifacts |

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tallyboard_core::TallyConfig;
use tallyboard_types::StreamEvent;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Handles of the running background tasks.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Start every periodic task configured in `config`.
    pub fn spawn(state: &Arc<AppState>, config: &TallyConfig) -> Self {
        let mut tasks = Self::default();

        tasks.every("heartbeat", config.stream.heartbeat_seconds, state, |state| async move {
            let delivered = state.hub.publish(&StreamEvent::Heartbeat { at: Utc::now() });
            debug!(subscribers = delivered, "Heartbeat sent");
        });

        if config.aggregation.stats_refresh_seconds > 0 {
            tasks.every(
                "stats-refresh",
                config.aggregation.stats_refresh_seconds,
                state,
                |state| async move {
                    state.publish_stats().await;
                },
            );
        }

        tasks.every(
            "baseline-refresh",
            config.aggregation.baseline_refresh_seconds,
            state,
            |state| async move {
                state.refresh_baseline().await;
            },
        );

        tasks.every(
            "snapshot",
            config.snapshots.interval_seconds,
            state,
            |state| async move {
                // A failed save leaves earlier artifacts intact; the next
                // tick tries again.
                if let Err(e) = state.save_snapshot().await {
                    warn!(error = %e, "Scheduled snapshot failed");
                }
            },
        );

        info!(tasks = tasks.handles.len(), "Background tasks started");
        tasks
    }

    /// Run `job` every `seconds`, first after one full period.
    fn every<F, Fut>(&mut self, name: &'static str, seconds: u64, state: &Arc<AppState>, job: F)
    where
        F: Fn(Arc<AppState>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = Duration::from_secs(seconds.max(1));
        let state = Arc::clone(state);
        self.handles.push(tokio::spawn(async move {
            let start = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(task = name, period_seconds = period.as_secs(), "Background task running");
            loop {
                ticker.tick().await;
                job(Arc::clone(&state)).await;
            }
        }));
    }

    /// Stop every task. Work in progress is abandoned at its next await.
    pub fn shutdown(self) {
        for handle in &self.handles {
            handle.abort();
        }
        debug!(tasks = self.handles.len(), "Background tasks stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tallyboard_core::aggregate::WindowSpec;
    use tallyboard_snapshot::SnapshotManager;

    use super::*;
    use crate::auth::AllowAll;

    #[tokio::test(start_paused = true)]
    async fn heartbeat_reaches_subscribers_on_schedule() {
        let state = Arc::new(AppState::new(
            SnapshotManager::new(std::env::temp_dir().join("tallyboard-unused"), 1),
            WindowSpec::default(),
            16,
            Arc::new(AllowAll),
        ));
        let mut config = TallyConfig::default();
        config.aggregation.stats_refresh_seconds = 0;
        config.snapshots.interval_seconds = 3600;

        let mut sub = state.subscribe(&axum::http::HeaderMap::new()).await;
        assert_eq!(sub.recv().await.unwrap().name, "stats");

        let tasks = BackgroundTasks::spawn(&state, &config);
        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(sub.recv().await.unwrap().name, "heartbeat");
        tasks.shutdown();
    }
}
