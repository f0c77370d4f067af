//! Ingress API and live streams for Tallyboard.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **REST endpoints** for every event store mutation plus the derived
//!   views (stats, history, awards)
//! - **Live streams** over SSE (`/api/stream`) and `WebSocket`
//!   (`/ws/stream`), both fed by the [`Hub`]
//! - **Snapshot administration** (list, force save, download, restore)
//!
//! # Architecture
//!
//! One [`AppState`] owns the [`SharedStore`](tallyboard_core::SharedStore).
//! A mutating request validates, commits, recomputes the aggregate, and
//! publishes to the hub as one unit under the store's write lock. The hub
//! never blocks: each subscriber has its own bounded queue and is dropped
//! when it falls behind. Periodic work lives in [`tasks`].

pub mod admin;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod router;
pub mod server;
pub mod sse;
pub mod state;
pub mod tasks;
pub mod ws;

pub use auth::{AccessPolicy, AllowAll, DenyAll, PASSCODE_HEADER, PasscodeHeader};
pub use error::ApiError;
pub use hub::{Frame, Hub, Subscription};
pub use router::build_router;
pub use server::{ServerError, start_server};
pub use state::AppState;
pub use tasks::BackgroundTasks;
