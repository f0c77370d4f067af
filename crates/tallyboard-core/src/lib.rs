//! Event store, aggregation, and award scoring for Tallyboard.
//!
//! This crate holds every piece of state logic and none of the I/O:
//!
//! - [`store`] -- the [`EventStore`] and its validated [`Mutation`]s
//! - [`shared`] -- [`SharedStore`], the single serialization point writers
//!   queue on
//! - [`aggregate`] -- windowed and historical bucketing of the
//!   consumption log
//! - [`awards`] -- the four prediction and consumption awards
//! - [`config`] -- YAML configuration for the whole service
//!
//! The store is an explicit value constructed at startup and passed to
//! whoever needs it; tests build a fresh one each.

pub mod aggregate;
pub mod awards;
pub mod config;
pub mod shared;
pub mod store;

pub use aggregate::{Baseline, WindowSpec};
pub use config::{ConfigError, TallyConfig};
pub use shared::SharedStore;
pub use store::{Applied, EventStore, Mutation, Rejection, RejectionKind};
