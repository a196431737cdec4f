//! Read models and projections for the CQRS query side.
//!
//! The [`ProjectionBuilder`] is the single writer of every read model. It
//! folds committed events through registered [`Projection`]s, either one
//! event at a time as commands land or in batches during rebuild and
//! catch-up, and records a [`Checkpoint`] after each commit.

pub mod builder;
pub mod checkpoint;
pub mod error;
pub mod projection;
pub mod read_model;
pub mod views;

pub use builder::{ApplyReport, ProjectionBuilder, ProjectionBuilderConfig, RebuildOutcome};
pub use checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore};
pub use error::{ProjectionError, Result};
pub use projection::{FnProjection, Projection, reject};
pub use read_model::{ApplyStatus, BatchStats, Materialized, ReadModel};
pub use views::{CustomerHistoryProjection, InventoryProjection, OrderSummaryProjection};
