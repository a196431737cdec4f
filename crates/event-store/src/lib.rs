//! Append-only event log with per-aggregate optimistic concurrency.
//!
//! [`EventStore`] is the only interface the rest of the workspace depends on.
//! Two backends ship with the crate: [`InMemoryEventStore`] for tests and
//! single-process use, and [`PostgresEventStore`] for durable storage.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod snapshot;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventId, NewEvent, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use query::EventQuery;
pub use snapshot::Snapshot;
pub use store::{EventStore, EventStoreExt, EventStream};
