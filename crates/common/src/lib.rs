//! Identifiers shared by every crate in the order-processing workspace.

mod types;

pub use types::{AggregateId, ParseAggregateIdError};
