//! Domain layer for the order-processing kernel.
//!
//! This crate provides:
//! - `Aggregate` and `DomainEvent`, the contract every event-sourced entity meets
//! - replay helpers that rebuild state from stored envelopes and snapshots
//! - `CommandHandler`, which loads, decides and appends with optimistic
//!   concurrency and bounded retry
//! - the `Order` aggregate with its state machine and `OrderService`

pub mod aggregate;
pub mod command;
pub mod error;
pub mod order;
pub mod replay;

pub use aggregate::{Aggregate, DomainEvent, SnapshotCapable};
pub use command::{Command, CommandHandler, CommandResult, RetryPolicy};
pub use error::DomainError;
pub use order::{
    AddItem, CancelOrder, CreateOrder, CustomerId, Money, Order, OrderError, OrderEvent,
    OrderItem, OrderService, OrderState, PaymentInfo, ProcessPayment, RemoveItem, ShipOrder, Sku,
};
pub use replay::{reconstruct, reconstruct_from_snapshot, replay};
