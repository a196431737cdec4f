//! Order aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod state;
mod value_objects;

pub use aggregate::{Order, PaymentInfo};
pub use commands::*;
pub use events::{
    ItemAddedData, ItemRemovedData, OrderCancelledData, OrderCreatedData, OrderEvent,
    OrderShippedData, PaymentProcessedData,
};
pub use service::OrderService;
pub use state::OrderState;
pub use value_objects::{CustomerId, Money, OrderItem, Sku};

use thiserror::Error;

/// Business rules an order command can break.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("Order has not been created")]
    NotCreated,

    #[error("Order already created")]
    AlreadyCreated,

    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderState,
        action: &'static str,
    },

    #[error("Item not found: {sku}")]
    ItemNotFound { sku: Sku },

    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    #[error("Cannot remove {requested} of {sku}, only {held} on the order")]
    InsufficientQuantity { sku: Sku, requested: u32, held: u32 },

    #[error("Invalid price: {price} (must be greater than 0)")]
    InvalidPrice { price: Money },

    #[error("{sku} is already on the order at {existing}, not {requested}")]
    PriceMismatch {
        sku: Sku,
        existing: Money,
        requested: Money,
    },

    #[error("Adding {requested} of {sku} would overflow the order quantity or total")]
    LimitExceeded { sku: Sku, requested: u32 },

    #[error("Order history must begin with OrderCreated")]
    CreationMissing,

    #[error("Refund of {refund} does not match payment taken {paid}")]
    RefundMismatch { paid: Money, refund: Money },

    #[error("Order has no items")]
    NoItems,

    #[error("Payment of {paid} does not match order total {total}")]
    PaymentAmountMismatch { total: Money, paid: Money },
}
