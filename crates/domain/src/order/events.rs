//! Order domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{CustomerId, Money, OrderItem, Sku};

/// Everything that can happen to an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    OrderCreated(OrderCreatedData),
    ItemAdded(ItemAddedData),
    ItemRemoved(ItemRemovedData),
    PaymentProcessed(PaymentProcessedData),
    OrderShipped(OrderShippedData),
    OrderCancelled(OrderCancelledData),
}

impl OrderEvent {
    pub const ORDER_CREATED: &'static str = "OrderCreated";
    pub const ITEM_ADDED: &'static str = "ItemAdded";
    pub const ITEM_REMOVED: &'static str = "ItemRemoved";
    pub const PAYMENT_PROCESSED: &'static str = "PaymentProcessed";
    pub const ORDER_SHIPPED: &'static str = "OrderShipped";
    pub const ORDER_CANCELLED: &'static str = "OrderCancelled";
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => Self::ORDER_CREATED,
            OrderEvent::ItemAdded(_) => Self::ITEM_ADDED,
            OrderEvent::ItemRemoved(_) => Self::ITEM_REMOVED,
            OrderEvent::PaymentProcessed(_) => Self::PAYMENT_PROCESSED,
            OrderEvent::OrderShipped(_) => Self::ORDER_SHIPPED,
            OrderEvent::OrderCancelled(_) => Self::ORDER_CANCELLED,
        }
    }

    fn known_event_types() -> &'static [&'static str] {
        &[
            Self::ORDER_CREATED,
            Self::ITEM_ADDED,
            Self::ITEM_REMOVED,
            Self::PAYMENT_PROCESSED,
            Self::ORDER_SHIPPED,
            Self::ORDER_CANCELLED,
        ]
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderCreated(d) => d.created_at,
            OrderEvent::ItemAdded(d) => d.added_at,
            OrderEvent::ItemRemoved(d) => d.removed_at,
            OrderEvent::PaymentProcessed(d) => d.processed_at,
            OrderEvent::OrderShipped(d) => d.shipped_at,
            OrderEvent::OrderCancelled(d) => d.cancelled_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAddedData {
    pub sku: Sku,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub added_at: DateTime<Utc>,
}

/// `quantity` units of `sku` taken off the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRemovedData {
    pub sku: Sku,
    pub quantity: u32,
    pub removed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentProcessedData {
    pub payment_id: String,
    pub amount: Money,
    pub payment_method: String,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderShippedData {
    pub tracking_number: String,
    pub carrier: String,
    pub shipping_address: String,
    pub shipped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub reason: String,
    /// Amount to give back; zero when nothing was paid.
    pub refund_amount: Money,
    pub cancelled_at: DateTime<Utc>,
}

// Constructors stamp the decision time. Replay never calls them.
impl OrderEvent {
    pub fn order_created(order_id: AggregateId, customer_id: CustomerId) -> Self {
        OrderEvent::OrderCreated(OrderCreatedData {
            order_id,
            customer_id,
            created_at: Utc::now(),
        })
    }

    pub fn item_added(item: &OrderItem) -> Self {
        OrderEvent::ItemAdded(ItemAddedData {
            sku: item.sku.clone(),
            product_name: item.product_name.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            added_at: Utc::now(),
        })
    }

    pub fn item_removed(sku: Sku, quantity: u32) -> Self {
        OrderEvent::ItemRemoved(ItemRemovedData {
            sku,
            quantity,
            removed_at: Utc::now(),
        })
    }

    pub fn payment_processed(
        payment_id: impl Into<String>,
        amount: Money,
        payment_method: impl Into<String>,
    ) -> Self {
        OrderEvent::PaymentProcessed(PaymentProcessedData {
            payment_id: payment_id.into(),
            amount,
            payment_method: payment_method.into(),
            processed_at: Utc::now(),
        })
    }

    pub fn order_shipped(
        tracking_number: impl Into<String>,
        carrier: impl Into<String>,
        shipping_address: impl Into<String>,
    ) -> Self {
        OrderEvent::OrderShipped(OrderShippedData {
            tracking_number: tracking_number.into(),
            carrier: carrier.into(),
            shipping_address: shipping_address.into(),
            shipped_at: Utc::now(),
        })
    }

    pub fn order_cancelled(reason: impl Into<String>, refund_amount: Money) -> Self {
        OrderEvent::OrderCancelled(OrderCancelledData {
            reason: reason.into(),
            refund_amount,
            cancelled_at: Utc::now(),
        })
    }
}
