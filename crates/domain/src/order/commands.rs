//! Order commands.

use common::AggregateId;
use serde::Deserialize;

use crate::command::Command;

use super::{CustomerId, Money, Order, OrderItem, Sku};

/// Command to open a new order, optionally with its first lines.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrder {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,

    #[serde(default)]
    pub items: Vec<OrderItem>,
}

impl CreateOrder {
    pub fn new(order_id: AggregateId, customer_id: CustomerId) -> Self {
        Self {
            order_id,
            customer_id,
            items: Vec::new(),
        }
    }

    /// Creates a new CreateOrder command with a generated order ID.
    pub fn for_customer(customer_id: CustomerId) -> Self {
        Self::new(AggregateId::new(), customer_id)
    }

    pub fn with_items(mut self, items: impl IntoIterator<Item = OrderItem>) -> Self {
        self.items.extend(items);
        self
    }
}

impl Command for CreateOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to add units of a product to an order.
#[derive(Debug, Clone)]
pub struct AddItem {
    pub order_id: AggregateId,
    pub item: OrderItem,
}

impl AddItem {
    pub fn new(order_id: AggregateId, item: OrderItem) -> Self {
        Self { order_id, item }
    }

    pub fn with_details(
        order_id: AggregateId,
        sku: impl Into<Sku>,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self::new(
            order_id,
            OrderItem::new(sku, product_name, quantity, unit_price),
        )
    }
}

impl Command for AddItem {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to take units of a product off an order.
#[derive(Debug, Clone)]
pub struct RemoveItem {
    pub order_id: AggregateId,
    pub sku: Sku,

    /// Units to remove; the whole line when `None`.
    pub quantity: Option<u32>,
}

impl RemoveItem {
    /// Removes the whole line.
    pub fn new(order_id: AggregateId, sku: impl Into<Sku>) -> Self {
        Self {
            order_id,
            sku: sku.into(),
            quantity: None,
        }
    }

    pub fn units(order_id: AggregateId, sku: impl Into<Sku>, quantity: u32) -> Self {
        Self {
            order_id,
            sku: sku.into(),
            quantity: Some(quantity),
        }
    }
}

impl Command for RemoveItem {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to pay for an order in full.
#[derive(Debug, Clone)]
pub struct ProcessPayment {
    pub order_id: AggregateId,
    pub payment_id: String,
    pub amount: Money,
    pub payment_method: String,
}

impl ProcessPayment {
    pub fn new(
        order_id: AggregateId,
        payment_id: impl Into<String>,
        amount: Money,
        payment_method: impl Into<String>,
    ) -> Self {
        Self {
            order_id,
            payment_id: payment_id.into(),
            amount,
            payment_method: payment_method.into(),
        }
    }
}

impl Command for ProcessPayment {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to hand a paid order to a carrier.
#[derive(Debug, Clone)]
pub struct ShipOrder {
    pub order_id: AggregateId,
    pub tracking_number: String,
    pub carrier: String,
    pub shipping_address: String,
}

impl ShipOrder {
    pub fn new(
        order_id: AggregateId,
        tracking_number: impl Into<String>,
        carrier: impl Into<String>,
        shipping_address: impl Into<String>,
    ) -> Self {
        Self {
            order_id,
            tracking_number: tracking_number.into(),
            carrier: carrier.into(),
            shipping_address: shipping_address.into(),
        }
    }
}

impl Command for ShipOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

#[derive(Debug, Clone)]
pub struct CancelOrder {
    pub order_id: AggregateId,
    pub reason: String,
}

impl CancelOrder {
    pub fn new(order_id: AggregateId, reason: impl Into<String>) -> Self {
        Self {
            order_id,
            reason: reason.into(),
        }
    }
}

impl Command for CancelOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}
