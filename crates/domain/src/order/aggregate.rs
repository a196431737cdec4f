//! Order aggregate implementation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, SnapshotCapable};

use super::{
    CustomerId, Money, OrderError, OrderEvent, OrderItem, OrderState, Sku,
    events::{
        ItemAddedData, ItemRemovedData, OrderCancelledData, OrderCreatedData, OrderShippedData,
        PaymentProcessedData,
    },
};

/// Payment recorded against an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub payment_id: String,
    pub amount: Money,
    pub payment_method: String,
}

/// Order aggregate root.
///
/// Lines are kept sorted by SKU so that equal histories give structurally
/// equal orders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    customer_id: Option<CustomerId>,
    state: OrderState,
    items: BTreeMap<Sku, OrderItem>,
    payment: Option<PaymentInfo>,
    tracking_number: Option<String>,
    cancel_reason: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: &OrderEvent) {
        match event {
            OrderEvent::OrderCreated(data) => self.apply_order_created(data),
            OrderEvent::ItemAdded(data) => self.apply_item_added(data),
            OrderEvent::ItemRemoved(data) => self.apply_item_removed(data),
            OrderEvent::PaymentProcessed(data) => self.apply_payment_processed(data),
            OrderEvent::OrderShipped(data) => self.apply_order_shipped(data),
            OrderEvent::OrderCancelled(data) => self.apply_order_cancelled(data),
        }
    }
}

impl SnapshotCapable for Order {
    fn snapshot_interval() -> u64 {
        50
    }
}

// Queries
impl Order {
    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    /// Lines in SKU order.
    pub fn items(&self) -> impl Iterator<Item = &OrderItem> {
        self.items.values()
    }

    pub fn get_item(&self, sku: &Sku) -> Option<&OrderItem> {
        self.items.get(sku)
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn total_quantity(&self) -> u32 {
        self.items
            .values()
            .fold(0u32, |acc, item| acc.saturating_add(item.quantity))
    }

    pub fn total_amount(&self) -> Money {
        self.items.values().map(OrderItem::line_total).sum()
    }

    pub fn payment(&self) -> Option<&PaymentInfo> {
        self.payment.as_ref()
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

// Commands: inspect state, return events, never mutate.
impl Order {
    /// Opens the order, optionally with initial lines, as one atomic batch.
    pub fn create(
        &self,
        order_id: AggregateId,
        customer_id: CustomerId,
        items: &[OrderItem],
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyCreated);
        }

        // Validate the initial lines against a scratch copy of the new order.
        let mut draft = Order::default();
        let mut events = vec![OrderEvent::order_created(order_id, customer_id)];
        draft.apply(&events[0]);
        for item in items {
            let added = draft.add_item(item.clone())?;
            for event in &added {
                draft.apply(event);
            }
            events.extend(added);
        }
        Ok(events)
    }

    /// Adds units of a product. Repeating a SKU grows the existing line.
    pub fn add_item(&self, item: OrderItem) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_created()?;
        if !self.state.can_modify_items() {
            return Err(self.invalid_transition("add item"));
        }
        if item.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                quantity: item.quantity,
            });
        }
        if !item.unit_price.is_positive() {
            return Err(OrderError::InvalidPrice {
                price: item.unit_price,
            });
        }
        if let Some(existing) = self.items.get(&item.sku)
            && existing.unit_price != item.unit_price
        {
            return Err(OrderError::PriceMismatch {
                sku: item.sku,
                existing: existing.unit_price,
                requested: item.unit_price,
            });
        }
        if !self.fits(&item) {
            return Err(OrderError::LimitExceeded {
                sku: item.sku,
                requested: item.quantity,
            });
        }

        Ok(vec![OrderEvent::item_added(&item)])
    }

    /// Removes `quantity` units of `sku`, or the whole line when `None`.
    pub fn remove_item(
        &self,
        sku: Sku,
        quantity: Option<u32>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_created()?;
        if !self.state.can_modify_items() {
            return Err(self.invalid_transition("remove item"));
        }
        let held = self
            .items
            .get(&sku)
            .map(|item| item.quantity)
            .ok_or_else(|| OrderError::ItemNotFound { sku: sku.clone() })?;

        let quantity = quantity.unwrap_or(held);
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity { quantity });
        }
        if quantity > held {
            return Err(OrderError::InsufficientQuantity {
                sku,
                requested: quantity,
                held,
            });
        }

        Ok(vec![OrderEvent::item_removed(sku, quantity)])
    }

    /// Records payment of the full order total.
    pub fn process_payment(
        &self,
        payment_id: impl Into<String>,
        amount: Money,
        payment_method: impl Into<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_created()?;
        if !self.state.can_pay() {
            return Err(self.invalid_transition("process payment"));
        }
        if self.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        let total = self.total_amount();
        if amount != total {
            return Err(OrderError::PaymentAmountMismatch {
                total,
                paid: amount,
            });
        }

        Ok(vec![OrderEvent::payment_processed(
            payment_id,
            amount,
            payment_method,
        )])
    }

    pub fn ship(
        &self,
        tracking_number: impl Into<String>,
        carrier: impl Into<String>,
        shipping_address: impl Into<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_created()?;
        if !self.state.can_ship() {
            return Err(self.invalid_transition("ship"));
        }

        Ok(vec![OrderEvent::order_shipped(
            tracking_number,
            carrier,
            shipping_address,
        )])
    }

    /// Cancels the order, refunding any payment taken.
    pub fn cancel(&self, reason: impl Into<String>) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_created()?;
        if !self.state.can_cancel() {
            return Err(self.invalid_transition("cancel"));
        }
        let refund = self
            .payment
            .as_ref()
            .map_or(Money::zero(), |payment| payment.amount);

        Ok(vec![OrderEvent::order_cancelled(reason, refund)])
    }

    /// Whether the order's quantities and totals stay representable once
    /// `item` is added.
    fn fits(&self, item: &OrderItem) -> bool {
        let line_quantity = match self.items.get(&item.sku) {
            Some(line) => line.quantity.checked_add(item.quantity),
            None => Some(item.quantity),
        };
        let Some(line_quantity) = line_quantity else {
            return false;
        };
        let mut total_quantity = Some(line_quantity);
        let mut total_amount = item.unit_price.checked_times(line_quantity);
        for line in self.items.values().filter(|line| line.sku != item.sku) {
            total_quantity = total_quantity.and_then(|q| q.checked_add(line.quantity));
            total_amount = total_amount
                .and_then(|t| t.checked_add(line.unit_price.checked_times(line.quantity)?));
        }
        total_quantity.is_some() && total_amount.is_some()
    }

    /// Checks already-decided events against the state machine, as if each
    /// had been produced by its command in turn. Returns them unchanged when
    /// every one is a legal transition from the state the previous ones
    /// leave behind.
    pub fn admit(&self, events: &[OrderEvent]) -> Result<Vec<OrderEvent>, OrderError> {
        let mut draft = self.clone();
        for event in events {
            draft.admit_one(event)?;
            draft.apply(event);
        }
        Ok(events.to_vec())
    }

    fn admit_one(&self, event: &OrderEvent) -> Result<(), OrderError> {
        if self.id.is_none() && !matches!(event, OrderEvent::OrderCreated(_)) {
            return Err(OrderError::CreationMissing);
        }
        match event {
            OrderEvent::OrderCreated(data) => {
                self.create(data.order_id, data.customer_id, &[])?;
            }
            OrderEvent::ItemAdded(data) => {
                self.add_item(OrderItem::new(
                    data.sku.clone(),
                    data.product_name.clone(),
                    data.quantity,
                    data.unit_price,
                ))?;
            }
            OrderEvent::ItemRemoved(data) => {
                self.remove_item(data.sku.clone(), Some(data.quantity))?;
            }
            OrderEvent::PaymentProcessed(data) => {
                self.process_payment(
                    data.payment_id.as_str(),
                    data.amount,
                    data.payment_method.as_str(),
                )?;
            }
            OrderEvent::OrderShipped(data) => {
                self.ship(
                    data.tracking_number.as_str(),
                    data.carrier.as_str(),
                    data.shipping_address.as_str(),
                )?;
            }
            OrderEvent::OrderCancelled(data) => {
                self.cancel(data.reason.as_str())?;
                let paid = self
                    .payment
                    .as_ref()
                    .map_or(Money::zero(), |payment| payment.amount);
                if data.refund_amount != paid {
                    return Err(OrderError::RefundMismatch {
                        paid,
                        refund: data.refund_amount,
                    });
                }
            }
        }
        Ok(())
    }

    fn ensure_created(&self) -> Result<(), OrderError> {
        match self.id {
            Some(_) => Ok(()),
            None => Err(OrderError::NotCreated),
        }
    }

    fn invalid_transition(&self, action: &'static str) -> OrderError {
        OrderError::InvalidStateTransition {
            current_state: self.state,
            action,
        }
    }
}

// Reducers. Each one is total: an event is a fact and is never refused.
impl Order {
    fn apply_order_created(&mut self, data: &OrderCreatedData) {
        self.id = Some(data.order_id);
        self.customer_id = Some(data.customer_id);
        self.state = OrderState::Created;
        self.created_at = Some(data.created_at);
        self.updated_at = Some(data.created_at);
    }

    fn apply_item_added(&mut self, data: &ItemAddedData) {
        self.items
            .entry(data.sku.clone())
            .and_modify(|line| line.quantity = line.quantity.saturating_add(data.quantity))
            .or_insert_with(|| {
                OrderItem::new(
                    data.sku.clone(),
                    data.product_name.clone(),
                    data.quantity,
                    data.unit_price,
                )
            });
        self.state = OrderState::ItemsMutable;
        self.updated_at = Some(data.added_at);
    }

    fn apply_item_removed(&mut self, data: &ItemRemovedData) {
        if let Some(line) = self.items.get_mut(&data.sku) {
            line.quantity = line.quantity.saturating_sub(data.quantity);
            if line.quantity == 0 {
                self.items.remove(&data.sku);
            }
        }
        self.state = OrderState::ItemsMutable;
        self.updated_at = Some(data.removed_at);
    }

    fn apply_payment_processed(&mut self, data: &PaymentProcessedData) {
        self.payment = Some(PaymentInfo {
            payment_id: data.payment_id.clone(),
            amount: data.amount,
            payment_method: data.payment_method.clone(),
        });
        self.state = OrderState::Paid;
        self.updated_at = Some(data.processed_at);
    }

    fn apply_order_shipped(&mut self, data: &OrderShippedData) {
        self.tracking_number = Some(data.tracking_number.clone());
        self.state = OrderState::Shipped;
        self.updated_at = Some(data.shipped_at);
    }

    fn apply_order_cancelled(&mut self, data: &OrderCancelledData) {
        self.cancel_reason = Some(data.reason.clone());
        self.state = OrderState::Cancelled;
        self.updated_at = Some(data.cancelled_at);
    }
}
