//! Customer history read model: every order a customer has placed.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{Aggregate, CustomerId, Money, Order, OrderEvent, OrderState, Sku};
use event_store::EventEnvelope;
use serde::Serialize;
use uuid::Uuid;

use crate::Result;
use crate::projection::Projection;

pub const CUSTOMER_HISTORY: &str = "customer_history";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerOrder {
    pub order_id: AggregateId,
    pub status: OrderState,
    pub total: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerHistory {
    pub customer_id: CustomerId,

    /// Ordered by creation time, then order id.
    pub orders: Vec<CustomerOrder>,

    /// Sum of processed payments.
    pub total_spent: Money,

    pub total_refunded: Money,
}

impl CustomerHistory {
    fn new(customer_id: CustomerId) -> Self {
        Self {
            customer_id,
            orders: Vec::new(),
            total_spent: Money::zero(),
            total_refunded: Money::zero(),
        }
    }

    pub fn total_orders(&self) -> usize {
        self.orders.len()
    }

    pub fn first_order_at(&self) -> Option<DateTime<Utc>> {
        self.orders.first().map(|o| o.created_at)
    }

    pub fn last_order_at(&self) -> Option<DateTime<Utc>> {
        self.orders.last().map(|o| o.created_at)
    }

    fn order_mut(&mut self, order_id: AggregateId) -> Option<&mut CustomerOrder> {
        self.orders.iter_mut().find(|o| o.order_id == order_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerHistories {
    customers: HashMap<CustomerId, CustomerHistory>,
    owners: HashMap<AggregateId, CustomerId>,

    /// Quantity and unit price per SKU of each order, for its total.
    lines: HashMap<AggregateId, BTreeMap<Sku, (u32, Money)>>,
}

impl CustomerHistories {
    pub fn get(&self, customer_id: CustomerId) -> Option<&CustomerHistory> {
        self.customers.get(&customer_id)
    }

    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    fn owner_of(&mut self, order_id: AggregateId) -> Option<&mut CustomerHistory> {
        let owner = self.owners.get(&order_id)?;
        self.customers.get_mut(owner)
    }

    fn line_total(&self, order_id: AggregateId) -> Money {
        self.lines
            .get(&order_id)
            .map(|lines| lines.values().map(|(qty, price)| price.times(*qty)).sum())
            .unwrap_or_default()
    }
}

/// Projects order events into [`CustomerHistories`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CustomerHistoryProjection;

impl Projection for CustomerHistoryProjection {
    type State = CustomerHistories;

    fn name(&self) -> &'static str {
        CUSTOMER_HISTORY
    }

    fn initial_state(&self) -> CustomerHistories {
        CustomerHistories::default()
    }

    fn interested_in(&self, event: &EventEnvelope) -> bool {
        event.aggregate_type == Order::aggregate_type()
    }

    fn apply(&self, state: &mut CustomerHistories, event: &EventEnvelope) -> Result<()> {
        let order_event: OrderEvent = domain::replay::decode_event(event)?;
        let order_id = event.aggregate_id;

        if let OrderEvent::OrderCreated(data) = &order_event {
            state.owners.insert(order_id, data.customer_id);
            let history = state
                .customers
                .entry(data.customer_id)
                .or_insert_with(|| CustomerHistory::new(data.customer_id));
            let entry = CustomerOrder {
                order_id,
                status: OrderState::Created,
                total: Money::zero(),
                created_at: data.created_at,
            };
            // Keep the list sorted whatever order customers' orders arrive in.
            let at = history
                .orders
                .partition_point(|o| (o.created_at, o.order_id) < (entry.created_at, order_id));
            history.orders.insert(at, entry);
            return Ok(());
        }

        match &order_event {
            OrderEvent::ItemAdded(data) => {
                let line = state
                    .lines
                    .entry(order_id)
                    .or_default()
                    .entry(data.sku.clone())
                    .or_insert((0, data.unit_price));
                line.0 = line.0.saturating_add(data.quantity);
            }
            OrderEvent::ItemRemoved(data) => {
                if let Some(lines) = state.lines.get_mut(&order_id)
                    && let Some(line) = lines.get_mut(&data.sku)
                {
                    line.0 = line.0.saturating_sub(data.quantity);
                    if line.0 == 0 {
                        lines.remove(&data.sku);
                    }
                }
            }
            // The order's total is frozen once it ships or is cancelled.
            OrderEvent::OrderShipped(_) | OrderEvent::OrderCancelled(_) => {
                state.lines.remove(&order_id);
            }
            _ => {}
        }
        let total = state.line_total(order_id);
        let terminal = matches!(
            order_event,
            OrderEvent::OrderShipped(_) | OrderEvent::OrderCancelled(_)
        );

        let Some(history) = state.owner_of(order_id) else {
            return Ok(());
        };

        match order_event {
            OrderEvent::OrderCreated(_) => {}
            OrderEvent::ItemAdded(_) | OrderEvent::ItemRemoved(_) => {
                if let Some(order) = history.order_mut(order_id) {
                    order.total = total;
                    order.status = OrderState::ItemsMutable;
                }
            }
            OrderEvent::PaymentProcessed(data) => {
                history.total_spent = history.total_spent + data.amount;
                if let Some(order) = history.order_mut(order_id) {
                    order.status = OrderState::Paid;
                }
            }
            OrderEvent::OrderShipped(_) => {
                if let Some(order) = history.order_mut(order_id) {
                    order.status = OrderState::Shipped;
                }
            }
            OrderEvent::OrderCancelled(data) => {
                history.total_refunded = history.total_refunded + data.refund_amount;
                if let Some(order) = history.order_mut(order_id) {
                    order.status = OrderState::Cancelled;
                }
            }
        }
        if terminal {
            state.owners.remove(&order_id);
        }
        Ok(())
    }

    fn query(&self, state: &CustomerHistories, key: &str) -> Option<serde_json::Value> {
        let customer_id = CustomerId::from_uuid(Uuid::parse_str(key).ok()?);
        state
            .get(customer_id)
            .and_then(|history| serde_json::to_value(history).ok())
    }
}
