//! Order summary read model: one denormalized row per order.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{Aggregate, CustomerId, Money, Order, OrderEvent, OrderItem, OrderState, Sku};
use event_store::EventEnvelope;
use serde::Serialize;

use crate::Result;
use crate::projection::Projection;

pub const ORDER_SUMMARY: &str = "order_summary";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderSummary {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub status: OrderState,
    pub items: BTreeMap<Sku, OrderItem>,
    pub item_count: u32,
    pub total: Money,
    pub payment_id: Option<String>,
    pub tracking_number: Option<String>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderSummary {
    fn recalculate(&mut self) {
        self.item_count = self
            .items
            .values()
            .fold(0u32, |acc, item| acc.saturating_add(item.quantity));
        self.total = self.items.values().map(OrderItem::line_total).sum();
    }
}

/// All order summaries, keyed by order id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderSummaries {
    orders: HashMap<AggregateId, OrderSummary>,
}

impl OrderSummaries {
    pub fn get(&self, order_id: AggregateId) -> Option<&OrderSummary> {
        self.orders.get(&order_id)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn by_status(&self, status: OrderState) -> Vec<&OrderSummary> {
        self.sorted(|summary| summary.status == status)
    }

    pub fn by_customer(&self, customer_id: CustomerId) -> Vec<&OrderSummary> {
        self.sorted(|summary| summary.customer_id == customer_id)
    }

    // Oldest first; ties broken by id so the result never depends on
    // arrival order across orders.
    fn sorted(&self, keep: impl Fn(&OrderSummary) -> bool) -> Vec<&OrderSummary> {
        let mut found: Vec<_> = self.orders.values().filter(|s| keep(s)).collect();
        found.sort_by_key(|s| (s.created_at, s.order_id));
        found
    }
}

/// Projects order events into [`OrderSummaries`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderSummaryProjection;

impl Projection for OrderSummaryProjection {
    type State = OrderSummaries;

    fn name(&self) -> &'static str {
        ORDER_SUMMARY
    }

    fn initial_state(&self) -> OrderSummaries {
        OrderSummaries::default()
    }

    fn interested_in(&self, event: &EventEnvelope) -> bool {
        event.aggregate_type == Order::aggregate_type()
    }

    fn apply(&self, state: &mut OrderSummaries, event: &EventEnvelope) -> Result<()> {
        let order_event: OrderEvent = domain::replay::decode_event(event)?;
        let order_id = event.aggregate_id;

        if let OrderEvent::OrderCreated(data) = &order_event {
            state.orders.insert(
                order_id,
                OrderSummary {
                    order_id,
                    customer_id: data.customer_id,
                    status: OrderState::Created,
                    items: BTreeMap::new(),
                    item_count: 0,
                    total: Money::zero(),
                    payment_id: None,
                    tracking_number: None,
                    cancel_reason: None,
                    created_at: data.created_at,
                    updated_at: data.created_at,
                },
            );
            return Ok(());
        }

        // Per-aggregate order guarantees creation came first.
        let Some(summary) = state.orders.get_mut(&order_id) else {
            return Ok(());
        };

        match order_event {
            OrderEvent::OrderCreated(_) => {}
            OrderEvent::ItemAdded(data) => {
                summary
                    .items
                    .entry(data.sku.clone())
                    .and_modify(|line| line.quantity = line.quantity.saturating_add(data.quantity))
                    .or_insert_with(|| {
                        OrderItem::new(data.sku, data.product_name, data.quantity, data.unit_price)
                    });
                summary.status = OrderState::ItemsMutable;
                summary.updated_at = data.added_at;
            }
            OrderEvent::ItemRemoved(data) => {
                if let Some(line) = summary.items.get_mut(&data.sku) {
                    line.quantity = line.quantity.saturating_sub(data.quantity);
                    if line.quantity == 0 {
                        summary.items.remove(&data.sku);
                    }
                }
                summary.status = OrderState::ItemsMutable;
                summary.updated_at = data.removed_at;
            }
            OrderEvent::PaymentProcessed(data) => {
                summary.payment_id = Some(data.payment_id);
                summary.status = OrderState::Paid;
                summary.updated_at = data.processed_at;
            }
            OrderEvent::OrderShipped(data) => {
                summary.tracking_number = Some(data.tracking_number);
                summary.status = OrderState::Shipped;
                summary.updated_at = data.shipped_at;
            }
            OrderEvent::OrderCancelled(data) => {
                summary.cancel_reason = Some(data.reason);
                summary.status = OrderState::Cancelled;
                summary.updated_at = data.cancelled_at;
            }
        }
        summary.recalculate();
        Ok(())
    }

    fn query(&self, state: &OrderSummaries, key: &str) -> Option<serde_json::Value> {
        let order_id: AggregateId = key.parse().ok()?;
        state
            .get(order_id)
            .and_then(|summary| serde_json::to_value(summary).ok())
    }
}
