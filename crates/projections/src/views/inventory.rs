//! Inventory read model: stock on hand and reserved per SKU.

use std::collections::{BTreeMap, HashMap};

use common::AggregateId;
use domain::{Aggregate, Order, OrderEvent, Sku};
use event_store::EventEnvelope;
use serde::Serialize;

use crate::Result;
use crate::projection::Projection;

pub const INVENTORY: &str = "inventory";

/// Stock figures for one SKU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StockLevel {
    pub on_hand: i64,
    pub reserved: i64,
}

impl StockLevel {
    /// Negative when orders hold more than is on hand.
    pub fn available(&self) -> i64 {
        self.on_hand.saturating_sub(self.reserved)
    }
}

#[derive(Debug, Clone, Serialize)]
struct StockView<'a> {
    sku: &'a Sku,
    on_hand: i64,
    reserved: i64,
    available: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    stock: BTreeMap<Sku, StockLevel>,

    /// Units each open order still holds, per SKU.
    reservations: HashMap<AggregateId, BTreeMap<Sku, u32>>,
}

impl Inventory {
    pub fn stock(&self, sku: &Sku) -> StockLevel {
        self.stock.get(sku).copied().unwrap_or_default()
    }

    pub fn available(&self, sku: &Sku) -> i64 {
        self.stock(sku).available()
    }

    pub fn reserved(&self, sku: &Sku) -> i64 {
        self.stock(sku).reserved
    }

    pub fn skus(&self) -> impl Iterator<Item = (&Sku, &StockLevel)> {
        self.stock.iter()
    }

    /// Units `order_id` currently holds of `sku`.
    pub fn held_by(&self, order_id: AggregateId, sku: &Sku) -> u32 {
        self.reservations
            .get(&order_id)
            .and_then(|held| held.get(sku))
            .copied()
            .unwrap_or(0)
    }

    fn reserve(&mut self, order_id: AggregateId, sku: &Sku, quantity: u32) {
        let held = self
            .reservations
            .entry(order_id)
            .or_default()
            .entry(sku.clone())
            .or_default();
        let gained = quantity.min(u32::MAX - *held);
        *held += gained;
        let level = self.stock.entry(sku.clone()).or_default();
        level.reserved = level.reserved.saturating_add(i64::from(gained));
    }

    fn unreserve(&mut self, order_id: AggregateId, sku: &Sku, quantity: u32) {
        let Some(held) = self
            .reservations
            .get_mut(&order_id)
            .and_then(|held| held.get_mut(sku))
        else {
            return;
        };
        let released = quantity.min(*held);
        *held -= released;
        if *held == 0
            && let Some(lines) = self.reservations.get_mut(&order_id)
        {
            lines.remove(sku);
        }
        let level = self.stock.entry(sku.clone()).or_default();
        level.reserved = level.reserved.saturating_sub(i64::from(released));
    }

    /// Drops every reservation of `order_id`, optionally taking the units
    /// out of stock as well.
    fn settle(&mut self, order_id: AggregateId, consume: bool) {
        let Some(held) = self.reservations.remove(&order_id) else {
            return;
        };
        for (sku, quantity) in held {
            let level = self.stock.entry(sku).or_default();
            level.reserved = level.reserved.saturating_sub(i64::from(quantity));
            if consume {
                level.on_hand = level.on_hand.saturating_sub(i64::from(quantity));
            }
        }
    }
}

/// Projects order events into [`Inventory`], starting from seeded stock.
#[derive(Debug, Clone, Default)]
pub struct InventoryProjection {
    seed: BTreeMap<Sku, i64>,
}

impl InventoryProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stock(mut self, sku: impl Into<Sku>, on_hand: i64) -> Self {
        self.seed.insert(sku.into(), on_hand);
        self
    }

    pub fn with_seed(mut self, seed: impl IntoIterator<Item = (Sku, i64)>) -> Self {
        self.seed.extend(seed);
        self
    }
}

impl Projection for InventoryProjection {
    type State = Inventory;

    fn name(&self) -> &'static str {
        INVENTORY
    }

    fn initial_state(&self) -> Inventory {
        let stock = self
            .seed
            .iter()
            .map(|(sku, on_hand)| {
                (
                    sku.clone(),
                    StockLevel {
                        on_hand: *on_hand,
                        reserved: 0,
                    },
                )
            })
            .collect();
        Inventory {
            stock,
            reservations: HashMap::new(),
        }
    }

    fn interested_in(&self, event: &EventEnvelope) -> bool {
        event.aggregate_type == Order::aggregate_type()
    }

    fn apply(&self, state: &mut Inventory, event: &EventEnvelope) -> Result<()> {
        let order_event: OrderEvent = domain::replay::decode_event(event)?;
        let order_id = event.aggregate_id;

        match order_event {
            OrderEvent::ItemAdded(data) => state.reserve(order_id, &data.sku, data.quantity),
            OrderEvent::ItemRemoved(data) => state.unreserve(order_id, &data.sku, data.quantity),
            OrderEvent::OrderCancelled(_) => state.settle(order_id, false),
            OrderEvent::OrderShipped(_) => state.settle(order_id, true),
            OrderEvent::OrderCreated(_) | OrderEvent::PaymentProcessed(_) => {}
        }
        Ok(())
    }

    fn query(&self, state: &Inventory, key: &str) -> Option<serde_json::Value> {
        let sku = Sku::new(key);
        let level = state.stock.get(&sku)?;
        serde_json::to_value(StockView {
            sku: &sku,
            on_hand: level.on_hand,
            reserved: level.reserved,
            available: level.available(),
        })
        .ok()
    }
}
