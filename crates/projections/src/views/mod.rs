//! Read models shipped with the order kernel.

pub mod customer_history;
pub mod inventory;
pub mod order_summary;

pub use customer_history::{
    CUSTOMER_HISTORY, CustomerHistories, CustomerHistory, CustomerHistoryProjection, CustomerOrder,
};
pub use inventory::{INVENTORY, Inventory, InventoryProjection, StockLevel};
pub use order_summary::{ORDER_SUMMARY, OrderSummaries, OrderSummary, OrderSummaryProjection};
