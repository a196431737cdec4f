//! Order state machine.

use serde::{Deserialize, Serialize};

/// The lifecycle position of an order.
///
/// ```text
/// Created ──► ItemsMutable ──► Paid ──► Shipped
///    │             │            │
///    └─────────────┴────────────┴──► Cancelled
/// ```
///
/// `Created ──► Paid` is also a legal transition, but the "at least one
/// item" rule means it never happens in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderState {
    /// Created, no item recorded yet.
    #[default]
    Created,

    /// At least one item event recorded; lines may still change.
    ItemsMutable,

    Paid,

    /// Terminal.
    Shipped,

    /// Terminal.
    Cancelled,
}

impl OrderState {
    pub fn can_modify_items(&self) -> bool {
        matches!(self, OrderState::Created | OrderState::ItemsMutable)
    }

    pub fn can_pay(&self) -> bool {
        matches!(self, OrderState::Created | OrderState::ItemsMutable)
    }

    pub fn can_ship(&self) -> bool {
        matches!(self, OrderState::Paid)
    }

    /// Anything but a shipped order may be cancelled, and only once.
    pub fn can_cancel(&self) -> bool {
        !matches!(self, OrderState::Shipped | OrderState::Cancelled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Shipped | OrderState::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Created => "Created",
            OrderState::ItemsMutable => "ItemsMutable",
            OrderState::Paid => "Paid",
            OrderState::Shipped => "Shipped",
            OrderState::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderState; 5] = [
        OrderState::Created,
        OrderState::ItemsMutable,
        OrderState::Paid,
        OrderState::Shipped,
        OrderState::Cancelled,
    ];

    #[test]
    fn test_item_changes_only_before_payment() {
        let allowed: Vec<_> = ALL.into_iter().filter(|s| s.can_modify_items()).collect();
        assert_eq!(allowed, vec![OrderState::Created, OrderState::ItemsMutable]);
    }

    #[test]
    fn test_only_paid_orders_ship() {
        let allowed: Vec<_> = ALL.into_iter().filter(|s| s.can_ship()).collect();
        assert_eq!(allowed, vec![OrderState::Paid]);
    }

    #[test]
    fn test_cancel_everywhere_but_terminal_states() {
        let allowed: Vec<_> = ALL.into_iter().filter(|s| s.can_cancel()).collect();
        assert_eq!(
            allowed,
            vec![
                OrderState::Created,
                OrderState::ItemsMutable,
                OrderState::Paid
            ]
        );
    }

    #[test]
    fn test_serializes_as_variant_name() {
        for state in ALL {
            let json = serde_json::to_value(state).unwrap();
            assert_eq!(json, serde_json::json!(state.as_str()));
        }
    }
}
