//! Order service providing a simplified API for order operations.

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::{EventStore, Version};

use crate::aggregate::Aggregate;
use crate::command::{CommandHandler, CommandResult, RetryPolicy};
use crate::error::DomainError;

use super::{
    AddItem, CancelOrder, CreateOrder, Order, OrderError, OrderEvent, ProcessPayment, RemoveItem,
    ShipOrder,
};

impl From<OrderError> for DomainError {
    fn from(e: OrderError) -> Self {
        DomainError::rule_violation(e)
    }
}

/// Service for managing orders.
///
/// Every command goes through [`CommandHandler::execute_with_retry`], so a
/// write that lost a race is decided again against the fresh state.
pub struct OrderService<S: EventStore> {
    handler: CommandHandler<S, Order>,
}

impl<S: EventStore> OrderService<S> {
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.handler = self.handler.with_retry_policy(retry);
        self
    }

    /// Returns a reference to the underlying command handler.
    pub fn handler(&self) -> &CommandHandler<S, Order> {
        &self.handler
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_order(
        &self,
        cmd: CreateOrder,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_with_retry(cmd.order_id, |order| {
                order.create(cmd.order_id, cmd.customer_id, &cmd.items)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_item(&self, cmd: AddItem) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_with_retry(cmd.order_id, |order| order.add_item(cmd.item.clone()))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_item(&self, cmd: RemoveItem) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_with_retry(cmd.order_id, |order| {
                order.remove_item(cmd.sku.clone(), cmd.quantity)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn process_payment(
        &self,
        cmd: ProcessPayment,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_with_retry(cmd.order_id, |order| {
                order.process_payment(
                    cmd.payment_id.as_str(),
                    cmd.amount,
                    cmd.payment_method.as_str(),
                )
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn ship_order(&self, cmd: ShipOrder) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_with_retry(cmd.order_id, |order| {
                order.ship(
                    cmd.tracking_number.as_str(),
                    cmd.carrier.as_str(),
                    cmd.shipping_address.as_str(),
                )
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        cmd: CancelOrder,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_with_retry(cmd.order_id, |order| order.cancel(cmd.reason.as_str()))
            .await
    }

    /// Records already-decided events at `expected_version`.
    ///
    /// The events must form a legal continuation of the order's history;
    /// the first one that is not rejects the whole batch. Not retried: a
    /// caller naming a version has to see the conflict.
    #[tracing::instrument(skip(self, events), fields(batch = events.len()))]
    pub async fn append_events(
        &self,
        order_id: AggregateId,
        expected_version: Version,
        events: Vec<OrderEvent>,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_at(order_id, expected_version, |order| order.admit(&events))
            .await
    }

    /// Loads an order by ID.
    ///
    /// Returns None if the order doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.handler.load_existing(order_id).await
    }

    /// Like [`get_order`](Self::get_order) but a missing order is an error.
    pub async fn require_order(&self, order_id: AggregateId) -> Result<Order, DomainError> {
        self.get_order(order_id)
            .await?
            .ok_or(DomainError::AggregateNotFound {
                aggregate_type: Order::aggregate_type(),
                aggregate_id: order_id,
            })
    }

    /// The order as it stood at `as_of`, or None if it did not exist yet.
    #[tracing::instrument(skip(self))]
    pub async fn get_order_as_of(
        &self,
        order_id: AggregateId,
        as_of: DateTime<Utc>,
    ) -> Result<Option<Order>, DomainError> {
        let order = self.handler.load_as_of(order_id, as_of).await?;
        Ok(order.id().is_some().then_some(order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{CustomerId, Money, OrderItem, OrderState, Sku};
    use event_store::InMemoryEventStore;

    async fn order_with_widget(service: &OrderService<InMemoryEventStore>) -> AggregateId {
        let cmd = CreateOrder::for_customer(CustomerId::new()).with_items([OrderItem::new(
            "SKU-001",
            "Widget",
            2,
            Money::from_cents(1000),
        )]);
        let order_id = cmd.order_id;
        service.create_order(cmd).await.unwrap();
        order_id
    }

    #[tokio::test]
    async fn test_create_order() {
        let service = OrderService::new(InMemoryEventStore::new());

        let customer_id = CustomerId::new();
        let cmd = CreateOrder::for_customer(customer_id);
        let order_id = cmd.order_id;

        let result = service.create_order(cmd).await.unwrap();

        assert_eq!(result.aggregate.id(), Some(order_id));
        assert_eq!(result.aggregate.customer_id(), Some(customer_id));
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.new_version.as_i64(), 1);
    }

    #[tokio::test]
    async fn test_create_order_with_items_is_one_batch() {
        let service = OrderService::new(InMemoryEventStore::new());
        let order_id = order_with_widget(&service).await;

        let order = service.require_order(order_id).await.unwrap();
        assert_eq!(order.version().as_i64(), 2);
        assert_eq!(order.total_amount().cents(), 2000);
    }

    #[tokio::test]
    async fn test_full_order_lifecycle() {
        let service = OrderService::new(InMemoryEventStore::new());
        let order_id = order_with_widget(&service).await;

        service
            .add_item(AddItem::with_details(
                order_id,
                "SKU-002",
                "Gadget",
                1,
                Money::from_cents(500),
            ))
            .await
            .unwrap();
        service
            .remove_item(RemoveItem::units(order_id, "SKU-001", 1))
            .await
            .unwrap();
        service
            .process_payment(ProcessPayment::new(
                order_id,
                "PAY-123",
                Money::from_cents(1500),
                "card",
            ))
            .await
            .unwrap();
        let result = service
            .ship_order(ShipOrder::new(order_id, "TRACK-123", "UPS", "1 Main St"))
            .await
            .unwrap();

        assert_eq!(result.aggregate.state(), OrderState::Shipped);
        assert_eq!(result.new_version.as_i64(), 6);
    }

    #[tokio::test]
    async fn test_cancel_order() {
        let service = OrderService::new(InMemoryEventStore::new());
        let order_id = order_with_widget(&service).await;

        let result = service
            .cancel_order(CancelOrder::new(order_id, "Customer changed mind"))
            .await
            .unwrap();

        assert_eq!(result.aggregate.state(), OrderState::Cancelled);
        assert_eq!(result.aggregate.cancel_reason(), Some("Customer changed mind"));
    }

    #[tokio::test]
    async fn test_rejection_is_typed_rule_violation() {
        let service = OrderService::new(InMemoryEventStore::new());
        let order_id = order_with_widget(&service).await;

        let err = service
            .remove_item(RemoveItem::new(order_id, "SKU-404"))
            .await
            .unwrap_err();

        assert!(err.is_business_rule_violation());
        assert_eq!(
            err.violation::<OrderError>(),
            Some(&OrderError::ItemNotFound {
                sku: Sku::new("SKU-404")
            })
        );
    }

    #[tokio::test]
    async fn test_get_order() {
        let service = OrderService::new(InMemoryEventStore::new());

        assert!(service.get_order(AggregateId::new()).await.unwrap().is_none());
        assert!(matches!(
            service.require_order(AggregateId::new()).await,
            Err(DomainError::AggregateNotFound { .. })
        ));

        let order_id = order_with_widget(&service).await;
        let order = service.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.id(), Some(order_id));
    }

    #[tokio::test]
    async fn test_get_order_as_of_before_creation() {
        let service = OrderService::new(InMemoryEventStore::new());
        let before = Utc::now() - chrono::Duration::seconds(5);
        let order_id = order_with_widget(&service).await;

        assert!(
            service
                .get_order_as_of(order_id, before)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            service
                .get_order_as_of(order_id, Utc::now())
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_append_events_enforces_transitions() {
        let service = OrderService::new(InMemoryEventStore::new());
        let order_id = order_with_widget(&service).await;
        service
            .cancel_order(CancelOrder::new(order_id, "changed mind"))
            .await
            .unwrap();

        let err = service
            .append_events(
                order_id,
                Version::new(3),
                vec![OrderEvent::order_shipped("TRK", "UPS", "1 Main St")],
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.violation::<OrderError>(),
            Some(OrderError::InvalidStateTransition {
                current_state: OrderState::Cancelled,
                ..
            })
        ));
        let order = service.require_order(order_id).await.unwrap();
        assert_eq!(order.version().as_i64(), 3);
    }

    #[tokio::test]
    async fn test_append_events_at_expected_version() {
        let service = OrderService::new(InMemoryEventStore::new());
        let order_id = order_with_widget(&service).await;

        let stale = service
            .append_events(
                order_id,
                Version::first(),
                vec![OrderEvent::item_removed(Sku::new("SKU-001"), 1)],
            )
            .await
            .unwrap_err();
        assert!(stale.is_concurrency_conflict());

        let result = service
            .append_events(
                order_id,
                Version::new(2),
                vec![OrderEvent::item_removed(Sku::new("SKU-001"), 1)],
            )
            .await
            .unwrap();
        assert_eq!(result.new_version.as_i64(), 3);
        assert_eq!(result.aggregate.total_quantity(), 1);
    }
}
