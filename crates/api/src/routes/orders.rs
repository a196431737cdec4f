//! Order command and query endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{
    AddItem, Aggregate, CancelOrder, CommandResult, CreateOrder, CustomerId, Money, Order,
    OrderItem, ProcessPayment, RemoveItem, ShipOrder,
};
use serde::{Deserialize, Serialize};

use super::parse_aggregate_id;
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: Option<String>,
    #[serde(default)]
    pub items: Vec<OrderItemRequest>,
}

#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub sku: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

impl OrderItemRequest {
    fn into_item(self) -> OrderItem {
        OrderItem::new(
            self.sku,
            self.product_name,
            self.quantity,
            Money::from_cents(self.unit_price_cents),
        )
    }
}

#[derive(Deserialize)]
pub struct PaymentRequest {
    pub payment_id: String,
    pub amount_cents: i64,
    pub payment_method: String,
}

#[derive(Deserialize)]
pub struct ShipRequest {
    pub tracking_number: String,
    pub carrier: String,
    pub shipping_address: String,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct AsOfParams {
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveItemParams {
    /// Units to remove; the whole line when absent.
    pub quantity: Option<u32>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub version: i64,
    pub customer_id: Option<String>,
    pub state: String,
    pub items: Vec<OrderItemResponse>,
    pub item_count: u32,
    pub total_cents: i64,
    pub payment: Option<PaymentResponse>,
    pub tracking_number: Option<String>,
    pub cancel_reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub sku: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Serialize)]
pub struct PaymentResponse {
    pub payment_id: String,
    pub amount_cents: i64,
    pub payment_method: String,
}

impl OrderResponse {
    fn new(id: AggregateId, order: &Order) -> Self {
        Self {
            id: id.to_string(),
            version: order.version().as_i64(),
            customer_id: order.customer_id().map(|c| c.to_string()),
            state: order.state().to_string(),
            items: order
                .items()
                .map(|item| OrderItemResponse {
                    sku: item.sku.to_string(),
                    product_name: item.product_name.clone(),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price.cents(),
                })
                .collect(),
            item_count: order.total_quantity(),
            total_cents: order.total_amount().cents(),
            payment: order.payment().map(|p| PaymentResponse {
                payment_id: p.payment_id.clone(),
                amount_cents: p.amount.cents(),
                payment_method: p.payment_method.clone(),
            }),
            tracking_number: order.tracking_number().map(String::from),
            cancel_reason: order.cancel_reason().map(String::from),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

/// What a command committed.
#[derive(Serialize)]
pub struct CommandResponse {
    pub order_id: String,
    pub version: i64,
    pub state: String,
    pub events: Vec<String>,
}

impl CommandResponse {
    fn new(order_id: AggregateId, result: &CommandResult<Order>) -> Self {
        Self {
            order_id: order_id.to_string(),
            version: result.new_version.as_i64(),
            state: result.aggregate.state().to_string(),
            events: result
                .committed
                .iter()
                .map(|e| e.event_type.clone())
                .collect(),
        }
    }
}

/// Projects what the command committed and builds the response.
async fn committed(
    state: &AppState,
    order_id: AggregateId,
    result: CommandResult<Order>,
) -> Json<CommandResponse> {
    state.project(&result.committed).await;
    Json(CommandResponse::new(order_id, &result))
}

// -- Handlers --

/// POST /orders: open an order, optionally with its first lines.
#[tracing::instrument(skip(state, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CommandResponse>), ApiError> {
    let customer_id = match req.customer_id.as_deref() {
        Some(id) => uuid::Uuid::parse_str(id)
            .map(CustomerId::from_uuid)
            .map_err(|e| ApiError::BadRequest(format!("Invalid customer_id: {e}")))?,
        None => CustomerId::new(),
    };

    let cmd = CreateOrder::for_customer(customer_id)
        .with_items(req.items.into_iter().map(OrderItemRequest::into_item));
    let order_id = cmd.order_id;
    let result = state.orders.create_order(cmd).await?;

    Ok((StatusCode::CREATED, committed(&state, order_id, result).await))
}

/// GET /orders/{id}: the order folded from its stream, or as it stood at
/// `as_of`.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<AsOfParams>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = match params.as_of {
        Some(as_of) => state.orders.get_order_as_of(order_id, as_of).await?,
        None => state.orders.get_order(order_id).await?,
    }
    .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(OrderResponse::new(order_id, &order)))
}

/// POST /orders/{id}/items
#[tracing::instrument(skip(state, req))]
pub async fn add_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<OrderItemRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let result = state
        .orders
        .add_item(AddItem::new(order_id, req.into_item()))
        .await?;
    Ok(committed(&state, order_id, result).await)
}

/// DELETE /orders/{id}/items/{sku}: the whole line, or `?quantity=n` units.
#[tracing::instrument(skip(state))]
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    Path((id, sku)): Path<(String, String)>,
    Query(params): Query<RemoveItemParams>,
) -> Result<Json<CommandResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let cmd = match params.quantity {
        Some(quantity) => RemoveItem::units(order_id, sku, quantity),
        None => RemoveItem::new(order_id, sku),
    };
    let result = state.orders.remove_item(cmd).await?;
    Ok(committed(&state, order_id, result).await)
}

/// POST /orders/{id}/payment
#[tracing::instrument(skip(state, req))]
pub async fn pay(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<PaymentRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let cmd = ProcessPayment::new(
        order_id,
        req.payment_id,
        Money::from_cents(req.amount_cents),
        req.payment_method,
    );
    let result = state.orders.process_payment(cmd).await?;
    Ok(committed(&state, order_id, result).await)
}

/// POST /orders/{id}/ship
#[tracing::instrument(skip(state, req))]
pub async fn ship(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ShipRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let cmd = ShipOrder::new(
        order_id,
        req.tracking_number,
        req.carrier,
        req.shipping_address,
    );
    let result = state.orders.ship_order(cmd).await?;
    Ok(committed(&state, order_id, result).await)
}

/// POST /orders/{id}/cancel
#[tracing::instrument(skip(state, req))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let result = state
        .orders
        .cancel_order(CancelOrder::new(order_id, req.reason))
        .await?;
    Ok(committed(&state, order_id, result).await)
}
