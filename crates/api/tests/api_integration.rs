//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::AggregateId;
use domain::{CustomerId, Money, OrderEvent, OrderItem, Sku};
use event_store::InMemoryEventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use tower::ServiceExt;

use api::config::Config;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn setup_with_seed(seed: &[(&str, i64)]) -> Router {
    let config = Config {
        inventory_seed: seed.iter().map(|(sku, qty)| (Sku::new(*sku), *qty)).collect(),
        ..Config::default()
    };
    let state = api::create_state(Arc::new(InMemoryEventStore::new()), &config)
        .await
        .unwrap();
    api::create_app(state, get_metrics_handle())
}

async fn setup() -> Router {
    setup_with_seed(&[]).await
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

fn line(sku: &str, quantity: u32, cents: i64) -> Value {
    json!({
        "sku": sku,
        "product_name": format!("Product {sku}"),
        "quantity": quantity,
        "unit_price_cents": cents,
    })
}

/// Creates an order and returns its id.
async fn create_order(app: &Router, items: Vec<Value>) -> String {
    let (status, json) = send(app, "POST", "/orders", Some(json!({ "items": items }))).await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    json["order_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_check() {
    let app = setup().await;

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["read_models"].as_array().map(Vec::len), Some(3));
}

#[tokio::test]
async fn test_create_order_with_items() {
    let app = setup().await;

    let (status, json) = send(
        &app,
        "POST",
        "/orders",
        Some(json!({ "items": [line("SKU-001", 2, 1000)] })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["version"], 2);
    assert_eq!(json["state"], "ItemsMutable");
    assert_eq!(json["events"], json!(["OrderCreated", "ItemAdded"]));
}

#[tokio::test]
async fn test_create_order_with_invalid_customer_id() {
    let app = setup().await;

    let (status, json) = send(
        &app,
        "POST",
        "/orders",
        Some(json!({ "customer_id": "not-a-uuid" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("customer_id"));
}

#[tokio::test]
async fn test_full_lifecycle_and_point_in_time_read() {
    let app = setup().await;
    let id = create_order(&app, vec![]).await;

    let (status, _) = send(
        &app,
        "POST",
        &format!("/orders/{id}/items"),
        Some(line("A", 1, 500)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    send(
        &app,
        "POST",
        &format!("/orders/{id}/items"),
        Some(line("B", 2, 250)),
    )
    .await;
    let (status, json) = send(
        &app,
        "POST",
        &format!("/orders/{id}/payment"),
        Some(json!({ "payment_id": "PAY-1", "amount_cents": 1000, "payment_method": "card" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    let (status, json) = send(
        &app,
        "POST",
        &format!("/orders/{id}/ship"),
        Some(json!({
            "tracking_number": "TRACK-1",
            "carrier": "UPS",
            "shipping_address": "1 Main St"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["version"], 5);
    assert_eq!(json["state"], "Shipped");

    let (_, order) = send(&app, "GET", &format!("/orders/{id}"), None).await;
    assert_eq!(order["version"], 5);
    assert_eq!(order["total_cents"], 1000);
    assert_eq!(order["payment"]["payment_id"], "PAY-1");
    assert_eq!(order["tracking_number"], "TRACK-1");

    // Just after the second item: two lines, no payment.
    let (_, events) = send(&app, "GET", &format!("/streams/{id}/events"), None).await;
    let as_of = events[2]["timestamp"].as_str().unwrap();
    let (status, past) = send(
        &app,
        "GET",
        &format!("/orders/{id}?as_of={as_of}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(past["version"], 3);
    assert_eq!(past["items"].as_array().map(Vec::len), Some(2));
    assert!(past["payment"].is_null());
    assert_eq!(past["state"], "ItemsMutable");
}

#[tokio::test]
async fn test_ship_after_cancel_is_a_rule_violation() {
    let app = setup().await;
    let id = create_order(&app, vec![line("A", 1, 100)]).await;

    let (status, _) = send(
        &app,
        "POST",
        &format!("/orders/{id}/cancel"),
        Some(json!({ "reason": "changed mind" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(
        &app,
        "POST",
        &format!("/orders/{id}/ship"),
        Some(json!({ "tracking_number": "T", "carrier": "UPS", "shipping_address": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["error"].as_str().unwrap().contains("ship"));

    let (_, order) = send(&app, "GET", &format!("/orders/{id}"), None).await;
    assert_eq!(order["version"], 3);
    assert_eq!(order["state"], "Cancelled");
}

#[tokio::test]
async fn test_payment_must_match_total() {
    let app = setup().await;
    let id = create_order(&app, vec![line("A", 2, 300)]).await;

    let (status, _) = send(
        &app,
        "POST",
        &format!("/orders/{id}/payment"),
        Some(json!({ "payment_id": "P", "amount_cents": 500, "payment_method": "card" })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_remove_item_units_and_whole_line() {
    let app = setup().await;
    let id = create_order(&app, vec![line("A", 3, 100), line("B", 1, 100)]).await;

    let (status, json) = send(
        &app,
        "DELETE",
        &format!("/orders/{id}/items/A?quantity=2"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["events"], json!(["ItemRemoved"]));

    let (status, _) = send(&app, "DELETE", &format!("/orders/{id}/items/B"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, order) = send(&app, "GET", &format!("/orders/{id}"), None).await;
    assert_eq!(order["item_count"], 1);
    assert_eq!(order["total_cents"], 100);

    let (status, _) = send(&app, "DELETE", &format!("/orders/{id}/items/Z"), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_missing_and_malformed_orders() {
    let app = setup().await;
    let missing = AggregateId::new();

    let (status, _) = send(&app, "GET", &format!("/orders/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/orders/{missing}/cancel"),
        Some(json!({ "reason": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = send(&app, "GET", "/orders/invalid-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("Invalid ID"));
}

#[tokio::test]
async fn test_inventory_read_model_tracks_reservations() {
    let app = setup_with_seed(&[("X", 10)]).await;

    let a = create_order(&app, vec![line("X", 3, 100)]).await;
    create_order(&app, vec![line("X", 2, 100)]).await;

    let (status, stock) = send(&app, "GET", "/read-models/inventory/X", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stock["available"], 5);
    assert_eq!(stock["reserved"], 5);

    send(
        &app,
        "POST",
        &format!("/orders/{a}/cancel"),
        Some(json!({ "reason": "customer request" })),
    )
    .await;

    let (_, stock) = send(&app, "GET", "/read-models/inventory/X", None).await;
    assert_eq!(stock["available"], 8);
    assert_eq!(stock["reserved"], 2);
    assert_eq!(stock["on_hand"], 10);
}

#[tokio::test]
async fn test_read_model_queries() {
    let app = setup().await;
    let customer_id = CustomerId::new();
    let (_, created) = send(
        &app,
        "POST",
        "/orders",
        Some(json!({
            "customer_id": customer_id.to_string(),
            "items": [line("A", 2, 150)]
        })),
    )
    .await;
    let order_id = created["order_id"].as_str().unwrap();

    let (status, summary) = send(
        &app,
        "GET",
        &format!("/read-models/order_summary/{order_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["status"], "ItemsMutable");
    assert_eq!(summary["total"], 300);

    let (status, history) = send(
        &app,
        "GET",
        &format!("/read-models/customer_history/{customer_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["orders"][0]["order_id"], order_id);

    let (status, _) = send(&app, "GET", "/read-models/inventory/NOPE", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = send(&app, "GET", "/read-models/shipping/anything", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("shipping"));
}

#[tokio::test]
async fn test_rebuild_projection_matches_live_state() {
    let app = setup().await;
    let id = create_order(&app, vec![line("A", 1, 700)]).await;
    send(
        &app,
        "POST",
        &format!("/orders/{id}/payment"),
        Some(json!({ "payment_id": "P", "amount_cents": 700, "payment_method": "card" })),
    )
    .await;

    let uri = format!("/read-models/order_summary/{id}");
    let (_, before) = send(&app, "GET", &uri, None).await;

    let (status, json) = send(&app, "POST", "/projections/order_summary/rebuild", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "completed");
    assert_eq!(json["applied"], 3);
    assert_eq!(json["failed"], 0);

    let (_, after) = send(&app, "GET", &uri, None).await;
    assert_eq!(before, after);

    let (_, listing) = send(&app, "GET", "/projections", None).await;
    let summary = listing
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["name"] == "order_summary")
        .unwrap();
    assert_eq!(summary["aggregates"], 1);

    let (status, _) = send(&app, "POST", "/projections/unknown/rebuild", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_raw_stream_append_and_load() {
    let app = setup().await;
    let id = AggregateId::new();
    let events = vec![
        serde_json::to_value(OrderEvent::order_created(id, CustomerId::new())).unwrap(),
        serde_json::to_value(OrderEvent::item_added(&OrderItem::new(
            "SKU-9",
            "Gadget",
            4,
            Money::from_cents(250),
        )))
        .unwrap(),
    ];
    let uri = format!("/streams/{id}/events");

    let (status, committed) = send(
        &app,
        "POST",
        &uri,
        Some(json!({ "expected_version": 0, "events": events })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(committed[1]["version"], 2);
    assert_eq!(committed[1]["aggregate_type"], "Order");

    // Same expected version again: someone else already wrote.
    let (status, _) = send(
        &app,
        "POST",
        &uri,
        Some(json!({ "expected_version": 0, "events": events })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, loaded) = send(&app, "GET", &format!("{uri}?after_version=1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(loaded.as_array().map(Vec::len), Some(1));
    assert_eq!(loaded[0]["event_type"], "ItemAdded");

    let (_, order) = send(&app, "GET", &format!("/orders/{id}"), None).await;
    assert_eq!(order["item_count"], 4);

    // Appended events reach the read models like command output does.
    let (_, stock) = send(&app, "GET", "/read-models/inventory/SKU-9", None).await;
    assert_eq!(stock["reserved"], 4);
}

#[tokio::test]
async fn test_raw_append_rejects_bad_input() {
    let app = setup().await;
    let id = AggregateId::new();
    let uri = format!("/streams/{id}/events");

    let (status, _) = send(
        &app,
        "POST",
        &uri,
        Some(json!({ "expected_version": 0, "events": [{"type": "Teleported", "data": {}}] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        &uri,
        Some(json!({ "expected_version": 0, "events": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "GET",
        &format!("{uri}?after_version=1&as_of=2024-01-01T00:00:00Z"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!([]));
}

#[tokio::test]
async fn test_raw_append_enforces_order_transitions() {
    let app = setup().await;
    let id = create_order(&app, vec![line("A", 1, 100)]).await;
    let (status, _) = send(
        &app,
        "POST",
        &format!("/orders/{id}/cancel"),
        Some(json!({ "reason": "changed mind" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let shipped = serde_json::to_value(OrderEvent::order_shipped("TRK-1", "UPS", "1 Main St"))
        .unwrap();
    let (status, json) = send(
        &app,
        "POST",
        &format!("/streams/{id}/events"),
        Some(json!({ "expected_version": 3, "events": [shipped] })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{json}");

    let (_, order) = send(&app, "GET", &format!("/orders/{id}"), None).await;
    assert_eq!(order["state"], "Cancelled");
    assert_eq!(order["version"], 3);

    // A history has to start with the order being created.
    let fresh = AggregateId::new();
    let added = serde_json::to_value(OrderEvent::item_added(&OrderItem::new(
        "SKU-1",
        "Widget",
        1,
        Money::from_cents(100),
    )))
    .unwrap();
    let (status, _) = send(
        &app,
        "POST",
        &format!("/streams/{fresh}/events"),
        Some(json!({ "expected_version": 0, "events": [added] })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let (_, events) = send(&app, "GET", &format!("/streams/{fresh}/events"), None).await;
    assert_eq!(events, json!([]));
}

#[tokio::test]
async fn test_overflowing_quantity_is_rejected() {
    let app = setup().await;
    let id = create_order(&app, vec![line("A", u32::MAX, 100)]).await;

    let (status, _) = send(
        &app,
        "POST",
        &format!("/orders/{id}/items"),
        Some(line("A", u32::MAX, 100)),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, order) = send(&app, "GET", &format!("/orders/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["version"], 2);
    assert_eq!(order["item_count"], u32::MAX);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup().await;
    create_order(&app, vec![line("A", 1, 100)]).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("domain_commands_total"));
    assert!(text.contains("event_store_events_appended_total"));
}
