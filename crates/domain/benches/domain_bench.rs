use common::AggregateId;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    AddItem, CommandHandler, CreateOrder, CustomerId, Money, Order, OrderEvent, OrderItem,
    OrderService, ProcessPayment, replay::encode_events,
};
use event_store::{EventStore, EventStoreExt, InMemoryEventStore, Version};

/// A created order followed by `items` single-unit lines.
fn seeded_order(rt: &tokio::runtime::Runtime, items: i64) -> (InMemoryEventStore, AggregateId) {
    let store = InMemoryEventStore::new();
    let order_id = AggregateId::new();

    rt.block_on(async {
        let mut events = vec![OrderEvent::order_created(order_id, CustomerId::new())];
        for n in 1..=items {
            let item = OrderItem::new(
                format!("SKU-{n:03}"),
                format!("Product {n}"),
                1,
                Money::from_cents(100 * n),
            );
            events.push(OrderEvent::item_added(&item));
        }
        let batch = encode_events::<Order>(&events).unwrap();
        store
            .append(order_id, Version::initial(), batch)
            .await
            .unwrap();
    });
    (store, order_id)
}

fn bench_create_order(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("domain/create_order", |b| {
        b.iter(|| {
            rt.block_on(async {
                let service = OrderService::new(InMemoryEventStore::new());
                let cmd = CreateOrder::for_customer(CustomerId::new());
                service.create_order(cmd).await.unwrap();
            });
        });
    });
}

fn bench_add_item(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = OrderService::new(InMemoryEventStore::new());
    let cmd = CreateOrder::for_customer(CustomerId::new());
    let order_id = cmd.order_id;
    rt.block_on(async { service.create_order(cmd).await.unwrap() });

    c.bench_function("domain/add_item", |b| {
        b.iter(|| {
            rt.block_on(async {
                let item =
                    OrderItem::new("SKU-BENCH", "Benchmark Widget", 1, Money::from_cents(1000));
                service
                    .add_item(AddItem::new(order_id, item))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_full_command_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("domain/create_add_pay", |b| {
        b.iter(|| {
            rt.block_on(async {
                let service = OrderService::new(InMemoryEventStore::new());
                let cmd = CreateOrder::for_customer(CustomerId::new());
                let order_id = cmd.order_id;
                service.create_order(cmd).await.unwrap();

                let item = OrderItem::new("SKU-001", "Widget", 2, Money::from_cents(1000));
                service
                    .add_item(AddItem::new(order_id, item))
                    .await
                    .unwrap();

                service
                    .process_payment(ProcessPayment::new(
                        order_id,
                        "PAY-1",
                        Money::from_cents(2000),
                        "card",
                    ))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_reconstruction(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("domain/reconstruct");

    for items in [50i64, 100] {
        let (store, order_id) = seeded_order(&rt, items);
        group.bench_function(format!("{}_events", items + 1), |b| {
            b.iter(|| {
                rt.block_on(async {
                    let events = store.load_all(order_id).await.unwrap();
                    domain::reconstruct::<Order>(order_id, events).unwrap();
                });
            });
        });
    }
    group.finish();
}

fn bench_load_through_handler(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (store, order_id) = seeded_order(&rt, 100);
    let handler = CommandHandler::<_, Order>::new(store).without_snapshots();

    c.bench_function("domain/handler_load_101_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                handler.load(order_id).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_create_order,
    bench_add_item,
    bench_full_command_cycle,
    bench_reconstruction,
    bench_load_through_handler,
);
criterion_main!(benches);
