//! Integration tests for the full storefront pipeline.
//!
//! Tests: Command → EventStore → EventBus → Projection → ReadModel, plus the
//! checkout engine's transactional guarantees:
//! - no oversell, even under concurrent checkouts for the last unit
//! - failed checkouts leave orders, stock, and the cart untouched
//! - price snapshots survive later price changes

use std::sync::{Arc, Barrier};

use chrono::Utc;
use serde_json::Value as JsonValue;

use shopfront_cart::CartId;
use shopfront_catalog::{
    AdjustStock, ArchiveProduct, CreateProduct, Product, ProductCommand, ProductId, SetPrice,
};
use shopfront_core::{AggregateId, UserId};
use shopfront_events::{EventBus, EventEnvelope, InMemoryEventBus};
use shopfront_orders::{DeliveryInfo, MarkShipped, Order, OrderCommand, OrderId, OrderStatus};

use crate::cart_service::{CartService, CartServiceError};
use crate::checkout::{
    CheckoutEngine, CheckoutError, ORDER_AGGREGATE_TYPE, PRODUCT_AGGREGATE_TYPE,
};
use crate::command_dispatcher::{CommandDispatcher, load_aggregate};
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::projections::catalog::{ProductCatalogProjection, ProductReadModel};
use crate::projections::order_history::{OrderHistoryProjection, OrderReadModel};
use crate::read_model::InMemoryReadModelStore;

type Store = Arc<InMemoryEventStore>;
type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

struct Shop {
    store: Store,
    bus: Bus,
    dispatcher: CommandDispatcher<Store, Bus>,
    cart_service: CartService<Store, Bus>,
    checkout: CheckoutEngine<Store, Bus>,
    catalog_projection:
        Arc<ProductCatalogProjection<Arc<InMemoryReadModelStore<ProductId, ProductReadModel>>>>,
    history_projection:
        Arc<OrderHistoryProjection<Arc<InMemoryReadModelStore<OrderId, OrderReadModel>>>>,
}

fn setup() -> Shop {
    let store: Store = Arc::new(InMemoryEventStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());

    let catalog_projection = Arc::new(ProductCatalogProjection::new(Arc::new(
        InMemoryReadModelStore::new(),
    )));
    let history_projection = Arc::new(OrderHistoryProjection::new(Arc::new(
        InMemoryReadModelStore::new(),
    )));

    // Subscribe to the bus BEFORE any events are published.
    let catalog_clone = catalog_projection.clone();
    let history_clone = history_projection.clone();
    let bus_clone = bus.clone();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
    std::thread::spawn(move || {
        let sub = bus_clone.subscribe();
        let _ = ready_tx.send(());
        while let Ok(env) = sub.recv() {
            if let Err(e) = catalog_clone.apply_envelope(&env) {
                eprintln!("catalog projection failed: {e:?}");
            }
            if let Err(e) = history_clone.apply_envelope(&env) {
                eprintln!("order history projection failed: {e:?}");
            }
        }
    });
    // Ensure the subscriber is ready before returning (prevents missing early events).
    let _ = ready_rx.recv_timeout(std::time::Duration::from_secs(1));

    Shop {
        store: store.clone(),
        bus: bus.clone(),
        dispatcher: CommandDispatcher::new(store.clone(), bus.clone()),
        cart_service: CartService::new(store.clone(), bus.clone()),
        checkout: CheckoutEngine::new(store, bus),
        catalog_projection,
        history_projection,
    }
}

/// Helper: wait a short time for the subscriber thread to drain the bus.
fn wait_for_processing() {
    std::thread::sleep(std::time::Duration::from_millis(50));
}

fn test_delivery() -> DeliveryInfo {
    DeliveryInfo {
        full_name: "Jordan Petrov".to_string(),
        address: "12 Harbour Lane, Riga".to_string(),
        phone: "+371 20000000".to_string(),
    }
}

fn create_product(shop: &Shop, name: &str, unit_price: u64, stock: i64) -> ProductId {
    let product_id = ProductId::new(AggregateId::new());

    shop.dispatcher
        .dispatch::<Product>(
            product_id.0,
            PRODUCT_AGGREGATE_TYPE,
            ProductCommand::CreateProduct(CreateProduct {
                product_id,
                name: name.to_string(),
                description: None,
                category: None,
                unit_price,
                occurred_at: Utc::now(),
            }),
            |id| Product::empty(ProductId::new(id)),
        )
        .unwrap();

    if stock > 0 {
        shop.dispatcher
            .dispatch::<Product>(
                product_id.0,
                PRODUCT_AGGREGATE_TYPE,
                ProductCommand::AdjustStock(AdjustStock {
                    product_id,
                    delta: stock,
                    occurred_at: Utc::now(),
                }),
                |id| Product::empty(ProductId::new(id)),
            )
            .unwrap();
    }

    product_id
}

fn current_product(shop: &Shop, product_id: ProductId) -> Product {
    let (product, _) = load_aggregate(&shop.store, product_id.0, |id| {
        Product::empty(ProductId::new(id))
    })
    .unwrap();
    product
}

fn order_event_count(shop: &Shop) -> usize {
    shop.store
        .load_all()
        .unwrap()
        .iter()
        .filter(|e| e.aggregate_type == ORDER_AGGREGATE_TYPE)
        .count()
}

#[test]
fn checkout_places_order_decrements_stock_and_clears_cart() {
    let shop = setup();
    let user_id = UserId::new();
    let product_id = create_product(&shop, "Ceramic Mug", 1250, 10);

    shop.cart_service.add_line(user_id, product_id, 3).unwrap();

    let placed = shop.checkout.place_order(user_id, test_delivery()).unwrap();
    assert_eq!(placed.status, OrderStatus::Pending);
    assert_eq!(placed.lines.len(), 1);
    assert_eq!(placed.lines[0].quantity, 3);
    assert_eq!(placed.lines[0].unit_price, 1250);
    assert_eq!(placed.total, 3750);

    // Stock decremented, cart emptied.
    assert_eq!(current_product(&shop, product_id).stock(), 7);
    let view = shop.cart_service.view_cart(user_id).unwrap();
    assert!(view.lines.is_empty());
    assert_eq!(view.total, 0);

    // Order history projection caught up.
    wait_for_processing();
    let history = shop.history_projection.list_for_user(user_id);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].order_id, placed.order_id);
    assert_eq!(history[0].total, 3750);
    assert_eq!(history[0].full_name, "Jordan Petrov");
}

#[test]
fn checkout_with_empty_cart_fails_and_writes_nothing() {
    let shop = setup();
    let user_id = UserId::new();

    let err = shop.checkout.place_order(user_id, test_delivery()).unwrap_err();
    assert!(matches!(err, CheckoutError::EmptyCart));
    assert_eq!(order_event_count(&shop), 0);

    // Same for an opened-but-empty cart.
    shop.cart_service.get_or_create(user_id).unwrap();
    let err = shop.checkout.place_order(user_id, test_delivery()).unwrap_err();
    assert!(matches!(err, CheckoutError::EmptyCart));
    assert_eq!(order_event_count(&shop), 0);
}

#[test]
fn checkout_fails_when_stock_dropped_since_add_and_rolls_back() {
    let shop = setup();
    let user_id = UserId::new();
    let product_id = create_product(&shop, "Desk Lamp", 4900, 5);

    shop.cart_service.add_line(user_id, product_id, 5).unwrap();

    // Admin tooling pulls 3 units before the user checks out.
    shop.dispatcher
        .dispatch::<Product>(
            product_id.0,
            PRODUCT_AGGREGATE_TYPE,
            ProductCommand::AdjustStock(AdjustStock {
                product_id,
                delta: -3,
                occurred_at: Utc::now(),
            }),
            |id| Product::empty(ProductId::new(id)),
        )
        .unwrap();

    let events_before = shop.store.load_all().unwrap().len();

    let err = shop.checkout.place_order(user_id, test_delivery()).unwrap_err();
    match err {
        CheckoutError::InsufficientStock {
            product_id: p,
            requested,
            available,
        } => {
            assert_eq!(p, product_id);
            assert_eq!(requested, 5);
            assert_eq!(available, 2);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }

    // Atomicity: nothing at all was appended. No order, no decrement, cart intact.
    assert_eq!(shop.store.load_all().unwrap().len(), events_before);
    assert_eq!(current_product(&shop, product_id).stock(), 2);
    let view = shop.cart_service.view_cart(user_id).unwrap();
    assert_eq!(view.lines.len(), 1);
    assert_eq!(view.lines[0].quantity, 5);
}

#[test]
fn order_lines_keep_price_snapshot_after_price_change() {
    let shop = setup();
    let user_id = UserId::new();
    let product_id = create_product(&shop, "Field Notebook", 1000, 10);

    shop.cart_service.add_line(user_id, product_id, 2).unwrap();
    let placed = shop.checkout.place_order(user_id, test_delivery()).unwrap();
    assert_eq!(placed.total, 2000);

    shop.dispatcher
        .dispatch::<Product>(
            product_id.0,
            PRODUCT_AGGREGATE_TYPE,
            ProductCommand::SetPrice(SetPrice {
                product_id,
                unit_price: 5000,
                occurred_at: Utc::now(),
            }),
            |id| Product::empty(ProductId::new(id)),
        )
        .unwrap();

    wait_for_processing();

    // The live catalog moved, the order did not.
    assert_eq!(
        shop.catalog_projection.get(&product_id).unwrap().unit_price,
        5000
    );
    let history = shop.history_projection.list_for_user(user_id);
    assert_eq!(history[0].lines[0].unit_price, 1000);
    assert_eq!(history[0].total, 2000);
}

#[test]
fn concurrent_checkouts_for_last_unit_sell_exactly_one() {
    let shop = setup();
    let product_id = create_product(&shop, "Limited Print", 9900, 1);

    let alice = UserId::new();
    let bob = UserId::new();
    // Both adds pass the soft ceiling: stock is still 1 when each cart is filled.
    shop.cart_service.add_line(alice, product_id, 1).unwrap();
    shop.cart_service.add_line(bob, product_id, 1).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let results: Vec<Result<_, _>> = std::thread::scope(|scope| {
        let handles: Vec<_> = [alice, bob]
            .into_iter()
            .map(|user_id| {
                let engine = CheckoutEngine::new(shop.store.clone(), shop.bus.clone());
                let barrier = barrier.clone();
                scope.spawn(move || {
                    barrier.wait();
                    engine.place_order(user_id, test_delivery())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one checkout must win: {results:?}");

    let loser = results.iter().find(|r| r.is_err()).unwrap();
    match loser {
        Err(CheckoutError::InsufficientStock { available, .. }) => assert_eq!(*available, 0),
        other => panic!("loser must see InsufficientStock, got {other:?}"),
    }

    assert_eq!(current_product(&shop, product_id).stock(), 0);
    assert_eq!(
        shop.store
            .load_all()
            .unwrap()
            .iter()
            .filter(|e| e.aggregate_type == ORDER_AGGREGATE_TYPE)
            .count(),
        1
    );
}

#[test]
fn add_line_enforces_soft_stock_ceiling() {
    let shop = setup();
    let user_id = UserId::new();
    let product_id = create_product(&shop, "Walnut Tray", 3200, 5);

    let line = shop.cart_service.add_line(user_id, product_id, 3).unwrap();
    assert_eq!(line.quantity, 3);

    let err = shop.cart_service.add_line(user_id, product_id, 3).unwrap_err();
    match err {
        CartServiceError::InsufficientStock {
            requested,
            available,
            ..
        } => {
            assert_eq!(requested, 6);
            assert_eq!(available, 5);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }

    // Topping up to exactly the ceiling is fine.
    let line = shop.cart_service.add_line(user_id, product_id, 2).unwrap();
    assert_eq!(line.quantity, 5);
}

#[test]
fn add_line_rejects_unknown_and_archived_products() {
    let shop = setup();
    let user_id = UserId::new();

    let ghost = ProductId::new(AggregateId::new());
    let err = shop.cart_service.add_line(user_id, ghost, 1).unwrap_err();
    assert!(matches!(err, CartServiceError::ProductNotFound(p) if p == ghost));

    let product_id = create_product(&shop, "Discontinued Vase", 2100, 4);
    shop.dispatcher
        .dispatch::<Product>(
            product_id.0,
            PRODUCT_AGGREGATE_TYPE,
            ProductCommand::ArchiveProduct(ArchiveProduct {
                product_id,
                occurred_at: Utc::now(),
            }),
            |id| Product::empty(ProductId::new(id)),
        )
        .unwrap();

    let err = shop.cart_service.add_line(user_id, product_id, 1).unwrap_err();
    match err {
        CartServiceError::InsufficientStock { available, .. } => assert_eq!(available, 0),
        other => panic!("expected InsufficientStock, got {other:?}"),
    }
}

#[test]
fn view_cart_is_empty_before_first_use_and_prices_at_current_price() {
    let shop = setup();
    let user_id = UserId::new();

    // Never-opened cart: empty view, not an error, and no stream created.
    let view = shop.cart_service.view_cart(user_id).unwrap();
    assert!(view.lines.is_empty());
    assert!(
        shop.store
            .load_stream(CartId::for_user(user_id).0)
            .unwrap()
            .is_empty()
    );

    let mug = create_product(&shop, "Ceramic Mug", 1250, 10);
    let lamp = create_product(&shop, "Desk Lamp", 4900, 3);
    shop.cart_service.add_line(user_id, mug, 2).unwrap();
    shop.cart_service.add_line(user_id, lamp, 1).unwrap();

    let view = shop.cart_service.view_cart(user_id).unwrap();
    assert_eq!(view.lines.len(), 2);
    assert_eq!(view.lines[0].name, "Ceramic Mug");
    assert_eq!(view.total, 2 * 1250 + 4900);

    // Cart totals follow the live price until checkout snapshots it.
    shop.dispatcher
        .dispatch::<Product>(
            mug.0,
            PRODUCT_AGGREGATE_TYPE,
            ProductCommand::SetPrice(SetPrice {
                product_id: mug,
                unit_price: 1500,
                occurred_at: Utc::now(),
            }),
            |id| Product::empty(ProductId::new(id)),
        )
        .unwrap();

    let view = shop.cart_service.view_cart(user_id).unwrap();
    assert_eq!(view.total, 2 * 1500 + 4900);
}

#[test]
fn dispatcher_updates_catalog_read_model() {
    let shop = setup();
    let product_id = create_product(&shop, "Ceramic Mug", 1250, 10);

    wait_for_processing();

    let rm = shop.catalog_projection.get(&product_id).unwrap();
    assert_eq!(rm.name, "Ceramic Mug");
    assert_eq!(rm.unit_price, 1250);
    assert_eq!(rm.stock, 10);
    assert!(!rm.archived);
}

#[test]
fn order_status_transitions_reach_the_history_projection() {
    let shop = setup();
    let user_id = UserId::new();
    let product_id = create_product(&shop, "Ceramic Mug", 1250, 10);
    shop.cart_service.add_line(user_id, product_id, 1).unwrap();
    let placed = shop.checkout.place_order(user_id, test_delivery()).unwrap();

    shop.dispatcher
        .dispatch::<Order>(
            placed.order_id.0,
            ORDER_AGGREGATE_TYPE,
            OrderCommand::MarkShipped(MarkShipped {
                order_id: placed.order_id,
                occurred_at: Utc::now(),
            }),
            |id| Order::empty(OrderId::new(id)),
        )
        .unwrap();

    wait_for_processing();
    let history = shop.history_projection.list_for_user(user_id);
    assert_eq!(history[0].status, OrderStatus::Shipped);
}

#[test]
fn order_history_lists_newest_first() {
    let shop = setup();
    let user_id = UserId::new();
    let product_id = create_product(&shop, "Ceramic Mug", 1250, 10);

    let mut order_ids = Vec::new();
    for _ in 0..3 {
        shop.cart_service.add_line(user_id, product_id, 1).unwrap();
        let placed = shop.checkout.place_order(user_id, test_delivery()).unwrap();
        order_ids.push(placed.order_id);
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    wait_for_processing();
    let history = shop.history_projection.list_for_user(user_id);
    assert_eq!(history.len(), 3);
    let listed: Vec<_> = history.iter().map(|o| o.order_id).collect();
    let expected: Vec<_> = order_ids.iter().rev().copied().collect();
    assert_eq!(listed, expected);

    // Another user sees none of them.
    assert!(shop.history_projection.list_for_user(UserId::new()).is_empty());
}

#[test]
fn projections_are_idempotent_and_rebuildable() {
    let shop = setup();
    let user_id = UserId::new();
    let product_id = create_product(&shop, "Ceramic Mug", 1250, 10);
    shop.cart_service.add_line(user_id, product_id, 2).unwrap();
    shop.checkout.place_order(user_id, test_delivery()).unwrap();

    wait_for_processing();
    let stock_before = shop.catalog_projection.get(&product_id).unwrap().stock;

    // Duplicate delivery must be a no-op.
    for stored in shop.store.load_all().unwrap() {
        shop.catalog_projection.apply_envelope(&stored.to_envelope()).unwrap();
        shop.history_projection.apply_envelope(&stored.to_envelope()).unwrap();
    }
    assert_eq!(
        shop.catalog_projection.get(&product_id).unwrap().stock,
        stock_before
    );
    assert_eq!(shop.history_projection.list_for_user(user_id).len(), 1);

    // Rebuild from scratch reproduces the same read models.
    let envelopes: Vec<_> = shop
        .store
        .load_all()
        .unwrap()
        .iter()
        .map(|e| e.to_envelope())
        .collect();
    shop.catalog_projection
        .rebuild_from_scratch(envelopes.clone())
        .unwrap();
    shop.history_projection.rebuild_from_scratch(envelopes).unwrap();

    assert_eq!(
        shop.catalog_projection.get(&product_id).unwrap().stock,
        stock_before
    );
    let history = shop.history_projection.list_for_user(user_id);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].total, 2500);
}
