//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{ProductId, UserId};
use domain::{
    CartError, Money, Order, OrderLine, OrderStatus, Payment, PaymentMethod, PaymentStatus,
    Product, ProductStatus, RequestContext, StatusPolicy,
};
use sqlx::PgPool;
use store::{
    CartStore, OrderQuery, OrderStore, PaymentSettlement, PaymentStore, PostgresStore,
    ProductStore, StockLine, StoreError,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_checkout_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE payments, orders, cart_items, carts, products")
        .execute(&pool)
        .await
        .unwrap();

    PostgresStore::new(pool)
}

async fn seed_product(store: &PostgresStore, name: &str, price: i64, stock: u32) -> Product {
    let product = Product {
        id: ProductId::new(),
        name: name.to_string(),
        price: Money::new(price),
        stock,
        status: ProductStatus::Active,
        image_url: None,
    };
    store.upsert_product(product.clone()).await.unwrap();
    product
}

async fn stock_of(store: &PostgresStore, id: ProductId) -> u32 {
    store.get_product(id).await.unwrap().unwrap().stock
}

fn order_for(user_id: UserId, product: &Product, quantity: u32, method: PaymentMethod) -> Order {
    Order::place(
        user_id,
        vec![OrderLine::new(
            product.id,
            product.name.clone(),
            product.price,
            quantity,
        )],
        method,
        Utc::now(),
    )
    .unwrap()
}

#[tokio::test]
async fn upsert_and_get_products() {
    let store = get_test_store().await;
    let serum = seed_product(&store, "Serum", 250_000, 5).await;
    let toner = seed_product(&store, "Toner", 120_000, 2).await;

    let fetched = store.get_product(serum.id).await.unwrap().unwrap();
    assert_eq!(fetched, serum);

    let both = store.get_products(&[serum.id, toner.id, ProductId::new()]).await.unwrap();
    assert_eq!(both.len(), 2);
}

#[tokio::test]
async fn reserve_stock_is_all_or_nothing() {
    let store = get_test_store().await;
    let a = seed_product(&store, "Cleanser", 90_000, 5).await;
    let b = seed_product(&store, "Sunscreen", 300_000, 1).await;

    let err = store
        .reserve_stock(&[StockLine::new(a.id, 2), StockLine::new(b.id, 2)])
        .await
        .unwrap_err();

    match err {
        StoreError::InsufficientStock {
            product_id,
            requested,
            available,
        } => {
            assert_eq!(product_id, b.id);
            assert_eq!(requested, 2);
            assert_eq!(available, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(stock_of(&store, a.id).await, 5);
    assert_eq!(stock_of(&store, b.id).await, 1);

    store
        .reserve_stock(&[StockLine::new(a.id, 2), StockLine::new(b.id, 1)])
        .await
        .unwrap();
    assert_eq!(stock_of(&store, a.id).await, 3);
    assert_eq!(stock_of(&store, b.id).await, 0);

    store.release_stock(&[StockLine::new(b.id, 1)]).await.unwrap();
    assert_eq!(stock_of(&store, b.id).await, 1);
}

#[tokio::test]
async fn reserve_stock_unknown_product_is_not_found() {
    let store = get_test_store().await;

    let err = store
        .reserve_stock(&[StockLine::new(ProductId::new(), 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
async fn concurrent_reservations_never_oversell() {
    let store = get_test_store().await;
    let product = seed_product(&store, "Mask", 50_000, 3).await;
    let product_id = product.id;

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store.reserve_stock(&[StockLine::new(product_id, 1)]).await
            })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 3);
    assert_eq!(stock_of(&store, product_id).await, 0);
}

#[tokio::test]
async fn cart_add_increments_and_remove_deletes_empty_cart() {
    let store = get_test_store().await;
    let user = UserId::new();
    let a = ProductId::new();
    let b = ProductId::new();

    store.add_cart_item(user, a, 1).await.unwrap();
    store.add_cart_item(user, b, 2).await.unwrap();
    let cart = store.add_cart_item(user, a, 2).await.unwrap();

    assert_eq!(cart.items().len(), 2);
    assert_eq!(cart.items()[0].product_id, a);
    assert_eq!(cart.get_item(&a).unwrap().quantity, 3);

    let cart = store.remove_cart_item(user, a).await.unwrap().unwrap();
    assert_eq!(cart.items().len(), 1);

    assert!(store.remove_cart_item(user, b).await.unwrap().is_none());
    assert!(store.get_cart(user).await.unwrap().is_none());
}

#[tokio::test]
async fn cart_add_rejects_zero_and_overflow() {
    let store = get_test_store().await;
    let user = UserId::new();
    let a = ProductId::new();

    let err = store.add_cart_item(user, a, 0).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Cart(CartError::InvalidQuantity { quantity: 0 })
    ));

    store.add_cart_item(user, a, u32::MAX).await.unwrap();
    let err = store.add_cart_item(user, a, 1).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Cart(CartError::QuantityOverflow { .. })
    ));
    assert_eq!(
        store.get_cart(user).await.unwrap().unwrap().get_item(&a).unwrap().quantity,
        u32::MAX
    );
}

#[tokio::test]
async fn take_cart_hands_out_the_cart_once() {
    let store = get_test_store().await;
    let user = UserId::new();
    store.add_cart_item(user, ProductId::new(), 1).await.unwrap();

    let (first, second) = tokio::join!(store.take_cart(user), store.take_cart(user));
    let taken = [first.unwrap(), second.unwrap()]
        .into_iter()
        .filter(Option::is_some)
        .count();

    assert_eq!(taken, 1);
    assert!(store.get_cart(user).await.unwrap().is_none());
}

#[tokio::test]
async fn restore_cart_merges_into_new_cart() {
    let store = get_test_store().await;
    let user = UserId::new();
    let a = ProductId::new();
    let b = ProductId::new();

    store.add_cart_item(user, a, 2).await.unwrap();
    let taken = store.take_cart(user).await.unwrap().unwrap();

    store.add_cart_item(user, a, 1).await.unwrap();
    store.add_cart_item(user, b, 4).await.unwrap();
    store.restore_cart(taken).await.unwrap();

    let cart = store.get_cart(user).await.unwrap().unwrap();
    assert_eq!(cart.get_item(&a).unwrap().quantity, 3);
    assert_eq!(cart.get_item(&b).unwrap().quantity, 4);
}

#[tokio::test]
async fn insert_and_query_orders() {
    let store = get_test_store().await;
    let product = seed_product(&store, "Essence", 80_000, 100).await;
    let alice = UserId::new();
    let bob = UserId::new();

    for _ in 0..3 {
        let order = order_for(alice, &product, 1, PaymentMethod::CashOnDelivery);
        store.insert_order(&order, None).await.unwrap();
    }
    let bobs = order_for(bob, &product, 2, PaymentMethod::CashOnDelivery);
    store.insert_order(&bobs, None).await.unwrap();

    let fetched = store.get_order(bobs.id()).await.unwrap().unwrap();
    assert_eq!(fetched.total_amount(), Money::new(160_000));
    assert_eq!(fetched.lines(), bobs.lines());

    let page = store
        .query_orders(&OrderQuery::new().user(alice).limit(2))
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total_pages(), 2);
    assert!(page.items[0].created_at() >= page.items[1].created_at());

    let all = store.query_orders(&OrderQuery::new()).await.unwrap();
    assert_eq!(all.total, 4);

    let processing = store
        .query_orders(&OrderQuery::new().status(OrderStatus::Processing))
        .await
        .unwrap();
    assert_eq!(processing.total, 0);
}

#[tokio::test]
async fn cancel_releases_stock_and_fails_pending_payment() {
    let store = get_test_store().await;
    let product = seed_product(&store, "Cream", 200_000, 5).await;
    let user = UserId::new();

    store.reserve_stock(&[StockLine::new(product.id, 2)]).await.unwrap();
    let order = order_for(user, &product, 2, PaymentMethod::Gateway);
    let payment = Payment::pending(order.id(), PaymentMethod::Gateway, "txn-1", Utc::now());
    store.insert_order(&order, Some(&payment)).await.unwrap();

    let change = order.cancel_by(&RequestContext::customer(user)).unwrap();
    let cancelled = store.apply_status_change(&change).await.unwrap();

    assert_eq!(cancelled.status(), OrderStatus::Cancelled);
    assert_eq!(stock_of(&store, product.id).await, 5);
    let payment = store.get_payment_for_order(order.id()).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);

    let err = store.apply_status_change(&change).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    assert_eq!(stock_of(&store, product.id).await, 5);
}

#[tokio::test]
async fn reopening_cancelled_order_reserves_stock_again() {
    let store = get_test_store().await;
    let product = seed_product(&store, "Essence", 180_000, 5).await;
    store.reserve_stock(&[StockLine::new(product.id, 2)]).await.unwrap();
    let order = order_for(UserId::new(), &product, 2, PaymentMethod::CashOnDelivery);
    store.insert_order(&order, None).await.unwrap();

    let cancel = order
        .change_status(OrderStatus::Cancelled, StatusPolicy::Permissive)
        .unwrap();
    let cancelled = store.apply_status_change(&cancel).await.unwrap();
    assert_eq!(stock_of(&store, product.id).await, 5);

    let reopen = cancelled
        .change_status(OrderStatus::Pending, StatusPolicy::Permissive)
        .unwrap();
    let reopened = store.apply_status_change(&reopen).await.unwrap();
    assert_eq!(reopened.status(), OrderStatus::Pending);
    assert_eq!(stock_of(&store, product.id).await, 3);

    let cancel_again = reopened
        .change_status(OrderStatus::Cancelled, StatusPolicy::Permissive)
        .unwrap();
    store.apply_status_change(&cancel_again).await.unwrap();
    assert_eq!(stock_of(&store, product.id).await, 5);
}

#[tokio::test]
async fn reopening_cancelled_order_fails_without_stock() {
    let store = get_test_store().await;
    let product = seed_product(&store, "Ampoule", 220_000, 2).await;
    store.reserve_stock(&[StockLine::new(product.id, 2)]).await.unwrap();
    let order = order_for(UserId::new(), &product, 2, PaymentMethod::CashOnDelivery);
    store.insert_order(&order, None).await.unwrap();

    let cancel = order
        .change_status(OrderStatus::Cancelled, StatusPolicy::Permissive)
        .unwrap();
    let cancelled = store.apply_status_change(&cancel).await.unwrap();
    store.reserve_stock(&[StockLine::new(product.id, 1)]).await.unwrap();

    let ship = cancelled
        .change_status(OrderStatus::Shipped, StatusPolicy::Permissive)
        .unwrap();
    let err = store.apply_status_change(&ship).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::InsufficientStock {
            requested: 2,
            available: 1,
            ..
        }
    ));
    assert_eq!(stock_of(&store, product.id).await, 1);
    let stored = store.get_order(cancelled.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), OrderStatus::Cancelled);
}

#[tokio::test]
async fn admin_status_change_is_compare_and_set() {
    let store = get_test_store().await;
    let product = seed_product(&store, "Lotion", 150_000, 5).await;
    let order = order_for(UserId::new(), &product, 1, PaymentMethod::CashOnDelivery);
    store.insert_order(&order, None).await.unwrap();

    let to_processing = order
        .change_status(OrderStatus::Processing, StatusPolicy::Permissive)
        .unwrap();
    let to_shipped = order
        .change_status(OrderStatus::Shipped, StatusPolicy::Permissive)
        .unwrap();

    store.apply_status_change(&to_processing).await.unwrap();
    let err = store.apply_status_change(&to_shipped).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let stored = store.get_order(order.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), OrderStatus::Processing);
}

#[tokio::test]
async fn settle_payment_confirms_order_once() {
    let store = get_test_store().await;
    let product = seed_product(&store, "Gel", 70_000, 5).await;
    let order = order_for(UserId::new(), &product, 1, PaymentMethod::Gateway);
    let payment = Payment::pending(order.id(), PaymentMethod::Gateway, "txn-2", Utc::now());
    store.insert_order(&order, Some(&payment)).await.unwrap();

    let settlement = PaymentSettlement {
        order_id: order.id(),
        status: PaymentStatus::Completed,
        gateway_transaction_no: Some("14000001".into()),
        order_change: Some(order.confirm_payment().unwrap()),
    };

    let settled = store.settle_payment(&settlement).await.unwrap();
    assert_eq!(settled.status, PaymentStatus::Completed);
    assert_eq!(settled.gateway_transaction_no.as_deref(), Some("14000001"));

    let stored = store.get_order(order.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), OrderStatus::Processing);
    assert!(stored.is_paid());

    let err = store.settle_payment(&settlement).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
async fn settle_payment_rolls_back_when_order_moved_on() {
    let store = get_test_store().await;
    let product = seed_product(&store, "Oil", 60_000, 5).await;
    let user = UserId::new();
    let order = order_for(user, &product, 1, PaymentMethod::Gateway);
    let payment = Payment::pending(order.id(), PaymentMethod::Gateway, "txn-3", Utc::now());
    store.insert_order(&order, Some(&payment)).await.unwrap();

    let admin_change = order
        .change_status(OrderStatus::Shipped, StatusPolicy::Permissive)
        .unwrap();
    store.apply_status_change(&admin_change).await.unwrap();

    let settlement = PaymentSettlement {
        order_id: order.id(),
        status: PaymentStatus::Completed,
        gateway_transaction_no: None,
        order_change: Some(order.confirm_payment().unwrap()),
    };
    let err = store.settle_payment(&settlement).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let payment = store.get_payment_for_order(order.id()).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn find_expired_orders_selects_stale_gateway_orders() {
    let store = get_test_store().await;
    let product = seed_product(&store, "Balm", 40_000, 10).await;
    let user = UserId::new();

    let gateway = order_for(user, &product, 1, PaymentMethod::Gateway);
    let payment = Payment::pending(gateway.id(), PaymentMethod::Gateway, "txn-4", Utc::now());
    store.insert_order(&gateway, Some(&payment)).await.unwrap();

    let cod = order_for(user, &product, 1, PaymentMethod::CashOnDelivery);
    store.insert_order(&cod, None).await.unwrap();

    let cutoff = Utc::now() + Duration::seconds(1);
    let expired = store.find_expired_orders(cutoff, 10).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id(), gateway.id());

    let before = Utc::now() - Duration::hours(1);
    assert!(store.find_expired_orders(before, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn run_migrations_is_idempotent() {
    let store = get_test_store().await;
    store.run_migrations().await.unwrap();
    store.run_migrations().await.unwrap();
}
