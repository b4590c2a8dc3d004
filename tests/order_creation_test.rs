//! Order creation: pricing invariants, atomic stock reservation, and the
//! compensating rollback on every failure path.

mod common;

use common::{order_request, spawn_app};
use rust_decimal_macros::dec;
use storefront_api::errors::ServiceError;
use uuid::Uuid;

#[tokio::test]
async fn creation_snapshots_prices_and_reserves_stock() {
    let app = spawn_app().await;
    let customer_id = Uuid::new_v4();

    let product_a = app.seed_product("desk lamp", dec!(60), 5).await;
    let product_b = app.seed_product("bulb", dec!(5), 5).await;

    let order = app
        .services
        .orders
        .create_order(order_request(customer_id, &[(product_a, 2), (product_b, 1)]))
        .await
        .expect("order should be created");

    // subtotal 125 > 100, so shipping is free
    assert_eq!(order.subtotal, dec!(125));
    assert_eq!(order.tax, dec!(12.5));
    assert_eq!(order.shipping_amount, dec!(0));
    assert_eq!(order.total, dec!(137.5));
    assert_eq!(order.total, order.subtotal + order.tax + order.shipping_amount);

    assert_eq!(order.status, "processing");
    assert_eq!(order.payment.status, "pending");
    assert_eq!(order.payment.method, "card");
    assert_eq!(order.payment.transaction_id, None);
    assert_eq!(order.customer_id, customer_id);
    assert!(order.order_number.starts_with("ORD-"));
    assert_eq!(order.delivered_at, None);

    assert_eq!(order.items.len(), 2);
    let line_a = order
        .items
        .iter()
        .find(|i| i.product_id == product_a)
        .unwrap();
    assert_eq!(line_a.quantity, 2);
    assert_eq!(line_a.unit_price, dec!(60));

    assert_eq!(app.stock_of(product_a).await, 3);
    assert_eq!(app.stock_of(product_b).await, 4);
}

#[tokio::test]
async fn small_orders_pay_flat_shipping() {
    let app = spawn_app().await;
    let product = app.seed_product("mug", dec!(20), 10).await;

    let order = app
        .services
        .orders
        .create_order(order_request(Uuid::new_v4(), &[(product, 1)]))
        .await
        .expect("order should be created");

    assert_eq!(order.subtotal, dec!(20));
    assert_eq!(order.tax, dec!(2));
    assert_eq!(order.shipping_amount, dec!(10));
    assert_eq!(order.total, dec!(32));
}

#[tokio::test]
async fn snapshotted_price_survives_catalog_changes() {
    let app = spawn_app().await;
    let product = app.seed_product("keyboard", dec!(45), 10).await;

    let order = app
        .services
        .orders
        .create_order(order_request(Uuid::new_v4(), &[(product, 1)]))
        .await
        .expect("order should be created");

    // reprice the catalog after the fact
    use sea_orm::{ActiveModelTrait, ActiveValue::Set};
    storefront_api::entities::product::ActiveModel {
        id: Set(product),
        price: Set(dec!(99)),
        ..Default::default()
    }
    .update(&*app.db)
    .await
    .expect("reprice product");

    let fetched = app
        .services
        .orders
        .get_order(order.id)
        .await
        .expect("order should exist");
    assert_eq!(fetched.items[0].unit_price, dec!(45));
    assert_eq!(fetched.subtotal, order.subtotal);
}

#[tokio::test]
async fn out_of_stock_product_fails_with_no_side_effects() {
    let app = spawn_app().await;
    let product = app.seed_product("sold out", dec!(20), 0).await;

    let err = app
        .services
        .orders
        .create_order(order_request(Uuid::new_v4(), &[(product, 1)]))
        .await
        .expect_err("creation should fail");

    assert!(matches!(err, ServiceError::InsufficientStock(id) if id == product));
    assert_eq!(app.stock_of(product).await, 0);
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn midcart_failure_rolls_back_every_earlier_reservation() {
    let app = spawn_app().await;
    let first = app.seed_product("first", dec!(10), 5).await;
    let second = app.seed_product("second", dec!(10), 5).await;
    let third = app.seed_product("third", dec!(10), 1).await;
    let fourth = app.seed_product("fourth", dec!(10), 5).await;

    let err = app
        .services
        .orders
        .create_order(order_request(
            Uuid::new_v4(),
            &[(first, 1), (second, 1), (third, 2), (fourth, 1)],
        ))
        .await
        .expect_err("third item has only 1 unit");

    assert!(matches!(err, ServiceError::InsufficientStock(id) if id == third));

    // the two successful decrements were compensated, the rest untouched
    assert_eq!(app.stock_of(first).await, 5);
    assert_eq!(app.stock_of(second).await, 5);
    assert_eq!(app.stock_of(third).await, 1);
    assert_eq!(app.stock_of(fourth).await, 5);
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn unknown_product_fails_and_releases_prior_reservations() {
    let app = spawn_app().await;
    let known = app.seed_product("known", dec!(10), 5).await;
    let unknown = Uuid::new_v4();

    let err = app
        .services
        .orders
        .create_order(order_request(Uuid::new_v4(), &[(known, 2), (unknown, 1)]))
        .await
        .expect_err("second product does not exist");

    assert!(matches!(err, ServiceError::ProductNotFound(id) if id == unknown));
    assert_eq!(app.stock_of(known).await, 5);
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn persistence_failure_releases_reservations() {
    let app = spawn_app().await;
    let product = app.seed_product("thing", dec!(10), 5).await;

    // break the store between reservation and persistence
    use sea_orm::ConnectionTrait;
    app.db
        .execute_unprepared("DROP TABLE order_items")
        .await
        .expect("drop table");

    let err = app
        .services
        .orders
        .create_order(order_request(Uuid::new_v4(), &[(product, 2)]))
        .await
        .expect_err("persistence must fail");

    assert!(matches!(err, ServiceError::DatabaseError(_)));
    // the reservation was compensated and no order row survived the rollback
    assert_eq!(app.stock_of(product).await, 5);
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let app = spawn_app().await;

    let err = app
        .services
        .orders
        .create_order(order_request(Uuid::new_v4(), &[]))
        .await
        .expect_err("empty cart");

    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn non_positive_quantity_is_rejected() {
    let app = spawn_app().await;
    let product = app.seed_product("thing", dec!(10), 5).await;

    let err = app
        .services
        .orders
        .create_order(order_request(Uuid::new_v4(), &[(product, 0)]))
        .await
        .expect_err("zero quantity");

    assert!(matches!(err, ServiceError::ValidationError(_)));
    assert_eq!(app.stock_of(product).await, 5);
}

#[tokio::test]
async fn blank_address_field_is_rejected() {
    let app = spawn_app().await;
    let product = app.seed_product("thing", dec!(10), 5).await;

    let mut request = order_request(Uuid::new_v4(), &[(product, 1)]);
    request.shipping_address.city = String::new();

    let err = app
        .services
        .orders
        .create_order(request)
        .await
        .expect_err("blank city");

    assert!(matches!(err, ServiceError::ValidationError(_)));
    assert_eq!(app.stock_of(product).await, 5);
}

#[tokio::test]
async fn concurrent_orders_for_the_last_unit_admit_exactly_one() {
    let app = spawn_app().await;
    let product = app.seed_product("last unit", dec!(30), 1).await;

    let service_a = app.services.orders.clone();
    let service_b = app.services.orders.clone();
    let request_a = order_request(Uuid::new_v4(), &[(product, 1)]);
    let request_b = order_request(Uuid::new_v4(), &[(product, 1)]);

    let task_a = tokio::spawn(async move { service_a.create_order(request_a).await });
    let task_b = tokio::spawn(async move { service_b.create_order(request_b).await });

    let result_a = task_a.await.expect("task a");
    let result_b = task_b.await.expect("task b");

    let successes = [&result_a, &result_b]
        .iter()
        .filter(|r| r.is_ok())
        .count();
    assert_eq!(successes, 1, "exactly one order may win the last unit");

    let loser = if result_a.is_err() { result_a } else { result_b };
    assert!(matches!(
        loser.expect_err("one request must lose"),
        ServiceError::InsufficientStock(id) if id == product
    ));

    assert_eq!(app.stock_of(product).await, 0);
    assert_eq!(app.order_count().await, 1);
}

#[tokio::test]
async fn list_orders_filters_by_owner_and_status() {
    let app = spawn_app().await;
    let product = app.seed_product("widget", dec!(10), 50).await;

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let alice_order = app
        .services
        .orders
        .create_order(order_request(alice, &[(product, 1)]))
        .await
        .expect("alice's order");
    app.services
        .orders
        .create_order(order_request(bob, &[(product, 2)]))
        .await
        .expect("bob's order");

    let alice_orders = app
        .services
        .orders
        .list_orders(storefront_api::services::orders::OrderListFilter {
            customer_id: Some(alice),
            status: None,
            page: 1,
            per_page: 20,
        })
        .await
        .expect("list by owner");
    assert_eq!(alice_orders.total, 1);
    assert_eq!(alice_orders.orders[0].id, alice_order.id);
    assert_eq!(alice_orders.orders[0].items.len(), 1);

    app.services
        .order_status
        .cancel(alice_order.id)
        .await
        .expect("cancel");

    let processing = app
        .services
        .orders
        .list_orders(storefront_api::services::orders::OrderListFilter {
            customer_id: None,
            status: Some(storefront_api::entities::order::OrderStatus::Processing),
            page: 1,
            per_page: 20,
        })
        .await
        .expect("list by status");
    assert_eq!(processing.total, 1);
    assert_eq!(processing.orders[0].customer_id, bob);
}
